//! Real-mode Interrupt Vector Table.

use core::fmt;

use log::{info, warn};

use crate::config::{INT10H_VECTOR, IVT_ADDRESS, IVT_ENTRY_SIZE, PAGE_SIZE};
use crate::phys::{FarPtr, PhysMemory};
use crate::protect::MemoryRegion;

pub type IvtEntry = FarPtr;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClaimError {
    /// Something else already owns the page.
    AddressUnavailable,
}

impl fmt::Display for ClaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimError::AddressUnavailable => f.write_str("page is already allocated"),
        }
    }
}

impl core::error::Error for ClaimError {}

/// Firmware page allocator, fixed-address requests only.
pub trait PageAllocator {
    fn allocate_at(&mut self, base: u64, pages: usize) -> Result<(), ClaimError>;
}

pub struct IvtController<'a> {
    memory: &'a mut dyn PhysMemory,
    pages: &'a mut dyn PageAllocator,
}

impl<'a> IvtController<'a> {
    pub fn new(memory: &'a mut dyn PhysMemory, pages: &'a mut dyn PageAllocator) -> Self {
        Self { memory, pages }
    }

    #[inline]
    fn entry_addr(n: u8) -> u64 {
        IVT_ADDRESS + n as u64 * IVT_ENTRY_SIZE
    }

    pub fn read_vector(&self, n: u8) -> IvtEntry {
        let at = Self::entry_addr(n);
        IvtEntry::new(self.memory.read_u16(at + 2), self.memory.read_u16(at))
    }

    /// Does not validate `n`; any vector can be overwritten.
    pub fn write_vector(&mut self, n: u8, entry: IvtEntry) {
        let at = Self::entry_addr(n);
        self.memory.write_u16(at, entry.offset);
        self.memory.write_u16(at + 2, entry.segment);
    }

    /// Takes the page holding the IVT away from the firmware allocator so
    /// nothing is placed over the vectors we patch.
    pub fn claim_page(&mut self) -> Result<(), ClaimError> {
        let page = IVT_ADDRESS & !(PAGE_SIZE - 1);
        match self.pages.allocate_at(page, 1) {
            Ok(()) => {
                info!("[ivt] claimed IVT page at 0x{:x}", page);
                Ok(())
            }
            Err(e) => {
                warn!("[ivt] claiming IVT page at 0x{:x} failed: {}", page, e);
                Err(e)
            }
        }
    }

    /// `true` when int 10h already points into `rom`, whether a real video
    /// BIOS put it there or an earlier run of the shim did.
    pub fn has_handler_installed(&self, rom: MemoryRegion) -> bool {
        let entry = self.read_vector(INT10H_VECTOR);
        if rom.contains(entry.linear()) {
            info!("[ivt] int 10h handler found at {}", entry);
            true
        } else {
            info!("[ivt] no int 10h handler (vector = {})", entry);
            false
        }
    }
}
