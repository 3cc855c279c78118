//! Identity-mapped physical memory and fixed-address page claims.

use core::arch::asm;

use log::debug;
use uefi_raw::table::boot::MemoryType;
use uefi_raw::table::system::SystemTable;

use crate::ivt::{ClaimError, PageAllocator};
use crate::phys::PhysMemory;

/// `EFI_ALLOCATE_TYPE::AllocateAddress`; uefi-raw 0.11 takes the raw `u32`.
const ALLOCATE_ADDRESS: u32 = 2;

/// Physical memory through the firmware's identity map.
///
/// Accesses go through inline `mov`s rather than pointer reads: the IVT
/// starts at physical 0, which Rust would treat as a null dereference.
pub struct IdentityMemory {
    _private: (),
}

impl IdentityMemory {
    /// # Safety
    /// Boot services must still be running with the firmware's identity
    /// mapping of the first MiB in place.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysMemory for IdentityMemory {
    #[inline]
    fn read_u8(&self, addr: u64) -> u8 {
        let v: u8;
        unsafe {
            asm!("mov {v}, byte ptr [{a}]", a = in(reg) addr, v = out(reg_byte) v,
                 options(nostack, preserves_flags));
        }
        v
    }

    #[inline]
    fn write_u8(&mut self, addr: u64, value: u8) {
        unsafe {
            asm!("mov byte ptr [{a}], {v}", a = in(reg) addr, v = in(reg_byte) value,
                 options(nostack, preserves_flags));
        }
    }
}

/// `AllocatePages(AllocateAddress, ...)` straight through the boot services
/// table. The safe wrapper cannot report an allocation at address 0.
pub struct UefiPages;

impl PageAllocator for UefiPages {
    fn allocate_at(&mut self, base: u64, pages: usize) -> Result<(), ClaimError> {
        let st = uefi::table::system_table_raw().ok_or(ClaimError::AddressUnavailable)?;
        let st = st.cast::<SystemTable>();
        let bs = unsafe { st.as_ref().boot_services };
        if bs.is_null() {
            return Err(ClaimError::AddressUnavailable);
        }

        let mut addr = base;
        let status = unsafe {
            ((*bs).allocate_pages)(
                ALLOCATE_ADDRESS,
                MemoryType::BOOT_SERVICES_CODE,
                pages,
                &mut addr,
            )
        };
        if status.is_error() {
            debug!("[pages] AllocatePages(0x{:x}, {}) = {:?}", base, pages, status);
            return Err(ClaimError::AddressUnavailable);
        }
        Ok(())
    }
}
