//! Bounds-checked window over the legacy ROM region.

use core::fmt;

use crate::phys::PhysMemory;
use crate::protect::MemoryRegion;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RomBoundsError {
    pub offset: u32,
    pub len: usize,
    pub size: u32,
}

impl fmt::Display for RomBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write of {} bytes at offset 0x{:x} exceeds ROM size 0x{:x}",
            self.len, self.offset, self.size
        )
    }
}

impl core::error::Error for RomBoundsError {}

/// The ROM image: `region.length` bytes anchored at `region.base`.
///
/// All writes are expressed as offsets from the base and rejected when they
/// would spill past the end of the region.
pub struct RomImage<'m> {
    memory: &'m mut dyn PhysMemory,
    region: MemoryRegion,
}

impl<'m> RomImage<'m> {
    pub fn new(memory: &'m mut dyn PhysMemory, region: MemoryRegion) -> Self {
        Self { memory, region }
    }

    #[inline]
    pub fn base(&self) -> u64 {
        self.region.base
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.region.length
    }

    fn check(&self, offset: u32, len: usize) -> Result<u64, RomBoundsError> {
        let end = (offset as u64).checked_add(len as u64);
        match end {
            Some(end) if end <= self.region.length as u64 => Ok(self.region.base + offset as u64),
            _ => Err(RomBoundsError {
                offset,
                len,
                size: self.region.length,
            }),
        }
    }

    pub fn zero(&mut self) {
        self.memory
            .fill(self.region.base, self.region.length as u64, 0);
    }

    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), RomBoundsError> {
        let addr = self.check(offset, data.len())?;
        self.memory.write_bytes(addr, data);
        Ok(())
    }

    pub fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), RomBoundsError> {
        let addr = self.check(offset, buf.len())?;
        self.memory.read_bytes(addr, buf);
        Ok(())
    }
}
