//! Making the ROM window writable and read-only again.
//!
//! Firmware lock/unlock services are not trusted: every mechanism is judged
//! by probing the first byte of the region afterwards, never by its return
//! code.

use core::fmt;

use heapless::Vec as HVec;
use log::{info, warn};

use crate::phys::PhysMemory;

/// Upper bound on registered mechanisms.
pub const MAX_STRATEGIES: usize = 4;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u32,
}

impl MemoryRegion {
    pub const fn new(base: u64, length: u32) -> Self {
        Self { base, length }
    }

    #[inline]
    pub const fn end(&self) -> u64 {
        self.base + self.length as u64
    }

    #[inline]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Protection {
    Writable,
    Locked,
}

impl Protection {
    fn verb(self) -> &'static str {
        match self {
            Protection::Writable => "unlock",
            Protection::Locked => "lock",
        }
    }

    #[inline]
    fn satisfied_by(self, writable: bool) -> bool {
        writable == (self == Protection::Writable)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtectionError {
    /// Every mechanism was absent or had no observable effect.
    NoMechanismAvailable,
}

impl fmt::Display for ProtectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionError::NoMechanismAvailable => {
                f.write_str("no lock/unlock mechanism changed the region's writability")
            }
        }
    }
}

impl core::error::Error for ProtectionError {}

/// One way of changing a region's write protection.
pub trait ProtectionStrategy {
    fn name(&self) -> &'static str;

    /// Apply `desired` to `region`. Returns `false` when the mechanism does
    /// not exist on this platform; `true` only means it was invoked.
    fn try_apply(&mut self, region: MemoryRegion, desired: Protection) -> bool;
}

/// Read one byte, write back `byte + 1`, compare, restore.
///
/// The original value is put back whether or not the write stuck.
pub fn can_write_at(memory: &mut dyn PhysMemory, addr: u64) -> bool {
    let old = memory.read_u8(addr);
    memory.write_u8(addr, old.wrapping_add(1));
    let writable = memory.read_u8(addr) != old;
    memory.write_u8(addr, old);
    writable
}

/// Ordered chain of mechanisms; the first one whose effect is confirmed wins.
pub struct ProtectionController<'a> {
    strategies: HVec<&'a mut dyn ProtectionStrategy, MAX_STRATEGIES>,
}

impl<'a> ProtectionController<'a> {
    pub fn new() -> Self {
        Self {
            strategies: HVec::new(),
        }
    }

    /// Appends a mechanism; order of registration is order of attempt.
    pub fn with(mut self, strategy: &'a mut dyn ProtectionStrategy) -> Self {
        if self.strategies.push(strategy).is_err() {
            warn!("[protect] strategy table full, ignoring mechanism");
        }
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn set_protection(
        &mut self,
        memory: &mut dyn PhysMemory,
        region: MemoryRegion,
        desired: Protection,
    ) -> Result<(), ProtectionError> {
        if desired.satisfied_by(can_write_at(memory, region.base)) {
            info!(
                "[protect] memory at 0x{:x} already {}ed",
                region.base,
                desired.verb()
            );
            return Ok(());
        }

        for strategy in self.strategies.iter_mut() {
            if !strategy.try_apply(region, desired) {
                continue;
            }
            let ok = desired.satisfied_by(can_write_at(memory, region.base));
            info!(
                "[protect] {} {}ing memory at 0x{:x} using {}",
                if ok { "success" } else { "failure" },
                desired.verb(),
                region.base,
                strategy.name()
            );
            if ok {
                return Ok(());
            }
        }

        warn!(
            "[protect] unable to find a way to {} memory at 0x{:x}",
            desired.verb(),
            region.base
        );
        Err(ProtectionError::NoMechanismAvailable)
    }
}

impl Default for ProtectionController<'_> {
    fn default() -> Self {
        Self::new()
    }
}
