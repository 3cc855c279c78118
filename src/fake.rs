//! Host-side stand-ins for firmware and physical memory.

use std::cell::Cell;
use std::rc::Rc;

use crate::adapter::{GraphicsServices, VideoMode};
use crate::config::{IVT_ADDRESS, IVT_ENTRIES, IVT_ENTRY_SIZE, ROM_REGION};
use crate::ivt::{ClaimError, PageAllocator};
use crate::phys::PhysMemory;
use crate::protect::{MemoryRegion, Protection, ProtectionStrategy};

const LOW_MEMORY: usize = 0x10_0000;

/// The first MiB of physical memory. Writes into the ROM window are dropped
/// while it is locked, like write-protected shadow RAM.
pub struct FakeMemory {
    bytes: Vec<u8>,
    rom_locked: Rc<Cell<bool>>,
    ivt_writes: usize,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; LOW_MEMORY],
            rom_locked: Rc::new(Cell::new(false)),
            ivt_writes: 0,
        }
    }

    pub fn byte(&self, addr: u64) -> u8 {
        self.bytes[addr as usize]
    }

    /// Writes behind the lock's back, for seeding test state.
    pub fn poke(&mut self, addr: u64, value: u8) {
        self.bytes[addr as usize] = value;
    }

    pub fn poke_vector(&mut self, n: u8, segment: u16, offset: u16) {
        let addr = IVT_ADDRESS + n as u64 * IVT_ENTRY_SIZE;
        let [o0, o1] = offset.to_le_bytes();
        let [s0, s1] = segment.to_le_bytes();
        for (i, b) in [o0, o1, s0, s1].into_iter().enumerate() {
            self.poke(addr + i as u64, b);
        }
    }

    pub fn rom_locked(&self) -> bool {
        self.rom_locked.get()
    }

    pub fn set_rom_locked(&mut self, locked: bool) {
        self.rom_locked.set(locked);
    }

    pub fn lock_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.rom_locked)
    }

    pub fn ivt_writes(&self) -> usize {
        self.ivt_writes
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl PhysMemory for FakeMemory {
    fn read_u8(&self, addr: u64) -> u8 {
        self.bytes[addr as usize]
    }

    fn write_u8(&mut self, addr: u64, value: u8) {
        if ROM_REGION.contains(addr) && self.rom_locked.get() {
            return;
        }
        if addr < IVT_ADDRESS + IVT_ENTRIES as u64 * IVT_ENTRY_SIZE {
            self.ivt_writes += 1;
        }
        self.bytes[addr as usize] = value;
    }
}

enum Behaviour {
    /// Really flips the fake ROM lock.
    Effective(Rc<Cell<bool>>),
    /// Can unlock the fake ROM but its lock request has no effect.
    UnlockOnly(Rc<Cell<bool>>),
    /// Reports success, changes nothing.
    Lying,
    /// Mechanism not present.
    Absent,
}

pub struct StubStrategy {
    name: &'static str,
    behaviour: Behaviour,
    calls: usize,
}

impl StubStrategy {
    pub fn effective(name: &'static str, memory: &FakeMemory) -> Self {
        Self::with(name, Behaviour::Effective(memory.lock_handle()))
    }

    pub fn unlock_only(name: &'static str, memory: &FakeMemory) -> Self {
        Self::with(name, Behaviour::UnlockOnly(memory.lock_handle()))
    }

    pub fn lying(name: &'static str) -> Self {
        Self::with(name, Behaviour::Lying)
    }

    pub fn absent(name: &'static str) -> Self {
        Self::with(name, Behaviour::Absent)
    }

    fn with(name: &'static str, behaviour: Behaviour) -> Self {
        Self {
            name,
            behaviour,
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl ProtectionStrategy for StubStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn try_apply(&mut self, _region: MemoryRegion, desired: Protection) -> bool {
        self.calls += 1;
        match &self.behaviour {
            Behaviour::Effective(lock) => {
                lock.set(desired == Protection::Locked);
                true
            }
            Behaviour::UnlockOnly(lock) => {
                if desired == Protection::Writable {
                    lock.set(false);
                }
                true
            }
            Behaviour::Lying => true,
            Behaviour::Absent => false,
        }
    }
}

#[derive(Default)]
pub struct FakeGraphics {
    pub primary: Option<VideoMode>,
    pub legacy: Option<(u32, u32)>,
    pub primary_queries: usize,
    pub legacy_queries: usize,
}

impl FakeGraphics {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn primary(mode: VideoMode) -> Self {
        Self {
            primary: Some(mode),
            ..Self::default()
        }
    }

    pub fn legacy(width: u32, height: u32) -> Self {
        Self {
            legacy: Some((width, height)),
            ..Self::default()
        }
    }
}

impl GraphicsServices for FakeGraphics {
    fn current_mode(&mut self) -> Option<VideoMode> {
        self.primary_queries += 1;
        self.primary
    }

    fn legacy_resolution(&mut self) -> Option<(u32, u32)> {
        self.legacy_queries += 1;
        self.legacy
    }
}

pub struct FakePages {
    pub available: bool,
    pub claimed: Vec<(u64, usize)>,
}

impl FakePages {
    pub fn new() -> Self {
        Self {
            available: true,
            claimed: Vec::new(),
        }
    }

    pub fn taken() -> Self {
        Self {
            available: false,
            claimed: Vec::new(),
        }
    }
}

impl PageAllocator for FakePages {
    fn allocate_at(&mut self, base: u64, pages: usize) -> Result<(), ClaimError> {
        if !self.available || self.claimed.iter().any(|&(b, _)| b == base) {
            return Err(ClaimError::AddressUnavailable);
        }
        self.claimed.push((base, pages));
        Ok(())
    }
}
