//! Fixed physical layout the shim works against.

use crate::protect::MemoryRegion;

/// Legacy video Option ROM window.
pub const VGA_ROM_ADDRESS: u64 = 0x000C_0000;
pub const VGA_ROM_SIZE: u32 = 0x1_0000; // 64 KiB

/// Real-mode Interrupt Vector Table: 256 far pointers at physical 0.
pub const IVT_ADDRESS: u64 = 0x0000_0000;
pub const IVT_ENTRIES: usize = 256;
pub const IVT_ENTRY_SIZE: u64 = 4;

pub const INT10H_VECTOR: u8 = 0x10;

/// Span the fixed-range MTRR strategy always reprograms, starting at the ROM base.
pub const FIXED_MTRR_SPAN: u32 = 0x2_0000; // 128 KiB

pub const PAGE_SIZE: u64 = 0x1000;

pub const ROM_REGION: MemoryRegion = MemoryRegion::new(VGA_ROM_ADDRESS, VGA_ROM_SIZE);

const _: () = assert!(VGA_ROM_SIZE <= FIXED_MTRR_SPAN);
const _: () = assert!(VGA_ROM_ADDRESS % 16 == 0);
const _: () = assert!(VGA_ROM_ADDRESS + VGA_ROM_SIZE as u64 <= 0x10_0000);
const _: () = assert!((IVT_ENTRIES as u64) * IVT_ENTRY_SIZE <= PAGE_SIZE);
