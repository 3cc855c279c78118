//! Fixed-range MTRR fallback: WP makes the window read-only, UC writable.

use core::arch::asm;
use core::arch::x86_64::__cpuid;

use log::debug;
use x86_64::instructions::interrupts::without_interrupts;
use x86_64::instructions::tlb;
use x86_64::registers::control::{Cr0, Cr0Flags};
use x86_64::registers::model_specific::Msr;

use crate::config::{FIXED_MTRR_SPAN, VGA_ROM_ADDRESS};
use crate::protect::{MemoryRegion, Protection, ProtectionStrategy};

// MSRs
const IA32_MTRRCAP: u32 = 0xFE;
const IA32_MTRR_DEF_TYPE: u32 = 0x2FF;
const IA32_MTRR_FIX4K_C0000: u32 = 0x268;

const MTRRCAP_FIX: u64 = 1 << 8;
const DEF_TYPE_FE: u64 = 1 << 10;

// Memory types
const MEM_UC: u8 = 0x00;
const MEM_WP: u8 = 0x05;

/// Each FIX4K MSR holds eight 4 KiB ranges.
const FIX4K_MSR_SPAN: u64 = 0x8000;
const FIX4K_BASE: u64 = 0xC_0000;
const FIX4K_END: u64 = 0x10_0000;

const _: () = assert!(VGA_ROM_ADDRESS >= FIX4K_BASE);
const _: () = assert!(VGA_ROM_ADDRESS % FIX4K_MSR_SPAN == 0);
const _: () = assert!(FIXED_MTRR_SPAN as u64 % FIX4K_MSR_SPAN == 0);
const _: () = assert!(VGA_ROM_ADDRESS + FIXED_MTRR_SPAN as u64 <= FIX4K_END);

fn has_fixed_mtrrs() -> bool {
    let edx = unsafe { __cpuid(1).edx };
    if edx & (1 << 12) == 0 {
        return false;
    }
    unsafe { Msr::new(IA32_MTRRCAP).read() & MTRRCAP_FIX != 0 }
}

#[inline(always)]
unsafe fn wbinvd() {
    asm!("wbinvd", options(nostack, preserves_flags));
}

/// SDM vol. 3 11.11.8: caches off and flushed, MTRRs disabled while the
/// fixed ranges change.
unsafe fn program_fixed(base: u64, span: u64, mem_type: u8) {
    let value = u64::from_le_bytes([mem_type; 8]);
    let first = IA32_MTRR_FIX4K_C0000 + ((base - FIX4K_BASE) / FIX4K_MSR_SPAN) as u32;
    let count = (span / FIX4K_MSR_SPAN) as u32;

    without_interrupts(|| {
        let cr0 = Cr0::read();
        Cr0::write(cr0.union(Cr0Flags::CACHE_DISABLE).difference(Cr0Flags::NOT_WRITE_THROUGH));
        wbinvd();
        tlb::flush_all();

        let mut def_type = Msr::new(IA32_MTRR_DEF_TYPE);
        let saved = def_type.read();
        def_type.write(saved & !(1 << 11));

        for msr in first..first + count {
            Msr::new(msr).write(value);
        }

        wbinvd();
        tlb::flush_all();
        def_type.write(saved | DEF_TYPE_FE);
        Cr0::write(cr0);
    });
}

pub struct MtrrLock;

impl ProtectionStrategy for MtrrLock {
    fn name(&self) -> &'static str {
        "MTRR"
    }

    fn try_apply(&mut self, region: MemoryRegion, desired: Protection) -> bool {
        if !has_fixed_mtrrs() {
            return false;
        }
        let mem_type = match desired {
            Protection::Writable => MEM_UC,
            Protection::Locked => MEM_WP,
        };
        debug!(
            "[protect] MTRR 0x{:x}+0x{:x} -> type {}",
            region.base, FIXED_MTRR_SPAN, mem_type
        );
        unsafe { program_fixed(region.base, FIXED_MTRR_SPAN as u64, mem_type) };
        true
    }
}
