#![no_std]
#![no_main]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(feature = "serial")]
#[macro_use]
mod serial;

#[cfg(not(feature = "serial"))]
macro_rules! slog {
    ($($arg:tt)*) => {{
        if false {
            let _ = alloc::format!($($arg)*);
        }
    }};
}

use core::arch::asm;

use log::{info, warn};
use uefi::prelude::*;
use uefi::{boot, system};

use vgashim::handler::INT10H_HANDLER;
use vgashim::platform::UefiPlatform;
use vgashim::vbe::CodecError;
use vgashim::{InstallFailure, InstallOutcome, ShimContext, ShimInstaller};

#[global_allocator]
static ALLOCATOR: uefi::allocator::Allocator = uefi::allocator::Allocator;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    slog!("[serial][PANIC] {}", info);
    halt()
}

fn halt() -> ! {
    unsafe {
        loop {
            asm!("hlt");
        }
    }
}

#[entry]
fn main() -> Status {
    #[cfg(feature = "serial")]
    unsafe {
        serial::init_com1()
    }
    slog!(">>> VgaShim entry");

    if uefi::helpers::init().is_err() {
        slog!("[serial][FATAL] helpers::init failed");
        halt();
    }
    if let Err(e) = system::with_stdout(|out| out.reset(false)) {
        warn!("console reset failed: {:?}", e);
    }
    log_step("VgaShim start");

    let mut uefi = unsafe { UefiPlatform::new() };
    let mut ctx = ShimContext::new();
    let mut installer = ShimInstaller::new(uefi.platform(), INT10H_HANDLER);
    let status = match installer.run(&mut ctx) {
        Ok(InstallOutcome::Installed { vector, locked }) => {
            slog!("[serial] int 10h -> {} (locked={})", vector, locked);
            if !locked {
                warn!("VGA ROM left writable");
            }
            Status::SUCCESS
        }
        Ok(InstallOutcome::AlreadyInstalled) => {
            info!("int 10h handler already present, nothing to do");
            Status::SUCCESS
        }
        Err(failure) => {
            slog!("[serial][FATAL] {:?}: {}", failure.step(), failure);
            failure_status(&failure)
        }
    };

    log_step("Done");
    status
}

fn failure_status(failure: &InstallFailure) -> Status {
    match failure {
        InstallFailure::CannotUnlock(_) => Status::WRITE_PROTECTED,
        InstallFailure::CannotClaimIvt(_) => Status::ABORTED,
        InstallFailure::CannotEncode(CodecError::NoAdapter) => Status::NOT_FOUND,
        InstallFailure::CannotEncode(
            CodecError::UnsupportedPixelFormat(_) | CodecError::ResolutionTooSmall { .. },
        ) => Status::UNSUPPORTED,
        InstallFailure::CannotEncode(_) | InstallFailure::HandlerTooLarge { .. } => {
            Status::ABORTED
        }
    }
}

fn log_step(msg: &str) {
    info!("[step] {msg}");
    slog!("[step] {}", msg);
    boot::stall(80_000);
}
