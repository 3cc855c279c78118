//! Legacy int 10h / VBE shim for GOP-only UEFI firmware.
//!
//! Synthesizes a one-mode VESA BIOS in the legacy video ROM window and points
//! the real-mode IVT at it, so loaders that still call int 10h keep working.
#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod adapter;
pub mod config;
pub mod handler;
pub mod installer;
pub mod ivt;
pub mod phys;
pub mod protect;
pub mod rom;
pub mod vbe;

#[cfg(target_os = "uefi")]
pub mod platform;

#[cfg(test)]
mod fake;

pub use adapter::{AdapterLocator, AdapterPresence, GraphicsServices, PixelFormat, VideoMode};
pub use installer::{
    InstallFailure, InstallOutcome, InstallStep, Platform, ShimContext, ShimInstaller,
};
pub use protect::{MemoryRegion, Protection, ProtectionController, ProtectionStrategy};
