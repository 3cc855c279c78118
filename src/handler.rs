//! Real-mode int 10h handler image.

use crate::config::VGA_ROM_SIZE;
use crate::vbe::TABLES_SIZE;

/// Copied verbatim right after the VBE tables; its first byte is the entry
/// point the IVT is pointed at.
///
/// Until the assembled handler is dropped in this answers every call with
/// `AX = 0x014F` (VBE function failed):
///
/// ```text
/// mov ax, 0x014F
/// iret
/// ```
pub const INT10H_HANDLER: &[u8] = &[0xB8, 0x4F, 0x01, 0xCF];

const _: () = assert!(INT10H_HANDLER.len() <= VGA_ROM_SIZE as usize - TABLES_SIZE);
