//! VBE controller and mode information blocks.
//!
//! Layout follows the VESA BIOS EXTENSION Core Functions Standard 3.0
//! (function 00h, p. 26 and function 01h, p. 30). The two 256-byte blocks sit
//! back to back at the start of the ROM image; the int 10h handler reads them
//! from there and hands them to callers verbatim, so every offset below is
//! part of the contract.

use core::fmt;

use bitflags::bitflags;
use log::{info, warn};

use crate::adapter::{AdapterPresence, PixelFormat, VideoMode};
use crate::phys::FarPtr;
use crate::rom::{RomBoundsError, RomImage};

pub const BLOCK_SIZE: usize = 256;
/// Both blocks; the handler entry point follows directly.
pub const TABLES_SIZE: usize = 2 * BLOCK_SIZE;

pub const VBE_VERSION_3_0: u16 = 0x0300;
pub const MODE_NUMBER: u16 = 0x00F1;
pub const MODE_LIST_END: u16 = 0xFFFF;

/// The Windows 7 installer insists on exactly this mode.
pub const MODE_WIDTH: u32 = 1024;
pub const MODE_HEIGHT: u32 = 768;
pub const BITS_PER_PIXEL: u8 = 32;
const BYTES_PER_PIXEL: u64 = 4;

pub const VENDOR_NAME: &[u8] = b"Jotunheim\0";
pub const PRODUCT_NAME: &[u8] = b"Emulated VGA\0";
pub const PRODUCT_REVISION: &[u8] = b"GOP Int10h shim\0";

const MEMORY_MODEL_DIRECT_COLOR: u8 = 6;

// VbeInfoBlock
const INFO_SIGNATURE: usize = 0;
const INFO_VERSION: usize = 4;
const INFO_OEM_STRING: usize = 6;
const INFO_CAPABILITIES: usize = 10;
const INFO_MODE_LIST: usize = 14;
const INFO_TOTAL_MEMORY: usize = 18;
const INFO_OEM_SOFTWARE_REV: usize = 20;
const INFO_VENDOR_NAME: usize = 22;
const INFO_PRODUCT_NAME: usize = 26;
const INFO_PRODUCT_REV: usize = 30;
/// String and mode-list storage starts right after the fixed fields.
const INFO_DATA: usize = 34;

const INFO_DATA_LEN: usize =
    2 * VENDOR_NAME.len() + PRODUCT_NAME.len() + PRODUCT_REVISION.len() + 2 * 2;
const _: () = assert!(INFO_DATA + INFO_DATA_LEN <= BLOCK_SIZE);

// VbeModeInfoBlock
const MI_ATTRIBUTES: usize = 0;
const MI_WIN_A_ATTRIBUTES: usize = 2;
const MI_WIN_B_ATTRIBUTES: usize = 3;
const MI_WIN_GRANULARITY: usize = 4;
const MI_WIN_SIZE: usize = 6;
const MI_WIN_A_SEGMENT: usize = 8;
const MI_WIN_B_SEGMENT: usize = 10;
const MI_WIN_FUNC_PTR: usize = 12;
const MI_BYTES_PER_SCAN_LINE: usize = 16;
const MI_X_RESOLUTION: usize = 18;
const MI_Y_RESOLUTION: usize = 20;
const MI_X_CHAR_SIZE: usize = 22;
const MI_Y_CHAR_SIZE: usize = 23;
const MI_PLANES: usize = 24;
const MI_BITS_PER_PIXEL: usize = 25;
const MI_BANKS: usize = 26;
const MI_MEMORY_MODEL: usize = 27;
const MI_BANK_SIZE: usize = 28;
const MI_IMAGE_PAGES: usize = 29;
const MI_VBE3_RESERVED: usize = 30;
/// Banked-mode mask size/position pairs: red, green, blue, reserved.
const MI_MASKS: usize = 31;
const MI_DIRECT_COLOR_INFO: usize = 39;
const MI_PHYS_BASE: usize = 40;
const MI_OFF_SCREEN_OFFSET: usize = 44;
const MI_OFF_SCREEN_SIZE: usize = 48;
const MI_LIN_BYTES_PER_SCAN_LINE: usize = 50;
const MI_BNK_IMAGE_PAGES: usize = 52;
const MI_LIN_IMAGE_PAGES: usize = 53;
/// Linear-mode mask size/position pairs: red, green, blue, reserved.
const MI_LIN_MASKS: usize = 54;
const MI_MAX_PIXEL_CLOCK: usize = 62;

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct Capabilities: u32 {
        const DAC_8BIT = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct ModeAttributes: u16 {
        const SUPPORTED = 1 << 0;
        /// Reserved, must be 1 for VBE 1.2+.
        const VBE12 = 1 << 1;
        const COLOR = 1 << 3;
        const GRAPHICS = 1 << 4;
        const NOT_VGA_COMPATIBLE = 1 << 5;
        const NO_WINDOWED_MODE = 1 << 6;
        const LINEAR_FRAMEBUFFER = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct DirectColorInfo: u8 {
        const RESERVED_USABLE = 1 << 1;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CodecError {
    NoAdapter,
    UnsupportedPixelFormat(PixelFormat),
    /// The fixed 1024x768 image cannot be centered on a smaller screen.
    ResolutionTooSmall { width: u32, height: u32 },
    /// The centered framebuffer or scan-line width does not fit its VBE field.
    FramebufferOutOfRange,
    Rom(RomBoundsError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::NoAdapter => f.write_str("no graphics adapter was found"),
            CodecError::UnsupportedPixelFormat(p) => write!(f, "unsupported pixel format ({p})"),
            CodecError::ResolutionTooSmall { width, height } => write!(
                f,
                "adapter resolution {width}x{height} is below {MODE_WIDTH}x{MODE_HEIGHT}"
            ),
            CodecError::FramebufferOutOfRange => {
                f.write_str("framebuffer does not fit in 32-bit VBE fields")
            }
            CodecError::Rom(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for CodecError {}

impl From<RomBoundsError> for CodecError {
    fn from(e: RomBoundsError) -> Self {
        CodecError::Rom(e)
    }
}

/// Little-endian field writer over one block.
struct Block([u8; BLOCK_SIZE]);

impl Block {
    const fn new() -> Self {
        Self([0; BLOCK_SIZE])
    }

    fn u8(&mut self, at: usize, v: u8) {
        self.0[at] = v;
    }

    fn u16(&mut self, at: usize, v: u16) {
        self.0[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, at: usize, v: u32) {
        self.0[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, at: usize, v: &[u8]) -> usize {
        self.0[at..at + v.len()].copy_from_slice(v);
        at + v.len()
    }
}

/// Channel `(size, position)` pairs in red, green, blue, reserved order.
fn channel_layout(format: PixelFormat) -> Result<[(u8, u8); 4], CodecError> {
    match format {
        PixelFormat::BgrReserved8 => Ok([(8, 16), (8, 8), (8, 0), (8, 24)]),
        PixelFormat::RgbReserved8 => Ok([(8, 0), (8, 8), (8, 16), (8, 24)]),
        other => Err(CodecError::UnsupportedPixelFormat(other)),
    }
}

/// Byte offset that centers the fixed mode inside the real screen.
pub fn centering_offset(mode: &VideoMode) -> Result<u64, CodecError> {
    if mode.horizontal_resolution < MODE_WIDTH || mode.vertical_resolution < MODE_HEIGHT {
        return Err(CodecError::ResolutionTooSmall {
            width: mode.horizontal_resolution,
            height: mode.vertical_resolution,
        });
    }
    let h_px = ((mode.horizontal_resolution - MODE_WIDTH) / 2) as u64;
    let v_px = ((mode.vertical_resolution - MODE_HEIGHT) / 2) as u64;
    Ok(v_px * mode.pixels_per_scan_line as u64 * BYTES_PER_PIXEL + h_px * BYTES_PER_PIXEL)
}

/// Controller information, with string pointers into the block at `base`.
pub fn info_block(base: u64, mode: &VideoMode) -> [u8; BLOCK_SIZE] {
    let ptr = |at: usize| FarPtr::within(base, base + at as u64).packed();
    let mut b = Block::new();

    b.bytes(INFO_SIGNATURE, b"VESA");
    b.u16(INFO_VERSION, VBE_VERSION_3_0);
    b.u32(INFO_CAPABILITIES, Capabilities::DAC_8BIT.bits());
    let memory_64k = mode.framebuffer_size_bytes.div_ceil(0x1_0000);
    b.u16(INFO_TOTAL_MEMORY, u16::try_from(memory_64k).unwrap_or(u16::MAX));
    b.u16(INFO_OEM_SOFTWARE_REV, 0);

    let mut at = INFO_DATA;
    b.u32(INFO_OEM_STRING, ptr(at));
    at = b.bytes(at, VENDOR_NAME);
    b.u32(INFO_VENDOR_NAME, ptr(at));
    at = b.bytes(at, VENDOR_NAME);
    b.u32(INFO_PRODUCT_NAME, ptr(at));
    at = b.bytes(at, PRODUCT_NAME);
    b.u32(INFO_PRODUCT_REV, ptr(at));
    at = b.bytes(at, PRODUCT_REVISION);

    b.u32(INFO_MODE_LIST, ptr(at));
    b.u16(at, MODE_NUMBER);
    b.u16(at + 2, MODE_LIST_END);

    b.0
}

/// Mode information for the single synthetic 1024x768x32 linear mode.
pub fn mode_info_block(mode: &VideoMode) -> Result<[u8; BLOCK_SIZE], CodecError> {
    let channels = channel_layout(mode.pixel_format)?;
    let lfb = mode
        .framebuffer_base
        .checked_add(centering_offset(mode)?)
        .and_then(|a| u32::try_from(a).ok())
        .ok_or(CodecError::FramebufferOutOfRange)?;
    let pitch = u16::try_from(mode.pixels_per_scan_line as u64 * BYTES_PER_PIXEL)
        .map_err(|_| CodecError::FramebufferOutOfRange)?;

    let mut b = Block::new();
    let attrs = ModeAttributes::SUPPORTED
        | ModeAttributes::VBE12
        | ModeAttributes::COLOR
        | ModeAttributes::GRAPHICS
        | ModeAttributes::NOT_VGA_COMPATIBLE
        | ModeAttributes::NO_WINDOWED_MODE
        | ModeAttributes::LINEAR_FRAMEBUFFER;
    b.u16(MI_ATTRIBUTES, attrs.bits());

    // Windowing off: callers fall back to function 05h, which the handler rejects.
    b.u8(MI_WIN_A_ATTRIBUTES, 0);
    b.u8(MI_WIN_B_ATTRIBUTES, 0);
    b.u16(MI_WIN_GRANULARITY, 0);
    b.u16(MI_WIN_SIZE, 0);
    b.u16(MI_WIN_A_SEGMENT, 0);
    b.u16(MI_WIN_B_SEGMENT, 0);
    b.u32(MI_WIN_FUNC_PTR, 0);
    b.u16(MI_BYTES_PER_SCAN_LINE, pitch);

    b.u16(MI_X_RESOLUTION, MODE_WIDTH as u16);
    b.u16(MI_Y_RESOLUTION, MODE_HEIGHT as u16);
    b.u8(MI_X_CHAR_SIZE, 8);
    b.u8(MI_Y_CHAR_SIZE, 16);

    b.u8(MI_PLANES, 1);
    b.u8(MI_BITS_PER_PIXEL, BITS_PER_PIXEL);
    b.u8(MI_BANKS, 1);
    b.u8(MI_MEMORY_MODEL, MEMORY_MODEL_DIRECT_COLOR);
    b.u8(MI_BANK_SIZE, 0);
    b.u8(MI_IMAGE_PAGES, 0);
    b.u8(MI_VBE3_RESERVED, 1);

    for (i, (size, pos)) in channels.into_iter().enumerate() {
        b.u8(MI_MASKS + 2 * i, size);
        b.u8(MI_MASKS + 2 * i + 1, pos);
        b.u8(MI_LIN_MASKS + 2 * i, size);
        b.u8(MI_LIN_MASKS + 2 * i + 1, pos);
    }
    b.u8(MI_DIRECT_COLOR_INFO, DirectColorInfo::RESERVED_USABLE.bits());

    b.u32(MI_PHYS_BASE, lfb);
    b.u32(MI_OFF_SCREEN_OFFSET, 0);
    b.u16(MI_OFF_SCREEN_SIZE, 0);
    b.u16(MI_LIN_BYTES_PER_SCAN_LINE, pitch);
    b.u8(MI_BNK_IMAGE_PAGES, 0);
    b.u8(MI_LIN_IMAGE_PAGES, 0);
    b.u32(MI_MAX_PIXEL_CLOCK, 0);

    Ok(b.0)
}

/// Writes both blocks at the start of `dest` and returns the physical
/// address right after them, where the handler code lives.
pub fn encode(
    presence: AdapterPresence,
    mode: &VideoMode,
    dest: &mut RomImage<'_>,
) -> Result<u64, CodecError> {
    if presence != AdapterPresence::Found {
        warn!("[vbe] no adapters were found, unable to fill in VESA information");
        return Err(CodecError::NoAdapter);
    }
    if mode.framebuffer_base == 0 {
        warn!("[vbe] framebuffer base unknown, linear address will be bogus");
    }

    let mode_info = mode_info_block(mode)?;
    let info = info_block(dest.base(), mode);
    dest.write(0, &info)?;
    dest.write(BLOCK_SIZE as u32, &mode_info)?;

    let end = dest.base() + TABLES_SIZE as u64;
    info!("[vbe] VESA information filled in, tables end at 0x{:x}", end);
    Ok(end)
}
