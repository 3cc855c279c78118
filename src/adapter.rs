//! Finding the active graphics adapter and its current mode.

use core::fmt;

use log::{info, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PixelFormat {
    #[default]
    BgrReserved8,
    RgbReserved8,
    Other,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PixelFormat::BgrReserved8 => "BGRX8888",
            PixelFormat::RgbReserved8 => "RGBX8888",
            PixelFormat::Other => "other",
        })
    }
}

/// Current mode of the adapter, as the firmware reports it.
///
/// `framebuffer_base == 0` means "unknown", not physical address zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct VideoMode {
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub pixel_format: PixelFormat,
    pub pixels_per_scan_line: u32,
    pub framebuffer_base: u64,
    pub framebuffer_size_bytes: u64,
}

impl VideoMode {
    pub fn log(&self) {
        info!("[video] HorizontalResolution = {}", self.horizontal_resolution);
        info!("[video] VerticalResolution   = {}", self.vertical_resolution);
        info!("[video] PixelFormat          = {}", self.pixel_format);
        info!("[video] PixelsPerScanLine    = {}", self.pixels_per_scan_line);
        info!("[video] FrameBufferBase      = 0x{:x}", self.framebuffer_base);
        info!("[video] FrameBufferSize      = {}", self.framebuffer_size_bytes);
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AdapterPresence {
    #[default]
    NotProbed,
    Found,
    NotFound,
}

/// Graphics services exposed by the platform firmware.
pub trait GraphicsServices {
    /// Full mode from the modern graphics protocol, if one is bound.
    fn current_mode(&mut self) -> Option<VideoMode>;

    /// `(width, height)` from the older draw protocol's mode query.
    fn legacy_resolution(&mut self) -> Option<(u32, u32)>;
}

/// Probe-once adapter detection. Lives in the shim context for the boot.
#[derive(Debug, Default)]
pub struct AdapterLocator {
    presence: AdapterPresence,
    mode: VideoMode,
}

impl AdapterLocator {
    pub const fn new() -> Self {
        Self {
            presence: AdapterPresence::NotProbed,
            mode: VideoMode {
                horizontal_resolution: 0,
                vertical_resolution: 0,
                pixel_format: PixelFormat::BgrReserved8,
                pixels_per_scan_line: 0,
                framebuffer_base: 0,
                framebuffer_size_bytes: 0,
            },
        }
    }

    #[inline]
    pub fn presence(&self) -> AdapterPresence {
        self.presence
    }

    #[inline]
    pub fn mode(&self) -> VideoMode {
        self.mode
    }

    pub fn detect(&mut self, graphics: &mut dyn GraphicsServices) -> (AdapterPresence, VideoMode) {
        if self.presence != AdapterPresence::NotProbed {
            return (self.presence, self.mode);
        }

        self.mode = VideoMode::default();
        self.presence = if let Some(mode) = graphics.current_mode() {
            info!("[video] found a GOP protocol provider");
            self.mode = mode;
            AdapterPresence::Found
        } else if let Some((width, height)) = graphics.legacy_resolution() {
            info!("[video] found a UGA protocol provider");
            // UGA cannot report the framebuffer or stride; both stay zero.
            self.mode.horizontal_resolution = width;
            self.mode.vertical_resolution = height;
            self.mode.pixel_format = PixelFormat::BgrReserved8;
            AdapterPresence::Found
        } else {
            warn!("[video] no GOP or UGA adapter found");
            AdapterPresence::NotFound
        };

        (self.presence, self.mode)
    }
}
