//! GOP and UGA adapters.

use core::ffi::c_void;

use log::{debug, warn};
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol};
use uefi::proto::console::gop::{GraphicsOutput, PixelFormat as GopPixelFormat};
use uefi::proto::{ProtocolPointer, unsafe_protocol};
use uefi::{Handle, Status};
use uefi_raw::table::system::SystemTable;

use crate::adapter::{GraphicsServices, PixelFormat, VideoMode};

/// `EFI_UGA_DRAW_PROTOCOL`. Only `GetMode` is used.
#[repr(C)]
#[allow(dead_code)]
#[unsafe_protocol("982c298b-f4fa-41cb-b838-77aa688fb839")]
pub struct UgaDraw {
    get_mode: unsafe extern "efiapi" fn(
        this: *mut UgaDraw,
        horizontal_resolution: *mut u32,
        vertical_resolution: *mut u32,
        color_depth: *mut u32,
        refresh_rate: *mut u32,
    ) -> Status,
    set_mode: *const c_void,
    blt: *const c_void,
}

fn console_out_handle() -> Option<Handle> {
    let st = uefi::table::system_table_raw()?.cast::<SystemTable>();
    unsafe { Handle::from_ptr(st.as_ref().stdout_handle) }
}

/// Non-exclusive open, like `HandleProtocol`: the console driver keeps the adapter.
fn open_on<P: ProtocolPointer + ?Sized>(handle: Handle) -> Option<ScopedProtocol<P>> {
    let params = OpenProtocolParams {
        handle,
        agent: boot::image_handle(),
        controller: None,
    };
    unsafe { boot::open_protocol::<P>(params, OpenProtocolAttributes::GetProtocol) }.ok()
}

/// Console-out handle first, then whichever handle carries the protocol.
fn find<P: ProtocolPointer + ?Sized>() -> Option<ScopedProtocol<P>> {
    if let Some(p) = console_out_handle().and_then(open_on::<P>) {
        return Some(p);
    }
    let handle = boot::get_handle_for_protocol::<P>().ok()?;
    open_on::<P>(handle)
}

pub struct UefiGraphics;

impl GraphicsServices for UefiGraphics {
    fn current_mode(&mut self) -> Option<VideoMode> {
        let mut gop = find::<GraphicsOutput>()?;
        let info = gop.current_mode_info();
        let (width, height) = info.resolution();
        let pixel_format = match info.pixel_format() {
            GopPixelFormat::Bgr => PixelFormat::BgrReserved8,
            GopPixelFormat::Rgb => PixelFormat::RgbReserved8,
            _ => PixelFormat::Other,
        };

        // BltOnly adapters have no framebuffer to hand out.
        let (base, size) = if info.pixel_format() == GopPixelFormat::BltOnly {
            (0, 0)
        } else {
            let mut fb = gop.frame_buffer();
            (fb.as_mut_ptr() as u64, fb.size() as u64)
        };

        Some(VideoMode {
            horizontal_resolution: width as u32,
            vertical_resolution: height as u32,
            pixel_format,
            pixels_per_scan_line: info.stride() as u32,
            framebuffer_base: base,
            framebuffer_size_bytes: size,
        })
    }

    fn legacy_resolution(&mut self) -> Option<(u32, u32)> {
        let mut uga = find::<UgaDraw>()?;
        let this: *mut UgaDraw = &mut *uga;
        let (mut width, mut height, mut depth, mut refresh) = (0u32, 0u32, 0u32, 0u32);
        let status = unsafe { ((*this).get_mode)(this, &mut width, &mut height, &mut depth, &mut refresh) };
        if status.is_error() {
            warn!("[video] unable to get current UGA mode: {:?}", status);
            return None;
        }
        debug!("[video] UGA depth={} refresh={}", depth, refresh);
        Some((width, height))
    }
}
