//! Chipset shadow-RAM control through the legacy region protocols.

use core::ffi::c_void;
use core::marker::PhantomData;

use log::debug;
use uefi::Status;
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams};
use uefi::proto::{ProtocolPointer, unsafe_protocol};

use crate::protect::{MemoryRegion, Protection, ProtectionStrategy};

type RangeFn<T> =
    unsafe extern "efiapi" fn(this: *mut T, start: u32, length: u32, granularity: *mut u32) -> Status;

/// `EFI_LEGACY_REGION_PROTOCOL` (Framework CSM).
#[repr(C)]
#[allow(dead_code)]
#[unsafe_protocol("0fc9013a-0568-4ba9-9b7e-c9c390a6609b")]
pub struct LegacyRegionProtocol {
    decode: unsafe extern "efiapi" fn(this: *mut Self, start: u32, length: u32, on: *mut bool) -> Status,
    lock: RangeFn<Self>,
    boot_lock: RangeFn<Self>,
    unlock: RangeFn<Self>,
}

/// `EFI_LEGACY_REGION2_PROTOCOL` (PI 1.2+).
#[repr(C)]
#[allow(dead_code)]
#[unsafe_protocol("70101eaf-0085-440c-b356-8ee36fef24f0")]
pub struct LegacyRegion2Protocol {
    decode: unsafe extern "efiapi" fn(
        this: *mut Self,
        start: u32,
        length: u32,
        granularity: *mut u32,
        on: *const bool,
    ) -> Status,
    lock: RangeFn<Self>,
    boot_lock: RangeFn<Self>,
    unlock: RangeFn<Self>,
    get_info: unsafe extern "efiapi" fn(
        this: *mut Self,
        descriptor_count: *mut u32,
        descriptor: *mut *mut c_void,
    ) -> Status,
}

/// Lock/unlock entry points shared by both protocol generations.
pub trait RegionLock: ProtocolPointer + Sized {
    const NAME: &'static str;
    fn lock_fn(&self) -> RangeFn<Self>;
    fn unlock_fn(&self) -> RangeFn<Self>;
}

impl RegionLock for LegacyRegionProtocol {
    const NAME: &'static str = "EfiLegacyRegionProtocol";
    fn lock_fn(&self) -> RangeFn<Self> {
        self.lock
    }
    fn unlock_fn(&self) -> RangeFn<Self> {
        self.unlock
    }
}

impl RegionLock for LegacyRegion2Protocol {
    const NAME: &'static str = "EfiLegacyRegion2Protocol";
    fn lock_fn(&self) -> RangeFn<Self> {
        self.lock
    }
    fn unlock_fn(&self) -> RangeFn<Self> {
        self.unlock
    }
}

pub struct LegacyRegionLock<P> {
    _protocol: PhantomData<fn() -> P>,
}

impl<P: RegionLock> LegacyRegionLock<P> {
    pub const fn new() -> Self {
        Self {
            _protocol: PhantomData,
        }
    }
}

impl<P: RegionLock> Default for LegacyRegionLock<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RegionLock> ProtectionStrategy for LegacyRegionLock<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn try_apply(&mut self, region: MemoryRegion, desired: Protection) -> bool {
        let Ok(start) = u32::try_from(region.base) else {
            return false;
        };
        let Ok(handle) = boot::get_handle_for_protocol::<P>() else {
            return false;
        };
        let params = OpenProtocolParams {
            handle,
            agent: boot::image_handle(),
            controller: None,
        };
        let Ok(mut proto) =
            (unsafe { boot::open_protocol::<P>(params, OpenProtocolAttributes::GetProtocol) })
        else {
            return false;
        };

        let this: *mut P = &mut *proto;
        let call = match desired {
            Protection::Writable => proto.unlock_fn(),
            Protection::Locked => proto.lock_fn(),
        };
        let mut granularity = 0u32;
        let status = unsafe { call(this, start, region.length, &mut granularity) };
        debug!(
            "[protect] {} returned {:?}, granularity 0x{:x}",
            P::NAME,
            status,
            granularity
        );
        true
    }
}
