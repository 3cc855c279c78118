//! UEFI-backed implementations of the shim's platform traits.

pub mod graphics;
pub mod legacy_region;
pub mod memory;
pub mod mtrr;

use crate::installer::Platform;
use crate::protect::ProtectionController;

use self::graphics::UefiGraphics;
use self::legacy_region::{LegacyRegion2Protocol, LegacyRegionLock, LegacyRegionProtocol};
use self::memory::{IdentityMemory, UefiPages};
use self::mtrr::MtrrLock;

pub struct UefiPlatform {
    memory: IdentityMemory,
    graphics: UefiGraphics,
    pages: UefiPages,
    legacy_region: LegacyRegionLock<LegacyRegionProtocol>,
    legacy_region2: LegacyRegionLock<LegacyRegion2Protocol>,
    mtrr: MtrrLock,
}

impl UefiPlatform {
    /// # Safety
    /// Boot services must be active; see [`IdentityMemory::new`].
    pub unsafe fn new() -> Self {
        Self {
            memory: IdentityMemory::new(),
            graphics: UefiGraphics,
            pages: UefiPages,
            legacy_region: LegacyRegionLock::new(),
            legacy_region2: LegacyRegionLock::new(),
            mtrr: MtrrLock,
        }
    }

    /// Lock/unlock mechanisms in their fixed order of preference.
    pub fn platform(&mut self) -> Platform<'_> {
        Platform {
            memory: &mut self.memory,
            graphics: &mut self.graphics,
            pages: &mut self.pages,
            protection: ProtectionController::new()
                .with(&mut self.legacy_region)
                .with(&mut self.legacy_region2)
                .with(&mut self.mtrr),
        }
    }
}
