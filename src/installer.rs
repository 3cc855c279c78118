//! Install sequence: check, unlock, claim, copy, encode, lock, patch.
//!
//! Steps run strictly in order and are never retried. The IVT page is
//! claimed before any vector is written, and the ROM is unlocked before any
//! byte of it is touched. Locking afterwards is best-effort.

use core::fmt;

use heapless::Vec as HVec;
use log::{error, info, warn};

use crate::adapter::{AdapterLocator, AdapterPresence, GraphicsServices};
use crate::config::{INT10H_VECTOR, ROM_REGION};
use crate::ivt::{ClaimError, IvtController, IvtEntry, PageAllocator};
use crate::phys::{FarPtr, PhysMemory};
use crate::protect::{MemoryRegion, Protection, ProtectionController, ProtectionError};
use crate::rom::RomImage;
use crate::vbe::{self, CodecError, TABLES_SIZE};

/// Per-boot state threaded through detection and installation.
#[derive(Debug, Default)]
pub struct ShimContext {
    pub adapter: AdapterLocator,
}

impl ShimContext {
    pub const fn new() -> Self {
        Self {
            adapter: AdapterLocator::new(),
        }
    }
}

/// Everything the installer needs from the firmware.
pub struct Platform<'a> {
    pub memory: &'a mut dyn PhysMemory,
    pub graphics: &'a mut dyn GraphicsServices,
    pub pages: &'a mut dyn PageAllocator,
    pub protection: ProtectionController<'a>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstallStep {
    CheckExisting,
    Unlock,
    ClaimIvt,
    CopyHandlerStub,
    EncodeVbeTables,
    Lock,
    PatchVector,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstallFailure {
    CannotUnlock(ProtectionError),
    CannotClaimIvt(ClaimError),
    HandlerTooLarge { len: usize, capacity: usize },
    CannotEncode(CodecError),
}

impl InstallFailure {
    /// The step the failure surfaced in. A missing adapter is noticed while
    /// checking for an existing handler, before the ROM is touched.
    pub fn step(&self) -> InstallStep {
        match self {
            InstallFailure::CannotEncode(CodecError::NoAdapter) => InstallStep::CheckExisting,
            InstallFailure::CannotUnlock(_) => InstallStep::Unlock,
            InstallFailure::CannotClaimIvt(_) => InstallStep::ClaimIvt,
            InstallFailure::HandlerTooLarge { .. } => InstallStep::CopyHandlerStub,
            InstallFailure::CannotEncode(_) => InstallStep::EncodeVbeTables,
        }
    }
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallFailure::CannotUnlock(e) => write!(f, "cannot unlock VGA ROM: {e}"),
            InstallFailure::CannotClaimIvt(e) => write!(f, "cannot claim IVT: {e}"),
            InstallFailure::HandlerTooLarge { len, capacity } => {
                write!(f, "handler is {len} bytes, only {capacity} fit after the VBE tables")
            }
            InstallFailure::CannotEncode(e) => write!(f, "cannot fill in VESA information: {e}"),
        }
    }
}

impl core::error::Error for InstallFailure {}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstallOutcome {
    /// Int 10h now points at the shim. `locked` is false when the ROM could
    /// not be made read-only again.
    Installed { vector: IvtEntry, locked: bool },
    AlreadyInstalled,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum InstallState {
    Start,
    CheckExisting,
    Unlock,
    ClaimIvt,
    CopyHandlerStub,
    EncodeVbeTables,
    Lock { handler: u64 },
    PatchVector { handler: u64, locked: bool },
    Done(InstallOutcome),
    Failed(InstallFailure),
}

pub struct ShimInstaller<'a> {
    platform: Platform<'a>,
    handler: &'a [u8],
    rom: MemoryRegion,
    steps: HVec<InstallStep, 8>,
}

impl<'a> ShimInstaller<'a> {
    pub fn new(platform: Platform<'a>, handler: &'a [u8]) -> Self {
        Self {
            platform,
            handler,
            rom: ROM_REGION,
            steps: HVec::new(),
        }
    }

    /// Steps attempted by the last `run`, in order.
    pub fn steps(&self) -> &[InstallStep] {
        &self.steps
    }

    pub fn run(&mut self, ctx: &mut ShimContext) -> Result<InstallOutcome, InstallFailure> {
        self.steps.clear();
        let mut state = InstallState::Start;
        loop {
            state = match state {
                InstallState::Done(outcome) => return Ok(outcome),
                InstallState::Failed(failure) => {
                    error!("[install] {} failed: {}", step_name(failure.step()), failure);
                    return Err(failure);
                }
                s => self.advance(s, ctx),
            };
        }
    }

    fn enter(&mut self, step: InstallStep) {
        // Seven steps, eight slots.
        let _ = self.steps.push(step);
    }

    fn ivt(&mut self) -> IvtController<'_> {
        IvtController::new(&mut *self.platform.memory, &mut *self.platform.pages)
    }

    fn rom_image(&mut self) -> RomImage<'_> {
        RomImage::new(&mut *self.platform.memory, self.rom)
    }

    fn advance(&mut self, state: InstallState, ctx: &mut ShimContext) -> InstallState {
        match state {
            InstallState::Start => InstallState::CheckExisting,

            InstallState::CheckExisting => {
                self.enter(InstallStep::CheckExisting);
                let rom = self.rom;
                if self.ivt().has_handler_installed(rom) {
                    info!("[install] int 10h already has a handler, you should be all set");
                    return InstallState::Done(InstallOutcome::AlreadyInstalled);
                }
                let (presence, mode) = ctx.adapter.detect(&mut *self.platform.graphics);
                if presence != AdapterPresence::Found {
                    return InstallState::Failed(InstallFailure::CannotEncode(
                        CodecError::NoAdapter,
                    ));
                }
                mode.log();
                InstallState::Unlock
            }

            InstallState::Unlock => {
                self.enter(InstallStep::Unlock);
                match self.platform.protection.set_protection(
                    &mut *self.platform.memory,
                    self.rom,
                    Protection::Writable,
                ) {
                    Ok(()) => InstallState::ClaimIvt,
                    Err(e) => InstallState::Failed(InstallFailure::CannotUnlock(e)),
                }
            }

            InstallState::ClaimIvt => {
                self.enter(InstallStep::ClaimIvt);
                match self.ivt().claim_page() {
                    Ok(()) => InstallState::CopyHandlerStub,
                    Err(e) => InstallState::Failed(InstallFailure::CannotClaimIvt(e)),
                }
            }

            InstallState::CopyHandlerStub => {
                self.enter(InstallStep::CopyHandlerStub);
                let handler = self.handler;
                let mut rom = self.rom_image();
                rom.zero();
                match rom.write(TABLES_SIZE as u32, handler) {
                    Ok(()) => InstallState::EncodeVbeTables,
                    Err(_) => InstallState::Failed(InstallFailure::HandlerTooLarge {
                        len: handler.len(),
                        capacity: rom.size() as usize - TABLES_SIZE,
                    }),
                }
            }

            InstallState::EncodeVbeTables => {
                self.enter(InstallStep::EncodeVbeTables);
                let (presence, mode) = ctx.adapter.detect(&mut *self.platform.graphics);
                match vbe::encode(presence, &mode, &mut self.rom_image()) {
                    Ok(handler) => {
                        info!("[install] int 10h handler address = 0x{:x}", handler);
                        InstallState::Lock { handler }
                    }
                    Err(e) => InstallState::Failed(InstallFailure::CannotEncode(e)),
                }
            }

            InstallState::Lock { handler } => {
                self.enter(InstallStep::Lock);
                let locked = match self.platform.protection.set_protection(
                    &mut *self.platform.memory,
                    self.rom,
                    Protection::Locked,
                ) {
                    Ok(()) => true,
                    Err(_) => {
                        warn!(
                            "[install] unable to lock VGA ROM memory at 0x{:x} but this is not essential",
                            self.rom.base
                        );
                        false
                    }
                };
                InstallState::PatchVector { handler, locked }
            }

            InstallState::PatchVector { handler, locked } => {
                self.enter(InstallStep::PatchVector);
                let vector = FarPtr::within(self.rom.base, handler);
                self.ivt().write_vector(INT10H_VECTOR, vector);
                info!("[install] int 10h handler installed at {}", vector);
                InstallState::Done(InstallOutcome::Installed { vector, locked })
            }

            terminal @ (InstallState::Done(_) | InstallState::Failed(_)) => terminal,
        }
    }
}

fn step_name(step: InstallStep) -> &'static str {
    match step {
        InstallStep::CheckExisting => "check-existing",
        InstallStep::Unlock => "unlock",
        InstallStep::ClaimIvt => "claim-ivt",
        InstallStep::CopyHandlerStub => "copy-handler",
        InstallStep::EncodeVbeTables => "encode-vbe",
        InstallStep::Lock => "lock",
        InstallStep::PatchVector => "patch-vector",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{PixelFormat, VideoMode};
    use crate::fake::{FakeGraphics, FakeMemory, FakePages, StubStrategy};
    use crate::protect::can_write_at;

    const HANDLER: &[u8] = &[0xB8, 0x4F, 0x01, 0xCF];

    fn full_hd() -> VideoMode {
        VideoMode {
            horizontal_resolution: 1920,
            vertical_resolution: 1080,
            pixel_format: PixelFormat::BgrReserved8,
            pixels_per_scan_line: 1920,
            framebuffer_base: 0x8000_0000,
            framebuffer_size_bytes: 1920 * 1080 * 4,
        }
    }

    fn rom_bytes(mem: &FakeMemory, offset: u64, len: usize) -> Vec<u8> {
        (0..len as u64).map(|i| mem.byte(ROM_REGION.base + offset + i)).collect()
    }

    #[test]
    fn installs_on_a_locked_rom() {
        let mut mem = FakeMemory::new();
        mem.set_rom_locked(true);
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut region = StubStrategy::effective("legacy-region", &mem);
        let mut ctx = ShimContext::new();

        let mut installer = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region),
            },
            HANDLER,
        );
        let outcome = installer.run(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            InstallOutcome::Installed {
                vector: IvtEntry::new(0xC000, 0x0200),
                locked: true
            }
        );
        assert_eq!(
            installer.steps(),
            [
                InstallStep::CheckExisting,
                InstallStep::Unlock,
                InstallStep::ClaimIvt,
                InstallStep::CopyHandlerStub,
                InstallStep::EncodeVbeTables,
                InstallStep::Lock,
                InstallStep::PatchVector,
            ]
        );
        drop(installer);

        assert_eq!(region.calls(), 2);
        assert!(mem.rom_locked());
        assert_eq!(pages.claimed, [(0, 1)]);
        assert_eq!(rom_bytes(&mem, 0, 4), b"VESA");
        assert_eq!(rom_bytes(&mem, 512, HANDLER.len()), HANDLER);
        assert_eq!(rom_bytes(&mem, 512 + HANDLER.len() as u64, 16), [0u8; 16]);
        assert_eq!(
            [mem.byte(0x40), mem.byte(0x41), mem.byte(0x42), mem.byte(0x43)],
            [0x00, 0x02, 0x00, 0xC0]
        );
        assert_eq!(ctx.adapter.presence(), AdapterPresence::Found);
    }

    #[test]
    fn second_run_short_circuits_and_changes_nothing() {
        let mut mem = FakeMemory::new();
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut region = StubStrategy::effective("legacy-region", &mem);
        let mut ctx = ShimContext::new();

        let mut installer = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region),
            },
            HANDLER,
        );
        assert!(matches!(
            installer.run(&mut ctx),
            Ok(InstallOutcome::Installed { .. })
        ));
        let after_first = {
            let mut buf = vec![0u8; 0x10_0000];
            installer.platform.memory.read_bytes(0, &mut buf);
            buf
        };
        assert_eq!(installer.run(&mut ctx), Ok(InstallOutcome::AlreadyInstalled));
        assert_eq!(installer.steps(), [InstallStep::CheckExisting]);
        drop(installer);

        assert!(mem.snapshot() == after_first);
        assert_eq!(region.calls(), 1);
        assert_eq!(pages.claimed.len(), 1);
    }

    #[test]
    fn existing_handler_means_no_protection_calls_or_ivt_writes() {
        let mut mem = FakeMemory::new();
        mem.poke_vector(0x10, 0xC000, 0x0003);
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut region = StubStrategy::effective("legacy-region", &mem);
        let mut mtrr = StubStrategy::effective("mtrr", &mem);
        let mut ctx = ShimContext::new();

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region).with(&mut mtrr),
            },
            HANDLER,
        )
        .run(&mut ctx);

        assert_eq!(outcome, Ok(InstallOutcome::AlreadyInstalled));
        assert_eq!(region.calls() + mtrr.calls(), 0);
        assert_eq!(mem.ivt_writes(), 0);
        assert!(pages.claimed.is_empty());
        assert_eq!(gfx.primary_queries, 0);
    }

    #[test]
    fn no_adapter_fails_before_touching_anything() {
        let mut mem = FakeMemory::new();
        mem.set_rom_locked(true);
        let before = mem.snapshot();
        let mut gfx = FakeGraphics::none();
        let mut pages = FakePages::new();
        let mut region = StubStrategy::effective("legacy-region", &mem);
        let mut ctx = ShimContext::new();

        let mut installer = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region),
            },
            HANDLER,
        );
        let failure = installer.run(&mut ctx).unwrap_err();
        assert_eq!(failure, InstallFailure::CannotEncode(CodecError::NoAdapter));
        assert_eq!(installer.steps(), [InstallStep::CheckExisting]);
        assert_eq!(installer.steps().last(), Some(&failure.step()));
        drop(installer);

        assert_eq!(region.calls(), 0);
        assert_eq!(mem.ivt_writes(), 0);
        assert!(pages.claimed.is_empty());
        assert!(mem.rom_locked());
        assert!(mem.snapshot() == before);
    }

    #[test]
    fn lying_unlockers_fall_through_to_the_range_mechanism() {
        let mut mem = FakeMemory::new();
        mem.set_rom_locked(true);
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut region = StubStrategy::lying("legacy-region");
        let mut region2 = StubStrategy::lying("legacy-region2");
        let mut mtrr = StubStrategy::effective("mtrr", &mem);
        let mut ctx = ShimContext::new();

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new()
                    .with(&mut region)
                    .with(&mut region2)
                    .with(&mut mtrr),
            },
            HANDLER,
        )
        .run(&mut ctx);

        assert!(matches!(
            outcome,
            Ok(InstallOutcome::Installed { locked: true, .. })
        ));
        // unlock and lock each walk the whole chain
        assert_eq!((region.calls(), region2.calls(), mtrr.calls()), (2, 2, 2));
        assert_eq!(rom_bytes(&mem, 0, 4), b"VESA");
    }

    #[test]
    fn unlock_failure_is_fatal() {
        let mut mem = FakeMemory::new();
        mem.set_rom_locked(true);
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut region = StubStrategy::lying("legacy-region");
        let mut ctx = ShimContext::new();

        let mut installer = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region),
            },
            HANDLER,
        );
        assert_eq!(
            installer.run(&mut ctx),
            Err(InstallFailure::CannotUnlock(
                ProtectionError::NoMechanismAvailable
            ))
        );
        assert_eq!(
            installer.steps(),
            [InstallStep::CheckExisting, InstallStep::Unlock]
        );
        drop(installer);
        assert!(pages.claimed.is_empty());
        assert_eq!(mem.ivt_writes(), 0);
    }

    #[test]
    fn claim_failure_is_fatal_and_leaves_vector_alone() {
        let mut mem = FakeMemory::new();
        mem.poke_vector(0x10, 0xF000, 0xF065);
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::taken();
        let mut ctx = ShimContext::new();

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new(),
            },
            HANDLER,
        )
        .run(&mut ctx);

        assert_eq!(
            outcome,
            Err(InstallFailure::CannotClaimIvt(ClaimError::AddressUnavailable))
        );
        assert_eq!(mem.ivt_writes(), 0);
        assert_eq!([mem.byte(0x42), mem.byte(0x43)], [0x00, 0xF0]);
    }

    #[test]
    fn encode_failure_skips_lock_and_patch() {
        let mut mem = FakeMemory::new();
        mem.set_rom_locked(true);
        let mut mode = full_hd();
        mode.pixel_format = PixelFormat::Other;
        let mut gfx = FakeGraphics::primary(mode);
        let mut pages = FakePages::new();
        let mut region = StubStrategy::effective("legacy-region", &mem);
        let mut ctx = ShimContext::new();

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region),
            },
            HANDLER,
        )
        .run(&mut ctx);

        assert_eq!(
            outcome,
            Err(InstallFailure::CannotEncode(
                CodecError::UnsupportedPixelFormat(PixelFormat::Other)
            ))
        );
        assert_eq!(region.calls(), 1);
        assert!(!mem.rom_locked());
        assert_eq!(mem.byte(0x42), 0);
        assert_eq!(gfx.primary_queries, 1);
    }

    #[test]
    fn lock_failure_is_not_fatal() {
        let mut mem = FakeMemory::new();
        mem.set_rom_locked(true);
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut region = StubStrategy::unlock_only("legacy-region", &mem);
        let mut ctx = ShimContext::new();

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new().with(&mut region),
            },
            HANDLER,
        )
        .run(&mut ctx);

        assert_eq!(
            outcome,
            Ok(InstallOutcome::Installed {
                vector: IvtEntry::new(0xC000, 0x0200),
                locked: false
            })
        );
        assert!(can_write_at(&mut mem, ROM_REGION.base));
        assert_eq!([mem.byte(0x42), mem.byte(0x43)], [0x00, 0xC0]);
    }

    #[test]
    fn oversized_handler_is_rejected() {
        let mut mem = FakeMemory::new();
        let mut gfx = FakeGraphics::primary(full_hd());
        let mut pages = FakePages::new();
        let mut ctx = ShimContext::new();
        let big = vec![0x90u8; ROM_REGION.length as usize - TABLES_SIZE + 1];

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new(),
            },
            &big,
        )
        .run(&mut ctx);

        let failure = outcome.unwrap_err();
        assert_eq!(
            failure,
            InstallFailure::HandlerTooLarge {
                len: big.len(),
                capacity: big.len() - 1
            }
        );
        assert_eq!(failure.step(), InstallStep::CopyHandlerStub);
        assert_eq!(mem.ivt_writes(), 0);
    }

    #[test]
    fn legacy_adapter_with_small_screen_is_rejected_at_encode() {
        let mut mem = FakeMemory::new();
        let mut gfx = FakeGraphics::legacy(800, 600);
        let mut pages = FakePages::new();
        let mut ctx = ShimContext::new();

        let outcome = ShimInstaller::new(
            Platform {
                memory: &mut mem,
                graphics: &mut gfx,
                pages: &mut pages,
                protection: ProtectionController::new(),
            },
            HANDLER,
        )
        .run(&mut ctx);

        assert_eq!(
            outcome,
            Err(InstallFailure::CannotEncode(CodecError::ResolutionTooSmall {
                width: 800,
                height: 600
            }))
        );
    }
}
