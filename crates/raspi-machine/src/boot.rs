//! Boot descriptor assembly.

use std::path::{Path, PathBuf};

use memory::{load_image_targphys, ImageLoadError, RomError, RomSet};
use raspi_constants::{BOARDSETUP_ADDR, SMPBOOT_ADDR};
use thiserror::Error;

use crate::board::BoardVersion;
use crate::cpu::VCpu;
use crate::smpboot::{write_secure_board_setup, TrampolineKind};

/// Errors raised while putting boot code and images into place.
///
/// All of these leave the machine half assembled and are fatal.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("could not load firmware {}: {source}", .path.display())]
    FirmwareLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "firmware {} is {size} bytes but only {available} bytes of RAM are available at 0x{addr:x}",
        .path.display()
    )]
    FirmwareTooLarge {
        path: PathBuf,
        size: u64,
        available: u64,
        addr: u64,
    },

    #[error("could not load kernel: {0}")]
    Kernel(#[source] ImageLoadError),

    #[error(transparent)]
    Rom(#[from] RomError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSetup {
    pub addr: u64,
    /// The stub runs in secure mode and drops to non-secure via SMC.
    pub secure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryBoot {
    pub smp_loader_start: u64,
    pub kind: TrampolineKind,
}

/// A firmware image loaded in place of the kernel. All cores enter it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareEntry {
    pub entry: u64,
    pub size: u64,
}

/// Everything the kernel loader needs to know about how this board boots.
///
/// Built once by [`setup_boot`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootDescriptor {
    pub board_id: u32,
    /// Usable RAM, i.e. configured RAM minus the VideoCore carve-out.
    pub ram_size: u64,
    pub nb_cpus: u32,
    pub board_setup: Option<BoardSetup>,
    pub secure_boot: bool,
    pub secondary_boot: Option<SecondaryBoot>,
    pub firmware: Option<FirmwareEntry>,
}

impl BootDescriptor {
    /// Whether the normal kernel boot is bypassed in favour of a firmware image.
    pub fn firmware_loaded(&self) -> bool {
        self.firmware.is_some()
    }

    /// Firmware entry point, if any.
    pub fn entry(&self) -> Option<u64> {
        self.firmware.map(|fw| fw.entry)
    }

    pub fn trampoline(&self) -> Option<TrampolineKind> {
        self.secondary_boot.map(|smp| smp.kind)
    }

    pub fn write_board_setup(&self, rom: &mut RomSet) -> Result<(), RomError> {
        match self.board_setup {
            Some(setup) if setup.secure => write_secure_board_setup(rom, setup.addr),
            _ => Ok(()),
        }
    }

    pub fn write_secondary_boot(&self, rom: &mut RomSet) -> Result<(), RomError> {
        match self.secondary_boot {
            Some(smp) => smp.kind.write(rom, smp.smp_loader_start),
            None => Ok(()),
        }
    }

    /// Points a freshly reset secondary core at the trampoline.
    pub fn reset_secondary(&self, cpu: &mut dyn VCpu) {
        if let Some(smp) = self.secondary_boot {
            cpu.set_pc(smp.smp_loader_start);
        }
    }
}

/// Fills in the boot descriptor for `version`, loading `firmware` into `rom` if one is given.
///
/// `ram_size` is the usable RAM, already reduced by the VideoCore carve-out.
pub fn setup_boot(
    version: BoardVersion,
    board_id: u32,
    nb_cpus: u32,
    ram_size: u64,
    firmware: Option<&Path>,
    rom: &mut RomSet,
) -> Result<BootDescriptor, BootError> {
    let generation = version.generation();

    let mut boot = BootDescriptor {
        board_id,
        ram_size,
        nb_cpus,
        board_setup: None,
        secure_boot: false,
        secondary_boot: None,
        firmware: None,
    };

    if generation <= 2 {
        // The kernel issues an unconditional SMC early on; the stub makes it a no-op.
        boot.board_setup = Some(BoardSetup {
            addr: BOARDSETUP_ADDR,
            secure: true,
        });
        boot.secure_boot = true;
    }

    if generation >= 2 {
        let kind = if generation == 2 {
            TrampolineKind::ThirtyTwoBit
        } else {
            TrampolineKind::SixtyFourBit
        };
        boot.secondary_boot = Some(SecondaryBoot {
            smp_loader_start: SMPBOOT_ADDR,
            kind,
        });
    }

    if let Some(path) = firmware {
        let addr = version.firmware_addr();
        let available = ram_size.saturating_sub(addr);
        let size = load_image_targphys(path, addr, available, rom).map_err(|err| match err {
            ImageLoadError::Io { path, source } => BootError::FirmwareLoad { path, source },
            ImageLoadError::TooLarge { path, size, .. } => BootError::FirmwareTooLarge {
                path,
                size,
                available,
                addr,
            },
            ImageLoadError::Rom(err) => BootError::Rom(err),
        })?;
        tracing::info!(
            "firmware {} loaded at 0x{addr:x} ({size} bytes)",
            path.display()
        );
        boot.firmware = Some(FirmwareEntry {
            entry: addr,
            size: size as u64,
        });
    }

    Ok(boot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::ArmCpu;
    use raspi_constants::{GIB, MIB};

    const USABLE: u64 = GIB - 64 * MIB;

    #[test]
    fn raspi2_gets_secure_setup_and_mailbox_trampoline() {
        let mut rom = RomSet::new();
        let boot = setup_boot(BoardVersion::Raspi2, 0xc43, 4, USABLE, None, &mut rom).unwrap();
        assert_eq!(
            boot.board_setup,
            Some(BoardSetup {
                addr: 0x420,
                secure: true
            })
        );
        assert!(boot.secure_boot);
        assert_eq!(boot.trampoline(), Some(TrampolineKind::ThirtyTwoBit));
        assert!(!boot.firmware_loaded());
        // Nothing is written until the loader asks.
        assert!(rom.is_empty());
    }

    #[test]
    fn later_generations_use_spin_table_without_secure_setup() {
        for version in [BoardVersion::Raspi3, BoardVersion::Raspi4] {
            let mut rom = RomSet::new();
            let boot = setup_boot(version, 0xc44, 4, USABLE, None, &mut rom).unwrap();
            assert_eq!(boot.board_setup, None);
            assert!(!boot.secure_boot);
            assert_eq!(
                boot.secondary_boot,
                Some(SecondaryBoot {
                    smp_loader_start: 0x300,
                    kind: TrampolineKind::SixtyFourBit
                })
            );
        }
    }

    #[test]
    fn reset_secondary_targets_trampoline() {
        let mut rom = RomSet::new();
        let boot = setup_boot(BoardVersion::Raspi3, 0xc44, 4, USABLE, None, &mut rom).unwrap();
        let mut cpu = ArmCpu::new(1, true);
        boot.reset_secondary(&mut cpu);
        assert_eq!(cpu.pc(), 0x300);
    }

    #[test]
    fn firmware_is_loaded_at_generation_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, [0x11u8; 64]).unwrap();

        let mut rom = RomSet::new();
        let boot = setup_boot(
            BoardVersion::Raspi2,
            0xc43,
            4,
            USABLE,
            Some(path.as_path()),
            &mut rom,
        )
        .unwrap();
        assert_eq!(boot.entry(), Some(0x8000));
        assert_eq!(rom.blobs()[0].addr(), 0x8000);

        let mut rom = RomSet::new();
        let boot = setup_boot(
            BoardVersion::Raspi4,
            0xc42,
            4,
            USABLE,
            Some(path.as_path()),
            &mut rom,
        )
        .unwrap();
        assert_eq!(boot.entry(), Some(0x80000));
    }

    #[test]
    fn missing_firmware_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let mut rom = RomSet::new();
        let err = setup_boot(
            BoardVersion::Raspi3,
            0xc44,
            1,
            USABLE,
            Some(path.as_path()),
            &mut rom,
        )
        .unwrap_err();
        assert!(matches!(err, BootError::FirmwareLoad { .. }));
    }
}
