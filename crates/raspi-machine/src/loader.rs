//! Kernel loader seam and the ARM direct-boot implementation.

use std::path::PathBuf;

use memory::{load_image_targphys, RomSet};

use crate::boot::{BootDescriptor, BootError};
use crate::cpu::VCpu;

/// Consumes a finished [`BootDescriptor`].
///
/// `load` runs once during construction and registers whatever the board needs in guest memory.
/// `reset_cpu` runs for every core on every reset, after the ROM set has been re-applied.
pub trait KernelLoader {
    fn load(&mut self, boot: &BootDescriptor, rom: &mut RomSet) -> Result<(), BootError>;

    fn reset_cpu(&self, boot: &BootDescriptor, cpu: &mut dyn VCpu);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KernelImage {
    path: PathBuf,
    addr: u64,
}

/// Boots either straight into a firmware image or into a kernel with the board's SMP blobs in
/// place.
#[derive(Debug, Clone, Default)]
pub struct ArmBootLoader {
    kernel: Option<KernelImage>,
    entry: u64,
}

impl ArmBootLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a raw kernel image at `addr` and enters it there.
    pub fn with_kernel(mut self, path: impl Into<PathBuf>, addr: u64) -> Self {
        self.kernel = Some(KernelImage {
            path: path.into(),
            addr,
        });
        self.entry = addr;
        self
    }

    /// Entry point of the primary core on the direct path.
    pub fn entry(&self) -> u64 {
        self.entry
    }
}

impl KernelLoader for ArmBootLoader {
    fn load(&mut self, boot: &BootDescriptor, rom: &mut RomSet) -> Result<(), BootError> {
        if let Some(fw) = boot.firmware {
            // The firmware brings up the secondaries itself.
            tracing::debug!("bypassing kernel boot, entering firmware at 0x{:x}", fw.entry);
            self.entry = fw.entry;
            return Ok(());
        }

        if let Some(kernel) = &self.kernel {
            let max_size = boot.ram_size.saturating_sub(kernel.addr);
            load_image_targphys(&kernel.path, kernel.addr, max_size, rom)
                .map_err(BootError::Kernel)?;
        }

        boot.write_board_setup(rom)?;
        if boot.nb_cpus > 1 {
            boot.write_secondary_boot(rom)?;
        }
        Ok(())
    }

    fn reset_cpu(&self, boot: &BootDescriptor, cpu: &mut dyn VCpu) {
        cpu.reset();

        if let Some(fw) = boot.firmware {
            cpu.set_pc(fw.entry);
            return;
        }

        if cpu.cpu_index() == 0 {
            cpu.set_pc(self.entry);
            cpu.set_reg(0, 0);
            if !cpu.is_aarch64() {
                // 32-bit ABI: r1 holds the machine type.
                cpu.set_reg(1, u64::from(boot.board_id));
            }
        } else if boot.nb_cpus > 1 {
            boot.reset_secondary(cpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::{BoardSetup, FirmwareEntry, SecondaryBoot};
    use crate::cpu::ArmCpu;
    use crate::smpboot::{
        TrampolineKind, BOARD_SETUP_ROM_NAME, SMPBOOT_ROM_NAME, SPINTABLES_ROM_NAME,
    };

    fn raspi2_boot() -> BootDescriptor {
        BootDescriptor {
            board_id: 0xc43,
            ram_size: 0x3c00_0000,
            nb_cpus: 4,
            board_setup: Some(BoardSetup {
                addr: 0x420,
                secure: true,
            }),
            secure_boot: true,
            secondary_boot: Some(SecondaryBoot {
                smp_loader_start: 0x300,
                kind: TrampolineKind::ThirtyTwoBit,
            }),
            firmware: None,
        }
    }

    #[test]
    fn direct_boot_writes_setup_and_trampoline() {
        let mut rom = RomSet::new();
        ArmBootLoader::new().load(&raspi2_boot(), &mut rom).unwrap();
        assert!(rom.get(BOARD_SETUP_ROM_NAME).is_some());
        assert_eq!(rom.get(SMPBOOT_ROM_NAME).unwrap().addr(), 0x300);
        assert!(rom.get(SPINTABLES_ROM_NAME).is_none());
    }

    #[test]
    fn single_core_skips_trampoline() {
        let boot = BootDescriptor {
            nb_cpus: 1,
            ..raspi2_boot()
        };
        let mut rom = RomSet::new();
        ArmBootLoader::new().load(&boot, &mut rom).unwrap();
        assert!(rom.get(SMPBOOT_ROM_NAME).is_none());
    }

    #[test]
    fn primary_gets_board_id_in_r1() {
        let boot = raspi2_boot();
        let loader = ArmBootLoader::new().with_kernel("zImage", 0x10000);
        let mut cpu = ArmCpu::new(0, false);
        loader.reset_cpu(&boot, &mut cpu);
        assert_eq!(cpu.pc(), 0x10000);
        assert_eq!(cpu.reg(0), 0);
        assert_eq!(cpu.reg(1), 0xc43);

        let mut secondary = ArmCpu::new(3, false);
        loader.reset_cpu(&boot, &mut secondary);
        assert_eq!(secondary.pc(), 0x300);
    }

    #[test]
    fn firmware_path_starts_every_core_at_entry() {
        let boot = BootDescriptor {
            firmware: Some(FirmwareEntry {
                entry: 0x8000,
                size: 0x100,
            }),
            ..raspi2_boot()
        };
        let mut rom = RomSet::new();
        let mut loader = ArmBootLoader::new();
        loader.load(&boot, &mut rom).unwrap();
        assert!(rom.is_empty());

        for index in 0..4 {
            let mut cpu = ArmCpu::new(index, false);
            loader.reset_cpu(&boot, &mut cpu);
            assert_eq!(cpu.pc(), 0x8000, "cpu {index}");
        }
    }

    #[test]
    fn kernel_image_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Image");
        std::fs::write(&path, [0x55u8; 32]).unwrap();

        let mut rom = RomSet::new();
        ArmBootLoader::new()
            .with_kernel(&path, 0x20_0000)
            .load(&raspi2_boot(), &mut rom)
            .unwrap();
        assert!(rom.blobs().iter().any(|blob| blob.addr() == 0x20_0000));
    }
}
