//! Machine types exposed to the surrounding emulator.

use raspi_constants::{BCM283X_NCPUS, GIB};

use crate::board::BoardVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockInterface {
    Sd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineClass {
    pub version: BoardVersion,
    pub name: &'static str,
    pub desc: &'static str,
    pub default_cpus: u32,
    pub min_cpus: u32,
    pub max_cpus: u32,
    pub default_ram_size: u64,
    pub block_default_type: BlockInterface,
    pub no_parallel: bool,
    pub no_floppy: bool,
    pub no_cdrom: bool,
    pub ignore_memory_transaction_failures: bool,
}

impl MachineClass {
    pub fn for_version(version: BoardVersion) -> Self {
        let desc = match version {
            BoardVersion::Raspi2 => "Raspberry Pi 2B",
            BoardVersion::Raspi3 => "Raspberry Pi 3B",
            BoardVersion::Raspi4 => "Raspberry Pi 4B",
        };
        Self {
            version,
            name: version.name(),
            desc,
            default_cpus: BCM283X_NCPUS,
            min_cpus: BCM283X_NCPUS,
            max_cpus: BCM283X_NCPUS,
            default_ram_size: GIB,
            block_default_type: BlockInterface::Sd,
            no_parallel: true,
            no_floppy: true,
            no_cdrom: true,
            // Pi 2 guests touch unimplemented devices during boot.
            ignore_memory_transaction_failures: version == BoardVersion::Raspi2,
        }
    }

    pub fn find(name: &str) -> Option<Self> {
        BoardVersion::ALL
            .into_iter()
            .find(|version| version.name() == name)
            .map(Self::for_version)
    }
}

pub fn machine_classes() -> Vec<MachineClass> {
    BoardVersion::ALL
        .into_iter()
        .map(MachineClass::for_version)
        .collect()
}
