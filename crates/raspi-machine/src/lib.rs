//! Raspberry Pi 2B / 3B / 4B board bring-up.
//!
//! [`Machine::new`] turns a [`MachineConfig`] into a board that is ready to run: it validates the
//! memory configuration, assigns the hardware identity (legacy board id plus packed revision
//! code), realizes the SoC, plugs in the SD card, installs the secondary-core and secure-monitor
//! boot blobs and hands a [`BootDescriptor`] to the kernel loader.
//!
//! Instruction execution and peripheral models are outside this crate. Cores, the SoC and the
//! loader are reached through the [`VCpu`], [`Soc`] and [`KernelLoader`] traits, with small
//! in-tree implementations ([`ArmCpu`], [`Bcm283x`], [`ArmBootLoader`]) so the whole bring-up
//! path can be exercised on its own.
#![forbid(unsafe_code)]

pub mod board;
pub mod boot;
pub mod cpu;
pub mod loader;
pub mod registry;
pub mod smpboot;
pub mod soc;

use std::fmt;
use std::path::PathBuf;

use memory::{GuestMemoryError, RomSet, SparseMemory};
use raspi_constants::GIB;

pub use board::{
    decode_board_rev, encode_board_rev, validate_ram_size, BoardInfo, BoardVersion, RamSizeError,
};
pub use boot::{setup_boot, BootDescriptor, BootError};
pub use cpu::{ArmCpu, VCpu};
pub use loader::{ArmBootLoader, KernelLoader};
pub use registry::{machine_classes, MachineClass};
pub use smpboot::TrampolineKind;
pub use soc::{Bcm283x, SdBus, SdCard, Soc, SocError};

/// Configuration for a [`Machine`].
///
/// Use struct update syntax to override individual fields:
///
/// ```
/// use raspi_machine::{BoardVersion, MachineConfig};
///
/// let cfg = MachineConfig {
///     version: BoardVersion::Raspi4,
///     ram_size_bytes: 2 << 30,
///     ..Default::default()
/// };
/// assert_eq!(cfg.cpu_count, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub version: BoardVersion,
    /// Configured guest RAM, including the VideoCore carve-out. Must be a power of two within the
    /// board's limits.
    pub ram_size_bytes: u64,
    pub cpu_count: u32,
    /// Raw firmware image to boot instead of a kernel.
    pub firmware: Option<PathBuf>,
    /// Backing image for the SD card. Without one the slot is left empty.
    pub sd_image: Option<PathBuf>,
}

impl MachineConfig {
    pub fn for_class(class: &MachineClass) -> Self {
        Self {
            version: class.version,
            ram_size_bytes: class.default_ram_size,
            cpu_count: class.default_cpus,
            firmware: None,
            sd_image: None,
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            version: BoardVersion::Raspi3,
            ram_size_bytes: GIB,
            cpu_count: raspi_constants::BCM283X_NCPUS,
            firmware: None,
            sd_image: None,
        }
    }
}

/// The requested machine cannot be built as configured.
#[derive(Debug)]
pub enum ConfigError {
    RamSize(RamSizeError),
    InvalidCpuCount { count: u32, min: u32, max: u32 },
    GuestMemory(GuestMemoryError),
    Soc(SocError),
    MissingSdBus { soc: &'static str },
    SdImage { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RamSize(err) => fmt::Display::fmt(err, f),
            ConfigError::InvalidCpuCount { count, min, max } => {
                write!(f, "invalid cpu_count={count}; this machine supports {min}..={max} cpus")
            }
            ConfigError::GuestMemory(err) => write!(f, "cannot allocate guest RAM: {err}"),
            ConfigError::Soc(err) => write!(f, "SoC setup failed: {err}"),
            ConfigError::MissingSdBus { soc } => {
                write!(f, "{soc} has no sd-bus; cannot attach an SD card")
            }
            ConfigError::SdImage { path, source } => {
                write!(f, "cannot open SD card image {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::RamSize(err) => Some(err),
            ConfigError::GuestMemory(err) => Some(err),
            ConfigError::Soc(err) => Some(err),
            ConfigError::SdImage { source, .. } => Some(source),
            ConfigError::InvalidCpuCount { .. } | ConfigError::MissingSdBus { .. } => None,
        }
    }
}

impl From<RamSizeError> for ConfigError {
    fn from(err: RamSizeError) -> Self {
        ConfigError::RamSize(err)
    }
}

impl From<SocError> for ConfigError {
    fn from(err: SocError) -> Self {
        ConfigError::Soc(err)
    }
}

#[derive(Debug)]
pub enum MachineError {
    Config(ConfigError),
    Boot(BootError),
}

impl MachineError {
    /// Whether the failure happened while writing boot code or images, i.e. after the
    /// configuration was accepted.
    pub fn is_fatal_assembly(&self) -> bool {
        matches!(self, MachineError::Boot(_))
    }
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::Config(err) => fmt::Display::fmt(err, f),
            MachineError::Boot(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for MachineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MachineError::Config(err) => err.source(),
            MachineError::Boot(err) => err.source(),
        }
    }
}

impl From<ConfigError> for MachineError {
    fn from(err: ConfigError) -> Self {
        MachineError::Config(err)
    }
}

impl From<BootError> for MachineError {
    fn from(err: BootError) -> Self {
        MachineError::Boot(err)
    }
}

impl From<RamSizeError> for MachineError {
    fn from(err: RamSizeError) -> Self {
        MachineError::Config(err.into())
    }
}

/// A fully assembled Raspberry Pi board.
pub struct Machine<S: Soc = Bcm283x, L: KernelLoader = ArmBootLoader> {
    cfg: MachineConfig,
    board_rev: u32,
    soc: S,
    loader: L,
    mem: SparseMemory,
    rom: RomSet,
    boot: BootDescriptor,
    cpus: Vec<ArmCpu>,
}

impl Machine {
    /// Builds the stock board for `cfg`: the matching BCM283x and a direct-boot loader.
    pub fn with_defaults(cfg: MachineConfig) -> Result<Self, MachineError> {
        let soc = Bcm283x::new(cfg.version.info().board_rev.chip);
        Self::new(cfg, soc, ArmBootLoader::new())
    }
}

impl<S: Soc, L: KernelLoader> Machine<S, L> {
    pub fn new(cfg: MachineConfig, mut soc: S, mut loader: L) -> Result<Self, MachineError> {
        let version = cfg.version;
        let info = version.info();
        let class = MachineClass::for_version(version);

        if !(class.min_cpus..=class.max_cpus).contains(&cfg.cpu_count) {
            return Err(ConfigError::InvalidCpuCount {
                count: cfg.cpu_count,
                min: class.min_cpus,
                max: class.max_cpus,
            }
            .into());
        }
        validate_ram_size(cfg.ram_size_bytes, version)?;

        let board_rev = encode_board_rev(cfg.ram_size_bytes, version);
        tracing::debug!(
            "{version}: board id 0x{:x}, revision 0x{board_rev:x}",
            info.board_id
        );

        let mem = SparseMemory::new(cfg.ram_size_bytes).map_err(ConfigError::GuestMemory)?;

        soc.set_ram_size(cfg.ram_size_bytes);
        soc.set_enabled_cpus(cfg.cpu_count);
        soc.set_board_rev(board_rev);
        soc.realize().map_err(ConfigError::from)?;

        let card = match &cfg.sd_image {
            Some(path) => SdCard::from_image(path).map_err(|source| ConfigError::SdImage {
                path: path.clone(),
                source,
            })?,
            None => SdCard::empty(),
        };
        let soc_name = soc.type_name();
        let bus = soc
            .sd_bus_mut()
            .ok_or(ConfigError::MissingSdBus { soc: soc_name })?;
        bus.attach(card).map_err(ConfigError::from)?;

        let vcram_size = soc.vcram_size();
        let usable_ram = cfg.ram_size_bytes.saturating_sub(vcram_size);
        tracing::debug!("vcram 0x{vcram_size:x}, usable RAM 0x{usable_ram:x}");

        let mut rom = RomSet::new();
        let boot = setup_boot(
            version,
            info.board_id,
            cfg.cpu_count,
            usable_ram,
            cfg.firmware.as_deref(),
            &mut rom,
        )?;
        loader.load(&boot, &mut rom)?;

        let aarch64 = version.generation() >= 3;
        let cpus = (0..cfg.cpu_count as usize)
            .map(|index| ArmCpu::new(index, aarch64))
            .collect();

        let mut machine = Self {
            cfg,
            board_rev,
            soc,
            loader,
            mem,
            rom,
            boot,
            cpus,
        };
        machine.reset()?;

        tracing::info!(
            "{version} ready: {} cpus, {} RAM, revision 0x{board_rev:x}",
            machine.cfg.cpu_count,
            board::size_to_str(machine.cfg.ram_size_bytes)
        );
        Ok(machine)
    }

    /// Re-applies every ROM blob to guest RAM and puts each core back at its entry point.
    pub fn reset(&mut self) -> Result<(), BootError> {
        self.rom.reset(&mut self.mem)?;
        for cpu in &mut self.cpus {
            self.loader.reset_cpu(&self.boot, cpu);
        }
        Ok(())
    }

    pub fn config(&self) -> &MachineConfig {
        &self.cfg
    }

    pub fn version(&self) -> BoardVersion {
        self.cfg.version
    }

    pub fn board_id(&self) -> u32 {
        self.boot.board_id
    }

    /// Packed revision code handed to the SoC.
    pub fn board_rev(&self) -> u32 {
        self.board_rev
    }

    pub fn boot_info(&self) -> &BootDescriptor {
        &self.boot
    }

    pub fn cpus(&self) -> &[ArmCpu] {
        &self.cpus
    }

    pub fn cpus_mut(&mut self) -> &mut [ArmCpu] {
        &mut self.cpus
    }

    pub fn memory(&self) -> &SparseMemory {
        &self.mem
    }

    /// Writes that land inside a ROM blob are undone by the next [`Machine::reset`].
    pub fn memory_mut(&mut self) -> &mut SparseMemory {
        &mut self.mem
    }

    pub fn rom(&self) -> &RomSet {
        &self.rom
    }

    pub fn soc(&self) -> &S {
        &self.soc
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}
