//! System-on-chip container interface and a BCM283x stand-in.
//!
//! The board only configures the SoC through a handful of properties, realizes it, then asks it
//! for its SD bus and its VideoCore carve-out. Peripheral models stay behind [`Soc`].

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use raspi_constants::{BCM283X_NCPUS, VCRAM_SIZE_DEFAULT};
use thiserror::Error;

use crate::board::Chip;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocError {
    #[error("{soc}: already realized")]
    AlreadyRealized { soc: &'static str },

    #[error("{soc}: no RAM region configured")]
    MissingRam { soc: &'static str },

    #[error("{soc}: enabled-cpus={count} is outside 1..={max}")]
    InvalidCpuCount {
        soc: &'static str,
        count: u32,
        max: u32,
    },

    #[error("{soc}: vcram-size 0x{vcram_size:x} does not fit in RAM of 0x{ram_size:x} bytes")]
    VcramTooLarge {
        soc: &'static str,
        vcram_size: u64,
        ram_size: u64,
    },

    #[error("{bus}: a card is already attached")]
    BusOccupied { bus: &'static str },
}

pub trait Soc {
    fn type_name(&self) -> &'static str;

    fn set_ram_size(&mut self, ram_size: u64);

    fn set_enabled_cpus(&mut self, count: u32);

    fn set_board_rev(&mut self, board_rev: u32);

    fn realize(&mut self) -> Result<(), SocError>;

    /// The SD host controller bus; only available once realized.
    fn sd_bus_mut(&mut self) -> Option<&mut SdBus>;

    /// Bytes at the top of RAM reserved for the VideoCore.
    fn vcram_size(&self) -> u64;
}

/// Backing image of an SD card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdImage {
    pub path: PathBuf,
    pub len: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdCard {
    image: Option<SdImage>,
}

impl SdCard {
    /// A card slot with no medium.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_image(path: &Path) -> io::Result<Self> {
        let len = File::open(path)?.metadata()?.len();
        Ok(Self {
            image: Some(SdImage {
                path: path.to_path_buf(),
                len,
            }),
        })
    }

    pub fn image(&self) -> Option<&SdImage> {
        self.image.as_ref()
    }

    pub fn is_inserted(&self) -> bool {
        self.image.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdBus {
    name: &'static str,
    card: Option<SdCard>,
}

impl SdBus {
    pub const NAME: &'static str = "sd-bus";

    pub fn new() -> Self {
        Self {
            name: Self::NAME,
            card: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn attach(&mut self, card: SdCard) -> Result<(), SocError> {
        if self.card.is_some() {
            return Err(SocError::BusOccupied { bus: self.name });
        }
        self.card = Some(card);
        Ok(())
    }

    pub fn card(&self) -> Option<&SdCard> {
        self.card.as_ref()
    }
}

impl Default for SdBus {
    fn default() -> Self {
        Self::new()
    }
}

/// BCM2836 / BCM2837 / BCM2838 container.
///
/// Records the configuration the board hands it and exposes an SD bus after realize.
#[derive(Debug, Clone)]
pub struct Bcm283x {
    type_name: &'static str,
    ram_size: Option<u64>,
    enabled_cpus: u32,
    board_rev: u32,
    vcram_size: u64,
    has_sd_bus: bool,
    sd_bus: Option<SdBus>,
    realized: bool,
}

impl Bcm283x {
    pub fn new(chip: Chip) -> Self {
        Self {
            type_name: chip.soc_type(),
            ram_size: None,
            enabled_cpus: BCM283X_NCPUS,
            board_rev: 0,
            vcram_size: VCRAM_SIZE_DEFAULT,
            has_sd_bus: true,
            sd_bus: None,
            realized: false,
        }
    }

    pub fn with_vcram_size(mut self, vcram_size: u64) -> Self {
        self.vcram_size = vcram_size;
        self
    }

    /// Builds the container without an SD host controller.
    pub fn without_sd_bus(mut self) -> Self {
        self.has_sd_bus = false;
        self
    }

    pub fn ram_size(&self) -> Option<u64> {
        self.ram_size
    }

    pub fn enabled_cpus(&self) -> u32 {
        self.enabled_cpus
    }

    pub fn board_rev(&self) -> u32 {
        self.board_rev
    }

    pub fn is_realized(&self) -> bool {
        self.realized
    }

    pub fn sd_bus(&self) -> Option<&SdBus> {
        self.sd_bus.as_ref()
    }
}

impl Soc for Bcm283x {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn set_ram_size(&mut self, ram_size: u64) {
        self.ram_size = Some(ram_size);
    }

    fn set_enabled_cpus(&mut self, count: u32) {
        self.enabled_cpus = count;
    }

    fn set_board_rev(&mut self, board_rev: u32) {
        self.board_rev = board_rev;
    }

    fn realize(&mut self) -> Result<(), SocError> {
        let soc = self.type_name;
        if self.realized {
            return Err(SocError::AlreadyRealized { soc });
        }
        let ram_size = self.ram_size.ok_or(SocError::MissingRam { soc })?;
        if !(1..=BCM283X_NCPUS).contains(&self.enabled_cpus) {
            return Err(SocError::InvalidCpuCount {
                soc,
                count: self.enabled_cpus,
                max: BCM283X_NCPUS,
            });
        }
        if self.vcram_size >= ram_size {
            return Err(SocError::VcramTooLarge {
                soc,
                vcram_size: self.vcram_size,
                ram_size,
            });
        }

        if self.has_sd_bus {
            self.sd_bus = Some(SdBus::new());
        }
        self.realized = true;
        tracing::debug!(
            "{soc} realized: ram=0x{ram_size:x} cpus={} board-rev=0x{:x}",
            self.enabled_cpus,
            self.board_rev
        );
        Ok(())
    }

    fn sd_bus_mut(&mut self) -> Option<&mut SdBus> {
        self.sd_bus.as_mut()
    }

    fn vcram_size(&self) -> u64 {
        self.vcram_size
    }
}
