//! Board identity table, RAM validation and revision-code packing.
//!
//! Revision codes follow the "new style" scheme documented at
//! <https://www.raspberrypi.org/documentation/hardware/raspberrypi/revision-codes/>. Linux and the
//! firmware decode them to identify the board, so the field layout must match bit-for-bit.

use std::fmt;
use std::str::FromStr;

use raspi_constants::{FIRMWARE_ADDR_2, FIRMWARE_ADDR_3, GIB, KIB, MIB};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Manufacturer {
    SonyUk = 0,
    Embest = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Chip {
    Bcm2835 = 0,
    Bcm2836 = 1,
    Bcm2837 = 2,
    Bcm2711 = 3,
}

impl Chip {
    /// Type name of the SoC container device for this chip.
    pub const fn soc_type(self) -> &'static str {
        match self {
            Chip::Bcm2835 => "bcm2835",
            Chip::Bcm2836 => "bcm2836",
            Chip::Bcm2837 => "bcm2837",
            Chip::Bcm2711 => "bcm2838",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoardType {
    Pi2B = 0x04,
    Pi3B = 0x08,
    Pi4B = 0x11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoardRevision {
    R1_0 = 0,
    R1_1 = 1,
    R1_2 = 2,
    R1_3 = 3,
}

/// Fields of the revision code that are fixed per board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRev {
    pub board_type: BoardType,
    pub revision: BoardRevision,
    pub chip: Chip,
    pub manufacturer: Manufacturer,
}

/// Static per-model metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    /// Legacy Linux machine id (ATAGS `machine_nr`).
    pub board_id: u32,
    pub board_rev: BoardRev,
    pub ram_size_min: u64,
    pub ram_size_max: u64,
}

const RASPI2_INFO: BoardInfo = BoardInfo {
    board_id: 0xc43,
    board_rev: BoardRev {
        board_type: BoardType::Pi2B,
        revision: BoardRevision::R1_1,
        chip: Chip::Bcm2836,
        manufacturer: Manufacturer::Embest,
    },
    ram_size_min: GIB,
    ram_size_max: GIB,
};

const RASPI3_INFO: BoardInfo = BoardInfo {
    board_id: 0xc44,
    board_rev: BoardRev {
        board_type: BoardType::Pi3B,
        revision: BoardRevision::R1_2,
        chip: Chip::Bcm2837,
        manufacturer: Manufacturer::SonyUk,
    },
    ram_size_min: GIB,
    ram_size_max: GIB,
};

const RASPI4_INFO: BoardInfo = BoardInfo {
    board_id: 0xc42,
    board_rev: BoardRev {
        board_type: BoardType::Pi4B,
        revision: BoardRevision::R1_1,
        chip: Chip::Bcm2711,
        manufacturer: Manufacturer::SonyUk,
    },
    ram_size_min: GIB,
    ram_size_max: 8 * GIB,
};

/// Supported board generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoardVersion {
    Raspi2,
    Raspi3,
    Raspi4,
}

impl BoardVersion {
    pub const ALL: [BoardVersion; 3] = [Self::Raspi2, Self::Raspi3, Self::Raspi4];

    pub const fn generation(self) -> u8 {
        match self {
            Self::Raspi2 => 2,
            Self::Raspi3 => 3,
            Self::Raspi4 => 4,
        }
    }

    pub fn from_generation(generation: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.generation() == generation)
    }

    pub const fn info(self) -> &'static BoardInfo {
        match self {
            Self::Raspi2 => &RASPI2_INFO,
            Self::Raspi3 => &RASPI3_INFO,
            Self::Raspi4 => &RASPI4_INFO,
        }
    }

    /// Machine type name, e.g. `raspi3`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raspi2 => "raspi2",
            Self::Raspi3 => "raspi3",
            Self::Raspi4 => "raspi4",
        }
    }

    /// Where the stock firmware would have loaded `kernel.img`.
    pub const fn firmware_addr(self) -> u64 {
        if self.generation() >= 3 {
            FIRMWARE_ADDR_3
        } else {
            FIRMWARE_ADDR_2
        }
    }
}

impl fmt::Display for BoardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown board {0:?} (expected one of raspi2, raspi3, raspi4)")]
pub struct UnknownBoardError(pub String);

impl FromStr for BoardVersion {
    type Err = UnknownBoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let generation = s.strip_prefix("raspi").unwrap_or(s);
        generation
            .parse::<u8>()
            .ok()
            .and_then(Self::from_generation)
            .ok_or_else(|| UnknownBoardError(s.to_string()))
    }
}

/// Reasons a requested RAM size is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamSizeError {
    TooSmall { requested: u64, minimum: u64 },
    TooLarge { requested: u64, maximum: u64 },
    NotPowerOfTwo { requested: u64 },
}

impl fmt::Display for RamSizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RamSizeError::TooSmall { minimum, .. } => write!(
                f,
                "requested ram size is too small for this machine: minimum is {}",
                size_to_str(minimum)
            ),
            RamSizeError::TooLarge { maximum, .. } => write!(
                f,
                "requested ram size is too large for this machine: maximum is {}",
                size_to_str(maximum)
            ),
            RamSizeError::NotPowerOfTwo { requested } => write!(
                f,
                "requested ram size {} is not a power of 2",
                size_to_str(requested)
            ),
        }
    }
}

impl std::error::Error for RamSizeError {}

/// Checks `ram_size` against the bounds of `version`.
///
/// Bounds are checked before the power-of-two constraint.
pub fn validate_ram_size(ram_size: u64, version: BoardVersion) -> Result<(), RamSizeError> {
    let info = version.info();
    if ram_size < info.ram_size_min {
        return Err(RamSizeError::TooSmall {
            requested: ram_size,
            minimum: info.ram_size_min,
        });
    }
    if ram_size > info.ram_size_max {
        return Err(RamSizeError::TooLarge {
            requested: ram_size,
            maximum: info.ram_size_max,
        });
    }
    if !ram_size.is_power_of_two() {
        return Err(RamSizeError::NotPowerOfTwo {
            requested: ram_size,
        });
    }
    Ok(())
}

const BOARD_REV_RAM_SHIFT: u32 = 20;
const BOARD_REV_MANUFACTURER_SHIFT: u32 = 16;
const BOARD_REV_CHIP_SHIFT: u32 = 12;
const BOARD_REV_TYPE_SHIFT: u32 = 4;
const BOARD_REV_REVISION_SHIFT: u32 = 0;

/// Packs the board revision code.
///
/// `ram_size` is expected to be a validated power of two of at least 1MiB. The RAM field holds
/// `log2(ram_size / 1MiB)`.
pub fn encode_board_rev(ram_size: u64, version: BoardVersion) -> u32 {
    let rev = version.info().board_rev;
    let ram_log2 = (ram_size / MIB).checked_ilog2().unwrap_or(0);

    (ram_log2 << BOARD_REV_RAM_SHIFT)
        | (u32::from(rev.manufacturer as u8) << BOARD_REV_MANUFACTURER_SHIFT)
        | (u32::from(rev.chip as u8) << BOARD_REV_CHIP_SHIFT)
        | (u32::from(rev.board_type as u8) << BOARD_REV_TYPE_SHIFT)
        | (u32::from(rev.revision as u8) << BOARD_REV_REVISION_SHIFT)
}

/// Raw fields of a packed revision code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRevFields {
    pub ram_log2_mib: u8,
    pub manufacturer: u8,
    pub chip: u8,
    pub board_type: u8,
    pub revision: u8,
}

impl BoardRevFields {
    pub fn ram_size(&self) -> u64 {
        MIB << self.ram_log2_mib
    }
}

pub fn decode_board_rev(code: u32) -> BoardRevFields {
    BoardRevFields {
        ram_log2_mib: ((code >> BOARD_REV_RAM_SHIFT) & 0x3f) as u8,
        manufacturer: ((code >> BOARD_REV_MANUFACTURER_SHIFT) & 0xf) as u8,
        chip: ((code >> BOARD_REV_CHIP_SHIFT) & 0xf) as u8,
        board_type: ((code >> BOARD_REV_TYPE_SHIFT) & 0xff) as u8,
        revision: ((code >> BOARD_REV_REVISION_SHIFT) & 0xf) as u8,
    }
}

/// Human readable byte size (`1 GiB`, `512 MiB`, `1.5 GiB`).
pub fn size_to_str(size: u64) -> String {
    const UNITS: [(u64, &str); 5] = [
        (GIB << 10, "TiB"),
        (GIB, "GiB"),
        (MIB, "MiB"),
        (KIB, "KiB"),
        (1, "B"),
    ];
    let (div, unit) = UNITS
        .into_iter()
        .find(|&(div, _)| size >= div)
        .unwrap_or((1, "B"));
    if size % div == 0 {
        return format!("{} {unit}", size / div);
    }
    let value = format!("{:.3}", size as f64 / div as f64);
    let value = value.trim_end_matches('0').trim_end_matches('.');
    format!("{value} {unit}")
}
