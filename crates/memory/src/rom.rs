use thiserror::Error;

use crate::phys::{GuestMemory, GuestMemoryError};

/// Errors raised while registering or applying ROM blobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RomError {
    #[error(
        "rom: requested regions overlap (rom {name} [0x{addr:x}, 0x{end:x}) collides with rom {other})"
    )]
    Overlap {
        name: String,
        other: String,
        addr: u64,
        end: u64,
    },

    #[error("rom {name}: address 0x{addr:x} + {len} bytes overflows the physical address space")]
    AddressOverflow { name: String, addr: u64, len: usize },

    #[error("rom {name}: {source}")]
    Memory {
        name: String,
        #[source]
        source: GuestMemoryError,
    },
}

/// A named blob that lives at a fixed guest-physical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomBlob {
    name: String,
    addr: u64,
    data: Vec<u8>,
}

impl RomBlob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end address.
    pub fn end(&self) -> u64 {
        self.addr + self.data.len() as u64
    }

    fn overlaps(&self, addr: u64, end: u64) -> bool {
        addr < self.end() && self.addr < end
    }
}

/// The set of fixed ROM blobs copied into guest RAM on every reset.
///
/// Blobs are kept sorted by address. Registration fails if a new blob would share any byte with
/// an existing one.
#[derive(Debug, Clone, Default)]
pub struct RomSet {
    blobs: Vec<RomBlob>,
}

impl RomSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `data` at `addr`.
    pub fn add_blob_fixed(
        &mut self,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        addr: u64,
    ) -> Result<(), RomError> {
        let name = name.into();
        let data = data.into();
        let len = data.len();
        let end = addr
            .checked_add(len as u64)
            .ok_or_else(|| RomError::AddressOverflow {
                name: name.clone(),
                addr,
                len,
            })?;

        if len != 0 {
            if let Some(other) = self.blobs.iter().find(|b| b.overlaps(addr, end)) {
                return Err(RomError::Overlap {
                    name,
                    other: other.name.clone(),
                    addr,
                    end,
                });
            }
        }

        tracing::debug!("rom blob {name}: {len} bytes at {addr:#x}");
        let idx = self.blobs.partition_point(|b| b.addr <= addr);
        self.blobs.insert(idx, RomBlob { name, addr, data });
        Ok(())
    }

    /// Registers a sequence of 32-bit words, stored little-endian.
    pub fn add_words_fixed(
        &mut self,
        name: impl Into<String>,
        words: &[u32],
        addr: u64,
    ) -> Result<(), RomError> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.add_blob_fixed(name, bytes, addr)
    }

    pub fn blobs(&self) -> &[RomBlob] {
        &self.blobs
    }

    pub fn get(&self, name: &str) -> Option<&RomBlob> {
        self.blobs.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Copies every blob into guest memory.
    pub fn reset(&self, mem: &mut dyn GuestMemory) -> Result<(), RomError> {
        for blob in &self.blobs {
            mem.write_from(blob.addr, &blob.data)
                .map_err(|source| RomError::Memory {
                    name: blob.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
