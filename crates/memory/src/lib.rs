#![forbid(unsafe_code)]

//! Guest physical memory and boot-time ROM blobs.
//!
//! Board code never writes boot code straight into RAM. It registers named, fixed-address
//! [`RomBlob`]s in a [`RomSet`], and the set is copied into guest RAM on every machine reset.
//! That way data such as spin-table slots returns to a well-defined state each time the guest
//! restarts.

mod image;
mod phys;
mod rom;

pub use image::{load_image_targphys, ImageLoadError};
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, SparseMemory};
pub use rom::{RomBlob, RomError, RomSet};

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests;
