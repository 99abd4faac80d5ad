use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::rom::{RomError, RomSet};

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("failed to read image {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "image {} is {size} bytes but only {max_size} bytes are available at 0x{addr:x}",
        .path.display()
    )]
    TooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
        addr: u64,
    },

    #[error(transparent)]
    Rom(#[from] RomError),
}

/// Loads a raw image file into the ROM set at guest address `addr`.
///
/// The image may use at most `max_size` bytes. Returns the number of bytes loaded.
pub fn load_image_targphys(
    path: &Path,
    addr: u64,
    max_size: u64,
    rom: &mut RomSet,
) -> Result<usize, ImageLoadError> {
    let data = fs::read(path).map_err(|source| ImageLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // The limit applies to the bytes read, not to the metadata length.
    let len = data.len();
    if len as u64 > max_size {
        return Err(ImageLoadError::TooLarge {
            path: path.to_path_buf(),
            size: len as u64,
            max_size,
            addr,
        });
    }

    rom.add_blob_fixed(path.display().to_string(), data, addr)?;
    tracing::debug!("loaded {} ({len} bytes) at {addr:#x}", path.display());
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_that_fits_exactly_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.img");
        fs::write(&path, [0xaau8; 16]).unwrap();

        let mut rom = RomSet::new();
        let len = load_image_targphys(&path, 0x8000, 16, &mut rom).unwrap();
        assert_eq!(len, 16);
        assert_eq!(rom.blobs()[0].addr(), 0x8000);
    }

    #[test]
    fn image_one_byte_too_large_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.img");
        fs::write(&path, [0u8; 17]).unwrap();

        let mut rom = RomSet::new();
        let err = load_image_targphys(&path, 0x8000, 16, &mut rom).unwrap_err();
        assert!(matches!(
            err,
            ImageLoadError::TooLarge {
                size: 17,
                max_size: 16,
                ..
            }
        ));
        assert!(rom.is_empty());
    }

    #[test]
    fn missing_image_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut rom = RomSet::new();
        let err =
            load_image_targphys(&dir.path().join("nope.img"), 0, u64::MAX, &mut rom).unwrap_err();
        assert!(matches!(err, ImageLoadError::Io { .. }));
    }

    #[test]
    fn unreadable_path_is_an_io_error_even_with_no_room() {
        // A directory has a non-zero metadata length but no readable contents.
        let dir = tempfile::tempdir().unwrap();
        let mut rom = RomSet::new();
        let err = load_image_targphys(dir.path(), 0x8000, 0, &mut rom).unwrap_err();
        assert!(matches!(err, ImageLoadError::Io { .. }), "got: {err}");
        assert!(rom.is_empty());
    }
}
