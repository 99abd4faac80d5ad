use core::fmt;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size.
    OutOfRange { paddr: u64, len: usize, size: u64 },
    /// The requested size cannot be represented by the current platform's `usize`.
    SizeTooLarge { size: u64 },
    /// Sparse memory was asked for a chunk size of zero.
    InvalidChunkSize { chunk_size: u64 },
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestMemoryError::OutOfRange { paddr, len, size } => write!(
                f,
                "guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}"
            ),
            GuestMemoryError::SizeTooLarge { size } => {
                write!(f, "guest memory size {size} does not fit in usize")
            }
            GuestMemoryError::InvalidChunkSize { chunk_size } => {
                write!(f, "invalid sparse memory chunk size {chunk_size}")
            }
        }
    }
}

impl std::error::Error for GuestMemoryError {}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Guest *physical* memory storage.
///
/// Addresses are `u64` so boards with more than 4GiB of RAM (Pi 4) can be described on every
/// host.
pub trait GuestMemory {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory.
    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    /// Borrows `len` bytes at `paddr` when they are contiguous in the backing store.
    ///
    /// Backends that cannot hand out a direct view return `None`; callers fall back to
    /// [`GuestMemory::read_into`].
    fn get_slice(&self, _paddr: u64, _len: usize) -> Option<&[u8]> {
        None
    }

    fn read_u32_le(&self, paddr: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, paddr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32_le(&mut self, paddr: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, paddr: u64, value: u64) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let end = paddr
        .checked_add(len as u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

/// Dense (contiguous) guest memory.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    #[inline]
    fn range_to_usize(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        check_range(self.size(), paddr, len)?;
        let start = usize::try_from(paddr).map_err(|_| GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size(),
        })?;
        Ok((start, start + len))
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn get_slice(&self, paddr: u64, len: usize) -> Option<&[u8]> {
        let (start, end) = self.range_to_usize(paddr, len).ok()?;
        Some(&self.data[start..end])
    }
}

/// Sparse guest memory backed by lazily allocated fixed-size chunks.
///
/// Untouched chunks read as zero and cost no host memory, so large boards (8GiB on a Pi 4) can be
/// built on hosts that could never hold the whole RAM at once.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_size: u64,
    chunks: Vec<Option<Box<[u8]>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: u64) -> GuestMemoryResult<Self> {
        if chunk_size == 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        usize::try_from(chunk_size)
            .map_err(|_| GuestMemoryError::SizeTooLarge { size: chunk_size })?;
        let chunk_count = usize::try_from(size.div_ceil(chunk_size))
            .map_err(|_| GuestMemoryError::SizeTooLarge { size })?;

        let mut chunks = Vec::new();
        chunks.resize_with(chunk_count, || None);
        Ok(Self {
            size,
            chunk_size,
            chunks,
        })
    }

    /// Number of chunks that currently have host memory behind them.
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_some()).count()
    }

    /// Chunk index and offset within the chunk for an in-range `paddr`.
    #[inline]
    fn locate(&self, paddr: u64) -> (usize, usize) {
        // Both fit in usize: the chunk count and chunk size were checked at construction.
        (
            (paddr / self.chunk_size) as usize,
            (paddr % self.chunk_size) as usize,
        )
    }

    /// Length of the chunk at `index`; the last one may be short.
    fn chunk_len(&self, index: usize) -> usize {
        let start = index as u64 * self.chunk_size;
        (self.size - start).min(self.chunk_size) as usize
    }

    /// Splits `[paddr, paddr + len)` into per-chunk pieces of `(chunk, offset, piece_len)`.
    fn pieces(&self, paddr: u64, len: usize) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let mut addr = paddr;
        let mut remaining = len;
        core::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let (index, offset) = self.locate(addr);
            let piece = remaining.min(self.chunk_len(index) - offset);
            addr += piece as u64;
            remaining -= piece;
            Some((index, offset, piece))
        })
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, dst.len())?;
        let mut done = 0;
        for (index, offset, len) in self.pieces(paddr, dst.len()) {
            let out = &mut dst[done..done + len];
            match &self.chunks[index] {
                Some(chunk) => out.copy_from_slice(&chunk[offset..offset + len]),
                None => out.fill(0),
            }
            done += len;
        }
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, src.len())?;
        let pieces: Vec<_> = self.pieces(paddr, src.len()).collect();
        let mut done = 0;
        for (index, offset, len) in pieces {
            let chunk_len = self.chunk_len(index);
            let chunk = self.chunks[index]
                .get_or_insert_with(|| vec![0u8; chunk_len].into_boxed_slice());
            chunk[offset..offset + len].copy_from_slice(&src[done..done + len]);
            done += len;
        }
        Ok(())
    }

    fn get_slice(&self, paddr: u64, len: usize) -> Option<&[u8]> {
        check_range(self.size, paddr, len).ok()?;
        if len == 0 {
            return Some(&[][..]);
        }
        let (index, offset) = self.locate(paddr);
        if offset + len > self.chunk_len(index) {
            return None;
        }
        let chunk = self.chunks[index].as_deref()?;
        Some(&chunk[offset..offset + len])
    }
}
