//! System-memory backing stores
//!
//! The SHM-style backend: every store is a row-major `Vec<u8>` with a
//! stride derived from depth. This is the fallback when no device-memory
//! path is available and the reference implementation for backend
//! semantics.

use tracing::trace;

use super::{BackingStore, StorageBackend};
use crate::utils::{Rectangle, Size};

/// Largest store the memory backend will allocate, in bytes.
///
/// Matches the 16k x 16k x 4 byte ceiling typical X servers enforce on
/// pixmap allocation.
const MAX_STORE_BYTES: usize = 16384 * 16384 * 4;

/// Errors thrown by [`MemoryBackend`] operations
#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    /// The requested store would exceed the allocation ceiling
    #[error("requested store of {0} exceeds the allocation limit")]
    TooLarge(Size),
    /// The requested depth has no packed pixel representation
    #[error("unsupported depth {0}")]
    UnsupportedDepth(u8),
    /// Source and destination geometry differ
    #[error("source and destination stores have different geometry")]
    Mismatch,
}

fn bytes_per_pixel(depth: u8) -> Result<usize, MemoryStoreError> {
    match depth {
        8 => Ok(1),
        16 => Ok(2),
        24 | 32 => Ok(4),
        other => Err(MemoryStoreError::UnsupportedDepth(other)),
    }
}

/// A backing store held in system memory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    size: Size,
    depth: u8,
    stride: usize,
    data: Vec<u8>,
}

impl MemoryStore {
    /// Bytes per row of this store
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw pixel bytes, row-major
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw pixel bytes, row-major
    ///
    /// Drawing into a store does not record damage; callers are expected to
    /// report the touched area to the scheduler themselves.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl BackingStore for MemoryStore {
    fn size(&self) -> Size {
        self.size
    }

    fn depth(&self) -> u8 {
        self.depth
    }
}

/// Backend allocating [`MemoryStore`]s
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    _priv: (),
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }
}

impl StorageBackend for MemoryBackend {
    type Store = MemoryStore;
    type Error = MemoryStoreError;

    fn create_store(&mut self, size: Size, depth: u8) -> Result<MemoryStore, MemoryStoreError> {
        let bpp = bytes_per_pixel(depth)?;
        let stride = size.w as usize * bpp;
        let len = stride.checked_mul(size.h as usize).filter(|len| *len <= MAX_STORE_BYTES);
        let Some(len) = len else {
            return Err(MemoryStoreError::TooLarge(size));
        };
        trace!(%size, depth, len, "allocating memory store");
        Ok(MemoryStore {
            size,
            depth,
            stride,
            data: vec![0; len],
        })
    }

    fn copy_rects(
        &mut self,
        src: &MemoryStore,
        dst: &mut MemoryStore,
        rects: &[Rectangle],
    ) -> Result<(), MemoryStoreError> {
        if src.size != dst.size || src.depth != dst.depth {
            return Err(MemoryStoreError::Mismatch);
        }
        let bpp = bytes_per_pixel(src.depth)?;
        let stride = src.stride;
        for rect in rects {
            let x_off = rect.loc.x as usize * bpp;
            let row_len = rect.size.w as usize * bpp;
            for row in 0..rect.size.h as usize {
                let start = (rect.loc.y as usize + row) * stride + x_off;
                dst.data[start..start + row_len].copy_from_slice(&src.data[start..start + row_len]);
            }
        }
        Ok(())
    }
}
