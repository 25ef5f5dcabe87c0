//! Backing-store creation and rectangle copies
//!
//! Collection of traits abstracting over where window pixel memory actually
//! lives. The pool and scheduler never touch pixels themselves; they create
//! stores and request rectangle-granularity copies through a
//! [`StorageBackend`], so that the same lifecycle logic drives SHM-style
//! system memory (see [`memory`]) and dmabuf-style device memory alike.
//!
//! A bridge is expected to pick exactly one backend variant at startup and
//! use it for every window for the lifetime of the process.

pub mod memory;

use crate::utils::{Rectangle, Size};

/// Common trait describing properties of a backing pixel store
pub trait BackingStore {
    /// Width and height of the store
    fn size(&self) -> Size;
    /// Color depth in bits (e.g. 24 or 32)
    fn depth(&self) -> u8;

    /// Whether this store can back a window of the given geometry
    fn matches(&self, size: Size, depth: u8) -> bool {
        self.size() == size && self.depth() == depth
    }
}

/// Interface to create backing stores and copy pixel rectangles between them
pub trait StorageBackend {
    /// Backing store type created by this backend
    type Store: BackingStore;
    /// Error type thrown if allocation or copies fail
    type Error: std::error::Error;

    /// Try to create a store with the given dimensions and depth
    fn create_store(&mut self, size: Size, depth: u8) -> Result<Self::Store, Self::Error>;

    /// Copy the given rectangles from `src` into `dst`
    ///
    /// Both stores have identical geometry; rectangles are already clipped
    /// to it. Copy cost must be bounded by the area of `rects`, not the
    /// store size.
    fn copy_rects(
        &mut self,
        src: &Self::Store,
        dst: &mut Self::Store,
        rects: &[Rectangle],
    ) -> Result<(), Self::Error>;
}
