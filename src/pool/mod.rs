//! Per-window back-buffer pooling
//!
//! A [`BufferPool`] caches the backing stores previously used to present one
//! window, so that committing a frame usually re-uses a warm buffer instead
//! of allocating a fresh one. Every pooled buffer carries the damage it has
//! missed since it was last flushed; when it is picked again only those
//! rectangles are copied forward from the canonical window store.
//!
//! A buffer is in exactly one of two sets at any time: `available` (free for
//! immediate reuse, most recently released picked first) or `in_flight`
//! (held by the presentation layer and/or as the current window store,
//! tracked by a refcount). Buffers left unused longer than the pool timeout
//! are reclaimed, see [`BufferPool::evict_expired`].
//!
//! The pool is driven by the [`scheduler`](crate::scheduler); using it
//! directly is only expected from bridges with their own commit logic.

mod eviction;

pub use eviction::{EvictionHandler, EvictionTimer};

use std::collections::VecDeque;
use std::time::Duration;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::backing::{BackingStore, StorageBackend};
use crate::utils::{Rectangle, Region, Size, Time};

/// Default time a released buffer stays pooled before it is reclaimed.
pub const DEFAULT_EVICTION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Handle to a buffer inside one [`BufferPool`]
///
/// Ids are assigned monotonically and never reused for the lifetime of the
/// pool, so a stale id from a late release notification can never alias a
/// newer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

#[cfg(test)]
impl BufferId {
    pub(crate) fn for_tests(id: u64) -> BufferId {
        BufferId(id)
    }
}

#[derive(Debug)]
struct WindowBuffer<S> {
    store: S,
    damage: Region,
    refcount: usize,
    last_used: Option<Time>,
}

/// Source of pixel content for [`BufferPool::flush`]
#[derive(Debug)]
pub enum FlushSource<'a, S> {
    /// Copy from a store owned outside the pool
    External(&'a S),
    /// Copy from an in-flight pool buffer (the pooled canonical store)
    Pooled(BufferId),
}

/// Outcome of [`BufferPool::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Another holder remains, the buffer stays in flight
    Retained,
    /// The last reference was dropped, the buffer is available for reuse
    Pooled,
    /// The id does not belong to a live buffer (e.g. a release notification
    /// arriving after the pool was drained); ignored
    Unknown,
}

/// A pool of re-usable backing buffers for a single window
#[derive(Debug)]
pub struct BufferPool<S> {
    size: Size,
    depth: u8,
    timeout: Duration,
    rect_limit: usize,
    next_id: u64,
    /// Most recently released last; `last_used` is monotonic front to back.
    available: VecDeque<(BufferId, WindowBuffer<S>)>,
    in_flight: IndexMap<BufferId, WindowBuffer<S>>,
    /// Everything dirtied since the current geometry was set. Seeds the
    /// damage of freshly allocated buffers, which are otherwise blank.
    seed: Region,
}

impl<S: BackingStore> BufferPool<S> {
    /// Create a pool for a window of the given geometry with default
    /// eviction timeout and damage rectangle limit
    pub fn new(size: Size, depth: u8) -> BufferPool<S> {
        BufferPool::with_params(size, depth, DEFAULT_EVICTION_TIMEOUT, crate::utils::DEFAULT_RECT_LIMIT)
    }

    /// Create a pool with explicit eviction timeout and damage rectangle
    /// limit
    pub fn with_params(size: Size, depth: u8, timeout: Duration, rect_limit: usize) -> BufferPool<S> {
        BufferPool {
            size,
            depth,
            timeout,
            rect_limit,
            next_id: 0,
            available: VecDeque::new(),
            in_flight: IndexMap::new(),
            seed: Region::with_rect_limit(rect_limit),
        }
    }

    /// Geometry the pool currently serves
    pub fn geometry(&self) -> (Size, u8) {
        (self.size, self.depth)
    }

    /// The configured eviction timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire a buffer for the next commit
    ///
    /// Returns the most recently released available buffer if one exists,
    /// otherwise allocates a new store through `backend`. The buffer enters
    /// the in-flight set with a refcount of one, owed to the presentation
    /// layer. Allocation failure is propagated; callers are expected to fall
    /// back to presenting the canonical store unpooled rather than treating
    /// this as fatal.
    pub fn acquire<B>(&mut self, backend: &mut B) -> Result<BufferId, B::Error>
    where
        B: StorageBackend<Store = S>,
    {
        if let Some((id, mut buffer)) = self.available.pop_back() {
            trace!(?id, "reusing pooled buffer");
            buffer.refcount = 1;
            buffer.last_used = None;
            self.in_flight.insert(id, buffer);
            return Ok(id);
        }

        let store = backend.create_store(self.size, self.depth)?;
        let id = BufferId(self.next_id);
        self.next_id += 1;
        debug!(?id, size = %self.size, depth = self.depth, "allocated new window buffer");
        self.in_flight.insert(
            id,
            WindowBuffer {
                store,
                // A fresh buffer holds no content at all; it needs everything
                // the window has drawn so far, not just the latest damage.
                damage: self.seed.clone(),
                refcount: 1,
                last_used: None,
            },
        );
        Ok(id)
    }

    /// Add a holder to an in-flight buffer
    ///
    /// Used by the commit path when a presented buffer also becomes the
    /// current window store. The buffer will only return to the available
    /// set once every holder has released it.
    pub fn hold(&mut self, id: BufferId) -> bool {
        match self.in_flight.get_mut(&id) {
            Some(buffer) => {
                buffer.refcount += 1;
                trace!(?id, refcount = buffer.refcount, "holding window buffer");
                true
            }
            None => {
                warn!(?id, "hold on a buffer that is not in flight");
                false
            }
        }
    }

    /// Drop one reference to an in-flight buffer
    ///
    /// When the last reference goes away the buffer moves to the available
    /// set and becomes the first candidate for the next [`acquire`]
    /// (LIFO reuse). `now` stamps its last-used time for eviction.
    ///
    /// [`acquire`]: BufferPool::acquire
    pub fn release(&mut self, id: BufferId, now: Time) -> Released {
        let Some(buffer) = self.in_flight.get_mut(&id) else {
            trace!(?id, "release for unknown buffer, ignoring");
            return Released::Unknown;
        };
        buffer.refcount -= 1;
        if buffer.refcount > 0 {
            trace!(?id, refcount = buffer.refcount, "buffer released but still held");
            return Released::Retained;
        }
        let (_, mut buffer) = self.in_flight.swap_remove_entry(&id).expect("entry just accessed");
        buffer.last_used = Some(now);
        self.available.push_back((id, buffer));
        trace!(?id, available = self.available.len(), "buffer returned to pool");
        Released::Pooled
    }

    /// Record damage on the window
    ///
    /// The rectangle is unioned into the damage of every pooled buffer, in
    /// both sets, since any of them may be selected for a later commit and
    /// must then receive the same pending updates.
    pub fn mark_dirty(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        self.seed.push(rect);
        for (_, buffer) in self.available.iter_mut() {
            buffer.damage.push(rect);
        }
        for buffer in self.in_flight.values_mut() {
            buffer.damage.push(rect);
        }
    }

    /// Copy the accumulated dirty rectangles of `id` from `src` into its
    /// store and clear its damage
    ///
    /// Returns the consumed rectangles, clipped to the buffer bounds; these
    /// are also exactly the areas the presentation layer needs to flag as
    /// surface damage. Copies are rectangle-granular, cost is bounded by the
    /// dirtied area.
    #[profiling::function]
    pub fn flush<B>(
        &mut self,
        id: BufferId,
        backend: &mut B,
        src: FlushSource<'_, S>,
    ) -> Result<SmallVec<[Rectangle; 4]>, B::Error>
    where
        B: StorageBackend<Store = S>,
    {
        // Take the destination out so an in-flight source can be borrowed
        // at the same time; it goes back in either way.
        let Some((_, mut dst)) = self.in_flight.swap_remove_entry(&id) else {
            warn!(?id, "flush on a buffer that is not in flight");
            return Ok(SmallVec::new());
        };
        let rects = dst.damage.take_clipped(self.size);
        let result = match src {
            FlushSource::External(store) => backend.copy_rects(store, &mut dst.store, &rects),
            FlushSource::Pooled(src_id) => match self.in_flight.get(&src_id) {
                Some(src_buffer) => backend.copy_rects(&src_buffer.store, &mut dst.store, &rects),
                None => {
                    warn!(?src_id, "flush source is not in flight, skipping copy");
                    Ok(())
                }
            },
        };
        if result.is_err() {
            // keep the consumed damage so a retry copies it again
            for rect in rects.iter() {
                dst.damage.push(*rect);
            }
        }
        self.in_flight.insert(id, dst);
        result.map(|()| rects)
    }

    /// Destroy every available buffer whose age reached the pool timeout
    ///
    /// Returns the deadline of the now-oldest available buffer, or [`None`]
    /// if the available set is empty (the eviction timer has to disarm in
    /// that case).
    pub fn evict_expired(&mut self, now: Time) -> Option<Time> {
        while let Some((id, buffer)) = self.available.front() {
            let used = buffer.last_used.expect("available buffers carry a timestamp");
            if now.duration_since(used) < self.timeout {
                break;
            }
            debug!(?id, "evicting idle window buffer");
            self.available.pop_front();
        }
        self.next_deadline()
    }

    /// Deadline at which the oldest available buffer expires
    ///
    /// [`None`] iff the available set is empty; the eviction timer is armed
    /// exactly when this is [`Some`].
    pub fn next_deadline(&self) -> Option<Time> {
        self.available
            .front()
            .map(|(_, buffer)| buffer.last_used.expect("available buffers carry a timestamp") + self.timeout)
    }

    /// Change the window geometry
    ///
    /// Any change invalidates every pooled buffer, in both sets and
    /// regardless of outstanding references; no stale-size buffer is ever
    /// handed out afterwards.
    pub fn set_geometry(&mut self, size: Size, depth: u8) {
        if self.size == size && self.depth == depth {
            return;
        }
        debug!(old = %self.size, new = %size, depth, "window geometry changed, draining pool");
        self.drain();
        self.size = size;
        self.depth = depth;
    }

    /// Destroy every pooled buffer regardless of refcount
    ///
    /// Used at window-disposal time (and on geometry changes). Calling this
    /// on an already empty pool is a no-op.
    pub fn drain(&mut self) {
        let dropped = self.available.len() + self.in_flight.len();
        if dropped > 0 {
            debug!(dropped, "draining window buffer pool");
        }
        self.available.clear();
        self.in_flight.clear();
        self.seed = Region::with_rect_limit(self.rect_limit);
    }

    /// Access the backing store of a live buffer
    pub fn store(&self, id: BufferId) -> Option<&S> {
        self.in_flight
            .get(&id)
            .or_else(|| {
                self.available
                    .iter()
                    .find(|(avail_id, _)| *avail_id == id)
                    .map(|(_, buffer)| buffer)
            })
            .map(|buffer| &buffer.store)
    }

    /// Mutable access to the backing store of a live buffer
    ///
    /// Used for drawing into the pooled canonical store; damage is not
    /// recorded implicitly.
    pub fn store_mut(&mut self, id: BufferId) -> Option<&mut S> {
        if let Some(buffer) = self.in_flight.get_mut(&id) {
            return Some(&mut buffer.store);
        }
        self.available
            .iter_mut()
            .find(|(avail_id, _)| *avail_id == id)
            .map(|(_, buffer)| &mut buffer.store)
    }

    /// Number of buffers ready for immediate reuse
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Number of buffers held by the presentation layer or other holders
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether `id` is in the available set
    pub fn is_available(&self, id: BufferId) -> bool {
        self.available.iter().any(|(avail_id, _)| *avail_id == id)
    }

    /// Whether `id` is in the in-flight set
    pub fn is_in_flight(&self, id: BufferId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Current refcount of a live buffer, 0 for available ones
    pub fn refcount(&self, id: BufferId) -> Option<usize> {
        if let Some(buffer) = self.in_flight.get(&id) {
            return Some(buffer.refcount);
        }
        self.is_available(id).then_some(0)
    }
}
