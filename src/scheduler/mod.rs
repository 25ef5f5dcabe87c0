//! Damage-driven commit scheduling
//!
//! The [`CommitScheduler`] tracks every bridged window, its buffer pool and
//! its canonical store (the single point of truth for window content, only
//! ever swapped by the commit path here). Once per event-loop iteration the
//! bridge calls [`dispatch_commits`]: every window with outstanding damage
//! that is not throttled by an outstanding frame callback gets a buffer
//! acquired, its dirty rectangles copied forward and the result handed to
//! the [`Presenter`]. Windows that are throttled simply stay pending and are
//! re-checked on the next iteration; eligibility is level-triggered, not
//! queued, so spurious re-checks are expected and cheap.
//!
//! Failure policy follows the pool's: allocation failures degrade to
//! presenting the canonical store unpooled, presentation failures leave the
//! window pending for a retry, and nothing in here is fatal.
//!
//! [`dispatch_commits`]: CommitScheduler::dispatch_commits

pub mod release;

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::backing::{BackingStore, StorageBackend};
use crate::pool::{BufferId, BufferPool, FlushSource, Released, DEFAULT_EVICTION_TIMEOUT};
use crate::utils::{Rectangle, Size, Time, DEFAULT_RECT_LIMIT};

/// Identifier of a bridged window (the X11 window XID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Tunables shared by every window of a scheduler
///
/// The defaults mirror long-standing bridge behavior; neither value is
/// derived from anything measurable, so both are exposed rather than
/// hardcoded.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a released buffer stays pooled before eviction
    pub eviction_timeout: Duration,
    /// Damage rectangle count above which a region collapses to its
    /// bounding box
    pub damage_rect_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            eviction_timeout: DEFAULT_EVICTION_TIMEOUT,
            damage_rect_limit: DEFAULT_RECT_LIMIT,
        }
    }
}

/// Commit state of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// No outstanding damage
    Idle,
    /// Damaged, waiting to become eligible for a commit
    Pending,
    /// A commit went out, waiting for the frame callback
    Committing,
}

/// Hand-off seam to the actual presentation layer
///
/// A successful [`present`] is expected to eventually produce a frame
/// callback ([`CommitScheduler::frame_done`]) and, for pooled buffers, a
/// release notification ([`CommitScheduler::buffer_released`]). A `buffer`
/// of [`None`] marks the degraded unpooled path: the canonical store is
/// shown directly and no release will follow for it.
///
/// [`present`]: Presenter::present
pub trait Presenter<S> {
    /// Error type thrown if the hand-off fails
    type Error: std::error::Error;

    /// Attach `store` to the window's surface and commit it, flagging
    /// `damage` as the changed area
    fn present(
        &mut self,
        window: WindowId,
        buffer: Option<BufferId>,
        store: &S,
        damage: &[Rectangle],
    ) -> Result<(), Self::Error>;
}

#[derive(Debug)]
enum Canonical<S> {
    /// A store owned directly by the window, outside any pool
    Direct(S),
    /// An in-flight pool buffer, kept alive by one `hold` refcount
    Pooled(BufferId),
}

#[derive(Debug)]
struct WindowState<S> {
    pool: BufferPool<S>,
    canonical: Canonical<S>,
    commit: CommitState,
    frame_pending: bool,
    commits_allowed: bool,
    /// Damage arrived since the last successful commit. Tracked separately
    /// from `commit` because damage may land mid-`Committing`.
    dirty: bool,
}

impl<S> WindowState<S> {
    fn eligible(&self) -> bool {
        self.commit == CommitState::Pending && self.commits_allowed && !self.frame_pending
    }
}

/// Tracks all bridged windows and commits their damage
#[derive(Debug)]
pub struct CommitScheduler<S> {
    windows: IndexMap<WindowId, WindowState<S>>,
    config: SchedulerConfig,
}

impl<S: BackingStore> Default for CommitScheduler<S> {
    fn default() -> Self {
        CommitScheduler::new(SchedulerConfig::default())
    }
}

impl<S: BackingStore> CommitScheduler<S> {
    /// Create a scheduler with the given tunables
    pub fn new(config: SchedulerConfig) -> CommitScheduler<S> {
        CommitScheduler {
            windows: IndexMap::new(),
            config,
        }
    }

    /// Start tracking a window, allocating its initial canonical store
    pub fn add_window<B>(
        &mut self,
        backend: &mut B,
        window: WindowId,
        size: Size,
        depth: u8,
    ) -> Result<(), B::Error>
    where
        B: StorageBackend<Store = S>,
    {
        let store = backend.create_store(size, depth)?;
        debug!(%window, %size, depth, "tracking window");
        let old = self.windows.insert(
            window,
            WindowState {
                pool: BufferPool::with_params(
                    size,
                    depth,
                    self.config.eviction_timeout,
                    self.config.damage_rect_limit,
                ),
                canonical: Canonical::Direct(store),
                commit: CommitState::Idle,
                frame_pending: false,
                commits_allowed: true,
                dirty: false,
            },
        );
        if old.is_some() {
            warn!(%window, "window was already tracked, replacing it");
        }
        Ok(())
    }

    /// Stop tracking a window
    ///
    /// Force-drains its pool regardless of outstanding references; a release
    /// notification still in flight for one of its buffers is ignored when
    /// it arrives.
    pub fn remove_window(&mut self, window: WindowId) {
        if let Some(mut state) = self.windows.swap_remove(&window) {
            debug!(%window, "untracking window");
            state.pool.drain();
        }
    }

    /// Record a dirtied rectangle on a window
    pub fn damage_window(&mut self, window: WindowId, rect: Rectangle) {
        let Some(state) = self.windows.get_mut(&window) else {
            trace!(%window, "damage for untracked window, ignoring");
            return;
        };
        if rect.is_empty() {
            return;
        }
        state.pool.mark_dirty(rect);
        state.dirty = true;
        if state.commit == CommitState::Idle {
            state.commit = CommitState::Pending;
        }
    }

    /// Change a window's geometry
    ///
    /// Drains the pool, allocates a fresh canonical store and marks the full
    /// new extent damaged.
    pub fn resize_window<B>(
        &mut self,
        backend: &mut B,
        window: WindowId,
        size: Size,
        depth: u8,
    ) -> Result<(), B::Error>
    where
        B: StorageBackend<Store = S>,
    {
        let Some(state) = self.windows.get_mut(&window) else {
            trace!(%window, "resize for untracked window, ignoring");
            return Ok(());
        };
        if state.pool.geometry() == (size, depth) {
            return Ok(());
        }
        let store = backend.create_store(size, depth)?;
        state.pool.set_geometry(size, depth);
        state.canonical = Canonical::Direct(store);
        state.pool.mark_dirty(Rectangle::from_size(size));
        state.dirty = true;
        if state.commit == CommitState::Idle {
            state.commit = CommitState::Pending;
        }
        Ok(())
    }

    /// Gate commits for a window (e.g. while it is unmapped)
    ///
    /// Damage keeps accumulating while gated; the window commits on the
    /// first dispatch after commits are allowed again.
    pub fn set_commits_allowed(&mut self, window: WindowId, allowed: bool) {
        if let Some(state) = self.windows.get_mut(&window) {
            state.commits_allowed = allowed;
        }
    }

    /// Frame callback arrived for a window, unthrottling it
    pub fn frame_done(&mut self, window: WindowId) {
        let Some(state) = self.windows.get_mut(&window) else {
            trace!(%window, "frame callback for untracked window, ignoring");
            return;
        };
        state.frame_pending = false;
        if state.commit == CommitState::Committing {
            state.commit = if state.dirty {
                CommitState::Pending
            } else {
                CommitState::Idle
            };
        }
    }

    /// A buffer release notification arrived from the compositor
    ///
    /// Returns the new earliest eviction deadline over all pools so the
    /// caller can re-arm the eviction timer. Notifications for windows or
    /// buffers that no longer exist are ignored; that race is harmless.
    pub fn buffer_released(&mut self, window: WindowId, buffer: BufferId, now: Time) -> Option<Time> {
        match self.windows.get_mut(&window) {
            Some(state) => {
                if state.pool.release(buffer, now) == Released::Unknown {
                    trace!(%window, ?buffer, "release for unknown buffer, ignoring");
                }
            }
            None => trace!(%window, ?buffer, "release for untracked window, ignoring"),
        }
        self.next_deadline()
    }

    /// Reclaim expired buffers in every pool
    ///
    /// Returns the next eviction deadline, [`None`] when no pool has
    /// available buffers left.
    pub fn evict_expired(&mut self, now: Time) -> Option<Time> {
        self.windows
            .values_mut()
            .filter_map(|state| state.pool.evict_expired(now))
            .min()
    }

    /// Earliest eviction deadline over all pools
    pub fn next_deadline(&self) -> Option<Time> {
        self.windows
            .values()
            .filter_map(|state| state.pool.next_deadline())
            .min()
    }

    /// Commit every eligible window
    ///
    /// Meant to run once per event-loop iteration, from a block/idle
    /// callback. Windows throttled by an outstanding frame callback stay
    /// pending and are picked up on a later iteration.
    #[profiling::function]
    pub fn dispatch_commits<B, P>(&mut self, backend: &mut B, presenter: &mut P, now: Time)
    where
        B: StorageBackend<Store = S>,
        P: Presenter<S>,
    {
        for (&window, state) in self.windows.iter_mut() {
            if !state.eligible() {
                continue;
            }
            Self::commit(window, state, backend, presenter, now);
        }
    }

    fn commit<B, P>(window: WindowId, state: &mut WindowState<S>, backend: &mut B, presenter: &mut P, now: Time)
    where
        B: StorageBackend<Store = S>,
        P: Presenter<S>,
    {
        let id = match state.pool.acquire(backend) {
            Ok(id) => id,
            Err(err) => {
                warn!(%window, ?err, "buffer allocation failed, presenting unpooled");
                Self::commit_unpooled(window, state, presenter);
                return;
            }
        };

        let src = match &state.canonical {
            Canonical::Direct(store) => FlushSource::External(store),
            Canonical::Pooled(canonical_id) => FlushSource::Pooled(*canonical_id),
        };
        let rects = match state.pool.flush(id, backend, src) {
            Ok(rects) => rects,
            Err(err) => {
                warn!(%window, ?id, ?err, "flush failed, keeping window pending");
                state.pool.release(id, now);
                return;
            }
        };

        let store = state.pool.store(id).expect("buffer acquired above is in flight");
        if let Err(err) = presenter.present(window, Some(id), store, &rects) {
            warn!(%window, ?err, "present failed, keeping window pending");
            // the copy already happened; re-mark the area so whichever
            // buffer the retry picks still carries it as damage
            for rect in rects.iter() {
                state.pool.mark_dirty(*rect);
            }
            state.pool.release(id, now);
            return;
        }
        trace!(%window, ?id, rects = rects.len(), "committed window buffer");

        // The presented buffer becomes the canonical store; the previous
        // pooled canonical loses its hold and may return to the pool.
        state.pool.hold(id);
        let previous = std::mem::replace(&mut state.canonical, Canonical::Pooled(id));
        if let Canonical::Pooled(old) = previous {
            state.pool.release(old, now);
        }

        state.dirty = false;
        state.commit = CommitState::Committing;
        state.frame_pending = true;
    }

    /// Degraded but correct path: show the canonical store itself, without
    /// pooling. The compositor may scan out of the store the window keeps
    /// drawing into; tearing beats not presenting at all.
    fn commit_unpooled<P>(window: WindowId, state: &mut WindowState<S>, presenter: &mut P)
    where
        P: Presenter<S>,
    {
        let (size, _) = state.pool.geometry();
        let full = [Rectangle::from_size(size)];
        let store = match &state.canonical {
            Canonical::Direct(store) => Some(store),
            Canonical::Pooled(id) => state.pool.store(*id),
        };
        let Some(store) = store else {
            warn!(%window, "canonical store missing, skipping commit");
            return;
        };
        if let Err(err) = presenter.present(window, None, store, &full) {
            warn!(%window, ?err, "unpooled present failed, keeping window pending");
            return;
        }
        state.dirty = false;
        state.commit = CommitState::Committing;
        state.frame_pending = true;
    }

    /// Commit state of a window
    pub fn commit_state(&self, window: WindowId) -> Option<CommitState> {
        self.windows.get(&window).map(|state| state.commit)
    }

    /// The window's buffer pool, for introspection
    pub fn pool(&self, window: WindowId) -> Option<&BufferPool<S>> {
        self.windows.get(&window).map(|state| &state.pool)
    }

    /// The canonical store currently backing the window
    pub fn canonical_store(&self, window: WindowId) -> Option<&S> {
        let state = self.windows.get(&window)?;
        match &state.canonical {
            Canonical::Direct(store) => Some(store),
            Canonical::Pooled(id) => state.pool.store(*id),
        }
    }

    /// Mutable access to the canonical store, for drawing
    ///
    /// Callers must report the touched area via
    /// [`damage_window`](CommitScheduler::damage_window) themselves.
    pub fn canonical_store_mut(&mut self, window: WindowId) -> Option<&mut S> {
        let state = self.windows.get_mut(&window)?;
        match &mut state.canonical {
            Canonical::Direct(store) => Some(store),
            Canonical::Pooled(id) => state.pool.store_mut(*id),
        }
    }

    /// Number of tracked windows
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CommitScheduler, CommitState, Presenter, SchedulerConfig, WindowId};
    use crate::backing::memory::{MemoryBackend, MemoryStore, MemoryStoreError};
    use crate::backing::StorageBackend;
    use crate::pool::BufferId;
    use crate::utils::{Rectangle, Size, Time};

    const WIN: WindowId = WindowId(0x2a);

    fn at(ms: u64) -> Time {
        Time::from(Duration::from_millis(ms))
    }

    #[derive(Debug, thiserror::Error)]
    #[error("present refused")]
    struct PresentRefused;

    #[derive(Default)]
    struct RecordingPresenter {
        presented: Vec<(WindowId, Option<BufferId>, Vec<Rectangle>)>,
        refuse: bool,
    }

    impl Presenter<MemoryStore> for RecordingPresenter {
        type Error = PresentRefused;

        fn present(
            &mut self,
            window: WindowId,
            buffer: Option<BufferId>,
            _store: &MemoryStore,
            damage: &[Rectangle],
        ) -> Result<(), PresentRefused> {
            if self.refuse {
                return Err(PresentRefused);
            }
            self.presented.push((window, buffer, damage.to_vec()));
            Ok(())
        }
    }

    struct FlakyBackend {
        inner: MemoryBackend,
        fail_allocs: bool,
    }

    impl StorageBackend for FlakyBackend {
        type Store = MemoryStore;
        type Error = MemoryStoreError;

        fn create_store(&mut self, size: Size, depth: u8) -> Result<MemoryStore, MemoryStoreError> {
            if self.fail_allocs {
                return Err(MemoryStoreError::TooLarge(size));
            }
            self.inner.create_store(size, depth)
        }

        fn copy_rects(
            &mut self,
            src: &MemoryStore,
            dst: &mut MemoryStore,
            rects: &[Rectangle],
        ) -> Result<(), MemoryStoreError> {
            self.inner.copy_rects(src, dst, rects)
        }
    }

    fn tracked_window() -> (CommitScheduler<MemoryStore>, MemoryBackend, RecordingPresenter) {
        let mut backend = MemoryBackend::new();
        let mut scheduler = CommitScheduler::new(SchedulerConfig::default());
        scheduler.add_window(&mut backend, WIN, (64, 64).into(), 32).unwrap();
        (scheduler, backend, RecordingPresenter::default())
    }

    #[test]
    fn idle_window_does_not_commit() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        assert!(presenter.presented.is_empty());
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Idle));
    }

    #[test]
    fn damage_commits_once_then_throttles() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        let rect = Rectangle::from_loc_and_size((0, 0), (10, 10));

        scheduler.damage_window(WIN, rect);
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Pending));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        assert_eq!(presenter.presented.len(), 1);
        let (window, buffer, damage) = &presenter.presented[0];
        assert_eq!(*window, WIN);
        assert!(buffer.is_some());
        assert_eq!(damage.as_slice(), &[rect]);
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Committing));

        // throttled until the frame callback arrives
        scheduler.damage_window(WIN, rect);
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(5));
        assert_eq!(presenter.presented.len(), 1);

        scheduler.frame_done(WIN);
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Pending));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(10));
        assert_eq!(presenter.presented.len(), 2);
    }

    #[test]
    fn frame_done_without_damage_goes_idle() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (4, 4)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        scheduler.frame_done(WIN);
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Idle));
    }

    #[test]
    fn commit_swap_releases_the_previous_canonical() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (8, 8)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        let first = presenter.presented[0].1.unwrap();

        // held twice: by the presentation layer and as the canonical store
        assert_eq!(scheduler.pool(WIN).unwrap().refcount(first), Some(2));
        scheduler.buffer_released(WIN, first, at(10));
        assert!(scheduler.pool(WIN).unwrap().is_in_flight(first));

        scheduler.frame_done(WIN);
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((1, 1), (2, 2)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(20));
        let second = presenter.presented[1].1.unwrap();
        assert_ne!(first, second);

        // the swap dropped the canonical hold, the old buffer is pooled now
        assert!(scheduler.pool(WIN).unwrap().is_available(first));
        assert_eq!(scheduler.pool(WIN).unwrap().refcount(second), Some(2));
    }

    #[test]
    fn gated_window_stays_pending() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.set_commits_allowed(WIN, false);
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (4, 4)));

        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(1));
        assert!(presenter.presented.is_empty());
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Pending));

        scheduler.set_commits_allowed(WIN, true);
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(2));
        assert_eq!(presenter.presented.len(), 1);
    }

    #[test]
    fn allocation_failure_presents_unpooled() {
        let mut backend = FlakyBackend {
            inner: MemoryBackend::new(),
            fail_allocs: false,
        };
        let mut scheduler = CommitScheduler::new(SchedulerConfig::default());
        scheduler.add_window(&mut backend, WIN, (64, 64).into(), 32).unwrap();
        let mut presenter = RecordingPresenter::default();

        backend.fail_allocs = true;
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (10, 10)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));

        assert_eq!(presenter.presented.len(), 1);
        let (_, buffer, damage) = &presenter.presented[0];
        assert_eq!(*buffer, None);
        assert_eq!(damage.as_slice(), &[Rectangle::from_loc_and_size((0, 0), (64, 64))]);
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Committing));
        assert_eq!(scheduler.pool(WIN).unwrap().in_flight_count(), 0);
    }

    #[test]
    fn present_failure_keeps_the_window_pending() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        presenter.refuse = true;
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (4, 4)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        assert!(presenter.presented.is_empty());
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Pending));
        // the acquired buffer was rolled back into the pool
        assert_eq!(scheduler.pool(WIN).unwrap().available_count(), 1);

        presenter.refuse = false;
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(5));
        assert_eq!(presenter.presented.len(), 1);
    }

    #[test]
    fn resize_drains_and_damages_the_full_extent() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (8, 8)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        scheduler.frame_done(WIN);

        scheduler.resize_window(&mut backend, WIN, (32, 32).into(), 32).unwrap();
        let pool = scheduler.pool(WIN).unwrap();
        assert_eq!(pool.available_count() + pool.in_flight_count(), 0);
        assert_eq!(scheduler.commit_state(WIN), Some(CommitState::Pending));

        scheduler.dispatch_commits(&mut backend, &mut presenter, at(10));
        let (_, buffer, damage) = presenter.presented.last().unwrap();
        assert!(buffer.is_some());
        assert_eq!(damage.as_slice(), &[Rectangle::from_loc_and_size((0, 0), (32, 32))]);
    }

    #[test]
    fn stale_release_after_window_teardown_is_ignored() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (4, 4)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        let buffer = presenter.presented[0].1.unwrap();

        scheduler.remove_window(WIN);
        assert_eq!(scheduler.window_count(), 0);
        assert_eq!(scheduler.buffer_released(WIN, buffer, at(10)), None);
    }

    #[test]
    fn eviction_deadline_follows_pooled_buffers() {
        let (mut scheduler, mut backend, mut presenter) = tracked_window();
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (4, 4)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(0));
        let first = presenter.presented[0].1.unwrap();
        assert_eq!(scheduler.next_deadline(), None);

        scheduler.frame_done(WIN);
        scheduler.damage_window(WIN, Rectangle::from_loc_and_size((0, 0), (4, 4)));
        scheduler.dispatch_commits(&mut backend, &mut presenter, at(100));
        // first lost its canonical hold at the swap but is still in flight
        let timeout = scheduler.pool(WIN).unwrap().timeout();
        let deadline = scheduler.buffer_released(WIN, first, at(150));
        assert_eq!(deadline, Some(at(150) + timeout));

        assert_eq!(scheduler.evict_expired(at(150) + timeout), None);
        assert!(!scheduler.pool(WIN).unwrap().is_available(first));
    }
}
