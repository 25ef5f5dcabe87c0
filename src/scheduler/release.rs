//! Buffer-release notification dispatch
//!
//! The compositor tells us a buffer is free again asynchronously; this
//! module carries those notifications back into the single-threaded event
//! loop as plain messages instead of ad-hoc callbacks. Two transports are
//! provided:
//!
//! - [`release_channel`]: a [`calloop`] channel for notifications that
//!   originate in process (e.g. a protocol listener running on the same
//!   loop),
//! - [`ReleaseFence`]: an eventfd-backed fence for explicit-sync style
//!   signalling, where the releasing side only has a file descriptor to
//!   poke.
//!
//! Either way the loop callback ends up calling
//! [`CommitScheduler::buffer_released`] and re-arming the eviction timer
//! with the returned deadline.
//!
//! ```no_run
//! use calloop::EventLoop;
//! use window_buffers::backing::memory::MemoryStore;
//! use window_buffers::scheduler::release::{release_channel, ReleaseEvent};
//! use window_buffers::scheduler::CommitScheduler;
//! use window_buffers::utils::Clock;
//!
//! struct State {
//!     scheduler: CommitScheduler<MemoryStore>,
//!     clock: Clock,
//! }
//!
//! let event_loop: EventLoop<'_, State> = EventLoop::try_new().unwrap();
//! let (sender, channel) = release_channel();
//! // hand `sender` to the protocol layer, one clone per listener
//! event_loop
//!     .handle()
//!     .insert_source(channel, |event, _, state| {
//!         if let calloop::channel::Event::Msg(ReleaseEvent { window, buffer }) = event {
//!             let now = state.clock.now();
//!             state.scheduler.buffer_released(window, buffer, now);
//!         }
//!     })
//!     .unwrap();
//! ```
//!
//! [`CommitScheduler::buffer_released`]: super::CommitScheduler::buffer_released

use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use calloop::channel::{self, Channel};
use rustix::event::{eventfd, EventfdFlags};
use tracing::trace;

use super::WindowId;
use crate::pool::BufferId;

/// Notification that the presentation layer no longer holds a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseEvent {
    /// Window the buffer belongs to
    pub window: WindowId,
    /// The released buffer
    pub buffer: BufferId,
}

/// Sending half of a release channel
///
/// Cheap to clone; one per protocol listener.
#[derive(Clone)]
pub struct ReleaseSender(channel::Sender<ReleaseEvent>);

impl std::fmt::Debug for ReleaseSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseSender").finish_non_exhaustive()
    }
}

impl ReleaseSender {
    /// Post a release notification to the event loop
    ///
    /// A closed receiver means the loop is shutting down; the notification
    /// is dropped silently in that case.
    pub fn send(&self, window: WindowId, buffer: BufferId) {
        trace!(%window, ?buffer, "queueing buffer release");
        let _ = self.0.send(ReleaseEvent { window, buffer });
    }
}

/// Create a release notification channel
///
/// The [`Channel`] half is inserted into the event loop, see the module
/// example.
pub fn release_channel() -> (ReleaseSender, Channel<ReleaseEvent>) {
    let (sender, channel) = channel::channel();
    (ReleaseSender(sender), channel)
}

/// An eventfd-backed release fence for one pooled buffer
///
/// Created per commit when explicit synchronization is in use: the fd is
/// handed to the releasing side, which signals it once the buffer is free.
/// On the loop side the fence is registered as a level-triggered read
/// source (e.g. via [`calloop::generic::Generic`]); the callback calls
/// [`acknowledge`](ReleaseFence::acknowledge) and forwards the identity to
/// [`CommitScheduler::buffer_released`](super::CommitScheduler::buffer_released).
#[derive(Debug)]
pub struct ReleaseFence {
    fd: OwnedFd,
    window: WindowId,
    buffer: BufferId,
}

impl ReleaseFence {
    /// Create an unsignalled fence for the given buffer
    pub fn new(window: WindowId, buffer: BufferId) -> io::Result<ReleaseFence> {
        let fd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
        Ok(ReleaseFence { fd, window, buffer })
    }

    /// Window this fence belongs to
    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Buffer this fence releases
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Signal the fence (releasing side)
    pub fn signal(&self) -> io::Result<()> {
        rustix::io::write(&self.fd, &1u64.to_ne_bytes())?;
        Ok(())
    }

    /// Consume a pending signal, if any
    ///
    /// Returns whether the fence had been signalled since the last
    /// acknowledge. Must be called from the read callback before the
    /// release is forwarded, otherwise a level-triggered source spins.
    pub fn acknowledge(&self) -> io::Result<bool> {
        let mut count = [0u8; 8];
        match rustix::io::read(&self.fd, &mut count) {
            Ok(_) => Ok(true),
            Err(rustix::io::Errno::AGAIN) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl AsFd for ReleaseFence {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::ReleaseFence;
    use crate::pool::BufferId;
    use crate::scheduler::WindowId;

    #[test]
    fn fence_signal_and_acknowledge() {
        let fence = ReleaseFence::new(WindowId(1), BufferId::for_tests(0)).unwrap();
        assert!(!fence.acknowledge().unwrap());
        fence.signal().unwrap();
        fence.signal().unwrap();
        // both signals coalesce into one pending release
        assert!(fence.acknowledge().unwrap());
        assert!(!fence.acknowledge().unwrap());
    }
}
