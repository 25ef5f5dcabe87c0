//! Event-loop integration for idle-buffer eviction
//!
//! The pools themselves only expose deadlines ([`BufferPool::next_deadline`])
//! and a synchronous reclaim operation ([`BufferPool::evict_expired`]); this
//! module owns the one physical [`calloop`] timer armed at the minimum
//! deadline over all pools and re-armed after every fire or release.
//!
//! [`BufferPool::next_deadline`]: super::BufferPool::next_deadline
//! [`BufferPool::evict_expired`]: super::BufferPool::evict_expired

use std::fmt;

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::{trace, warn};

use crate::utils::{Clock, Time};

/// Access to the eviction pieces of the user state
///
/// Implemented by the event-loop data type so the timer callback can reach
/// both the scheduler (to reclaim buffers) and the timer itself (to re-arm).
pub trait EvictionHandler: Sized {
    /// The [`EvictionTimer`] stored in this state
    fn eviction_timer(&mut self) -> &mut EvictionTimer<Self>;

    /// Reclaim every expired buffer and return the next deadline, if any
    ///
    /// Usually forwarded to
    /// [`CommitScheduler::evict_expired`](crate::scheduler::CommitScheduler::evict_expired).
    fn evict_expired(&mut self, now: Time) -> Option<Time>;
}

/// The single timer driving buffer eviction
///
/// State machine: unarmed or armed at a deadline. [`schedule`] moves between
/// the two; the timer firing reclaims buffers and re-arms itself to whatever
/// deadline remains.
///
/// [`schedule`]: EvictionTimer::schedule
pub struct EvictionTimer<D> {
    handle: LoopHandle<'static, D>,
    clock: Clock,
    token: Option<RegistrationToken>,
    deadline: Option<Time>,
}

impl<D> fmt::Debug for EvictionTimer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionTimer")
            .field("deadline", &self.deadline)
            .field("armed", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl<D: EvictionHandler + 'static> EvictionTimer<D> {
    /// Create an unarmed eviction timer on the given loop
    pub fn new(handle: LoopHandle<'static, D>) -> EvictionTimer<D> {
        EvictionTimer {
            handle,
            clock: Clock::new(),
            token: None,
            deadline: None,
        }
    }

    /// Arm the timer at `deadline`, or disarm it on [`None`]
    ///
    /// Re-arming at the deadline already pending is a no-op, so this is safe
    /// to call after every release notification.
    pub fn schedule(&mut self, deadline: Option<Time>) {
        if deadline == self.deadline && (deadline.is_none() || self.token.is_some()) {
            return;
        }
        self.cancel();
        let Some(deadline) = deadline else {
            return;
        };

        let delay = deadline.duration_since(self.clock.now());
        trace!(?delay, "arming eviction timer");
        let source = Timer::from_duration(delay);
        let token = self.handle.insert_source(source, move |_, _, data: &mut D| {
            let now = data.eviction_timer().clock.now();
            let next = data.evict_expired(now);
            let timer = data.eviction_timer();
            timer.token = None;
            timer.deadline = None;
            timer.schedule(next);
            TimeoutAction::Drop
        });
        match token {
            Ok(token) => {
                self.token = Some(token);
                self.deadline = Some(deadline);
            }
            Err(err) => {
                // Buffers then simply outlive their timeout until the next
                // release re-arms us; not worth failing a commit over.
                warn!(?err, "failed to arm eviction timer");
            }
        }
    }

    /// Disarm the timer
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            self.handle.remove(token);
        }
        self.deadline = None;
    }
}
