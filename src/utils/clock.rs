use std::ops::Add;
use std::time::Duration;

use rustix::time::{clock_gettime, ClockId};

/// Monotonic clock
///
/// Pool and scheduler operations take explicit [`Time`] values so callers
/// (and tests) control the flow of time; this clock is what the event-loop
/// adapters read it from.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock;

impl Clock {
    /// Create a new monotonic clock
    pub fn new() -> Clock {
        Clock
    }

    /// Returns the current time
    pub fn now(&self) -> Time {
        let tp = clock_gettime(ClockId::Monotonic);
        Time(Duration::new(tp.tv_sec as u64, tp.tv_nsec as u32))
    }
}

/// A point in time on the monotonic clock
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(Duration);

impl Time {
    /// The clock's epoch, useful as a starting point in tests
    pub const ZERO: Time = Time(Duration::ZERO);

    /// Gets the duration from an earlier time up to self
    ///
    /// Returns [`Duration::ZERO`] if `earlier` is actually later.
    pub fn duration_since(&self, earlier: Time) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, offset: Duration) -> Time {
        Time(self.0.saturating_add(offset))
    }
}

impl From<Duration> for Time {
    fn from(tp: Duration) -> Time {
        Time(tp)
    }
}

impl From<Time> for Duration {
    fn from(time: Time) -> Duration {
        time.0
    }
}
