//! Various utility functions and types

mod clock;
mod geometry;
mod region;

pub use self::clock::{Clock, Time};
pub use self::geometry::{Point, Rectangle, Size};
pub use self::region::{Region, DEFAULT_RECT_LIMIT};
