use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A point in window-pixel coordinates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    /// horizontal coordinate
    pub x: i32,
    /// vertical coordinate
    pub y: i32,
}

impl Point {
    /// A point at (0, 0)
    pub const ZERO: Point = Point { x: 0, y: 0 };
}

impl From<(i32, i32)> for Point {
    #[inline]
    fn from((x, y): (i32, i32)) -> Point {
        Point { x, y }
    }
}

impl Add for Point {
    type Output = Point;
    #[inline]
    fn add(self, other: Point) -> Point {
        Point {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl AddAssign for Point {
    #[inline]
    fn add_assign(&mut self, other: Point) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Point {
    type Output = Point;
    #[inline]
    fn sub(self, other: Point) -> Point {
        Point {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl SubAssign for Point {
    #[inline]
    fn sub_assign(&mut self, other: Point) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A two-dimensional extent in window-pixel coordinates
///
/// Constructors clamp negative components to zero, a size is never negative.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    /// horizontal extent
    pub w: i32,
    /// vertical extent
    pub h: i32,
}

impl Size {
    /// Returns whether either extent is zero
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Restrict both extents to at most those of `max`
    #[inline]
    pub fn clamp(self, max: Size) -> Size {
        Size {
            w: self.w.min(max.w),
            h: self.h.min(max.h),
        }
    }

    /// Convert this size to a point
    #[inline]
    pub fn to_point(self) -> Point {
        Point { x: self.w, y: self.h }
    }
}

impl From<(i32, i32)> for Size {
    #[inline]
    fn from((w, h): (i32, i32)) -> Size {
        debug_assert!(w >= 0 && h >= 0, "size components must be non-negative");
        Size { w: w.max(0), h: h.max(0) }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// An axis-aligned rectangle in window-pixel coordinates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// position of the top-left corner
    pub loc: Point,
    /// extent of the rectangle
    pub size: Size,
}

impl Rectangle {
    /// Create a rectangle from a location and a size
    #[inline]
    pub fn from_loc_and_size(loc: impl Into<Point>, size: impl Into<Size>) -> Rectangle {
        Rectangle {
            loc: loc.into(),
            size: size.into(),
        }
    }

    /// Create a rectangle at (0, 0) with the given size
    #[inline]
    pub fn from_size(size: impl Into<Size>) -> Rectangle {
        Rectangle {
            loc: Point::ZERO,
            size: size.into(),
        }
    }

    /// Create a rectangle from the coordinates of its top-left and bottom-right corners
    pub fn from_extremities(topleft: impl Into<Point>, bottomright: impl Into<Point>) -> Rectangle {
        let topleft = topleft.into();
        let bottomright = bottomright.into();
        Rectangle {
            loc: topleft,
            size: ((bottomright.x - topleft.x).max(0), (bottomright.y - topleft.y).max(0)).into(),
        }
    }

    /// The rectangle with zero location and zero size
    #[inline]
    pub fn zero() -> Rectangle {
        Rectangle::default()
    }

    /// Returns whether this rectangle covers no pixels
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// Number of pixels covered by this rectangle
    #[inline]
    pub fn area(&self) -> u64 {
        self.size.w as u64 * self.size.h as u64
    }

    /// Checks whether a given point is inside the rectangle
    pub fn contains(self, point: impl Into<Point>) -> bool {
        let p = point.into();
        p.x >= self.loc.x
            && p.x < self.loc.x + self.size.w
            && p.y >= self.loc.y
            && p.y < self.loc.y + self.size.h
    }

    /// Checks whether `other` is completely inside this rectangle
    pub fn contains_rect(self, other: Rectangle) -> bool {
        other.loc.x >= self.loc.x
            && other.loc.y >= self.loc.y
            && other.loc.x + other.size.w <= self.loc.x + self.size.w
            && other.loc.y + other.size.h <= self.loc.y + self.size.h
    }

    /// Checks whether the two rectangles cover at least one common pixel
    pub fn overlaps(self, other: Rectangle) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.loc.x < other.loc.x + other.size.w
            && other.loc.x < self.loc.x + self.size.w
            && self.loc.y < other.loc.y + other.size.h
            && other.loc.y < self.loc.y + self.size.h
    }

    /// Compute the intersection of two rectangles, if any
    pub fn intersection(self, other: Rectangle) -> Option<Rectangle> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Rectangle::from_extremities(
            (self.loc.x.max(other.loc.x), self.loc.y.max(other.loc.y)),
            (
                (self.loc.x + self.size.w).min(other.loc.x + other.size.w),
                (self.loc.y + self.size.h).min(other.loc.y + other.size.h),
            ),
        ))
    }

    /// Compute the bounding rectangle of two rectangles
    pub fn merge(self, other: Rectangle) -> Rectangle {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        Rectangle::from_extremities(
            (self.loc.x.min(other.loc.x), self.loc.y.min(other.loc.y)),
            (
                (self.loc.x + self.size.w).max(other.loc.x + other.size.w),
                (self.loc.y + self.size.h).max(other.loc.y + other.size.h),
            ),
        )
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.size, self.loc)
    }
}
