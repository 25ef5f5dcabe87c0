//! Damage region accumulation
//!
//! A [`Region`] collects the rectangles dirtied on a window since the last
//! flush to a presentable buffer. It is deliberately not a full band-based
//! region implementation: rectangles are kept as-is and only coalesced when
//! one fully contains another, which keeps `push` cheap for the common case
//! of a handful of dirty areas per frame. Once the set grows past the
//! configured rectangle limit it collapses to its bounding box, trading
//! copy precision for bounded bookkeeping.

use smallvec::SmallVec;

use super::geometry::{Rectangle, Size};

/// Default maximum number of rectangles tracked before a region collapses
/// to its bounding box.
pub const DEFAULT_RECT_LIMIT: usize = 256;

/// An accumulated set of dirty rectangles
///
/// Invariant: no rectangle in the set is fully contained by another and no
/// rectangle is empty.
#[derive(Debug, Clone)]
pub struct Region {
    rects: SmallVec<[Rectangle; 4]>,
    rect_limit: usize,
}

impl Default for Region {
    fn default() -> Self {
        Region::new()
    }
}

impl Region {
    /// Create an empty region with the default rectangle limit
    pub fn new() -> Region {
        Region::with_rect_limit(DEFAULT_RECT_LIMIT)
    }

    /// Create an empty region collapsing to its bounding box beyond `limit`
    /// rectangles
    pub fn with_rect_limit(limit: usize) -> Region {
        Region {
            rects: SmallVec::new(),
            rect_limit: limit.max(1),
        }
    }

    /// Returns whether no dirty pixels are recorded
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of rectangles currently tracked
    #[inline]
    pub fn num_rects(&self) -> usize {
        self.rects.len()
    }

    /// Union a rectangle into the region
    pub fn push(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        // Absorb in either direction before storing.
        if self.rects.iter().any(|r| r.contains_rect(rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains_rect(*r));
        self.rects.push(rect);
        if self.rects.len() > self.rect_limit {
            let bbox = self.bounding_box();
            self.rects.clear();
            self.rects.push(bbox);
        }
    }

    /// The smallest rectangle covering the whole region
    pub fn bounding_box(&self) -> Rectangle {
        self.rects
            .iter()
            .copied()
            .fold(Rectangle::zero(), Rectangle::merge)
    }

    /// Iterate over the tracked rectangles
    pub fn iter(&self) -> impl Iterator<Item = Rectangle> + '_ {
        self.rects.iter().copied()
    }

    /// Remove all rectangles
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Drain the region, returning its rectangles clipped to `bounds`
    ///
    /// Rectangles outside of `bounds` are dropped. The region is empty
    /// afterwards.
    pub fn take_clipped(&mut self, bounds: Size) -> SmallVec<[Rectangle; 4]> {
        let bounds = Rectangle::from_size(bounds);
        let mut rects = std::mem::take(&mut self.rects);
        let mut out = SmallVec::with_capacity(rects.len());
        for rect in rects.drain(..) {
            if let Some(clipped) = rect.intersection(bounds) {
                out.push(clipped);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{Region, Rectangle};

    #[test]
    fn push_absorbs_contained_rects() {
        let mut region = Region::new();
        region.push(Rectangle::from_loc_and_size((0, 0), (100, 100)));
        region.push(Rectangle::from_loc_and_size((10, 10), (5, 5)));
        assert_eq!(region.num_rects(), 1);

        let mut region = Region::new();
        region.push(Rectangle::from_loc_and_size((10, 10), (5, 5)));
        region.push(Rectangle::from_loc_and_size((0, 0), (100, 100)));
        assert_eq!(region.num_rects(), 1);
        assert_eq!(
            region.bounding_box(),
            Rectangle::from_loc_and_size((0, 0), (100, 100))
        );
    }

    #[test]
    fn push_ignores_empty_rects() {
        let mut region = Region::new();
        region.push(Rectangle::from_loc_and_size((3, 3), (0, 10)));
        assert!(region.is_empty());
    }

    #[test]
    fn collapses_past_rect_limit() {
        let mut region = Region::with_rect_limit(4);
        for i in 0..5 {
            region.push(Rectangle::from_loc_and_size((i * 10, 0), (5, 5)));
        }
        assert_eq!(region.num_rects(), 1);
        assert_eq!(
            region.bounding_box(),
            Rectangle::from_loc_and_size((0, 0), (45, 5))
        );
    }

    #[test]
    fn take_clipped_clips_and_clears() {
        let mut region = Region::new();
        region.push(Rectangle::from_loc_and_size((90, 0), (20, 10)));
        region.push(Rectangle::from_loc_and_size((200, 200), (5, 5)));
        let rects = region.take_clipped((100, 100).into());
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0], Rectangle::from_loc_and_size((90, 0), (10, 10)));
        assert!(region.is_empty());
    }
}
