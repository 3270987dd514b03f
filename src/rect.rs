//! Integer rectangles for present-region clipping.

/// Half-open rectangle: `x1..x2` by `y1..y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn of_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Intersection with `other`; `None` when the overlap is empty.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }
}

/// Clip an optional requested region against buffer bounds. `None` region
/// means the full bounds; an empty intersection clips to nothing.
pub fn clip_region(region: Option<Rect>, bounds: Rect) -> Option<Rect> {
    match region {
        None => Some(bounds),
        Some(r) => r.intersect(&bounds),
    }
}
