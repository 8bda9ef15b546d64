//! Axis-aligned box geometry.
//!
//! Boxes are stored in corner format `(x1, y1, x2, y2)`. Two area conventions
//! coexist: [`BBox::area`] is the continuous area used by clipping and the
//! empty-box predicate, while [`BBox::area_inclusive`] counts pixels
//! inclusively (`+1` per axis) and is what NMS overlap uses.

/// Corner-format bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Creates a box from corner coordinates.
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Converts a `(cx, cy, w, h)` box to corner format.
    pub fn from_cxcywh(cxcywh: [f32; 4]) -> Self {
        let [cx, cy, w, h] = cxcywh;
        Self {
            x1: cx - 0.5 * w,
            y1: cy - 0.5 * h,
            x2: cx + 0.5 * w,
            y2: cy + 0.5 * h,
        }
    }

    /// Converts to `(cx, cy, w, h)`.
    pub fn to_cxcywh(&self) -> [f32; 4] {
        [
            (self.x1 + self.x2) * 0.5,
            (self.y1 + self.y2) * 0.5,
            self.x2 - self.x1,
            self.y2 - self.y1,
        ]
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Continuous area, zero for inverted boxes.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Pixel-inclusive area `(x2 - x1 + 1) * (y2 - y1 + 1)`.
    #[inline]
    pub fn area_inclusive(&self) -> f32 {
        (self.x2 - self.x1 + 1.0) * (self.y2 - self.y1 + 1.0)
    }

    /// Returns true when both sides are strictly larger than `min_size`.
    pub fn is_nonempty(&self, min_size: f32) -> bool {
        self.width() > min_size && self.height() > min_size
    }

    /// Clamps every coordinate into `[0, width]` / `[0, height]`.
    ///
    /// Uses `max(min(v, bound), 0)` so a negative bound collapses to zero.
    pub fn clip(&self, width: f32, height: f32) -> Self {
        let clamp = |v: f32, bound: f32| v.min(bound).max(0.0);
        Self {
            x1: clamp(self.x1, width),
            y1: clamp(self.y1, height),
            x2: clamp(self.x2, width),
            y2: clamp(self.y2, height),
        }
    }

    /// Divides x coordinates by `scale_x` and y coordinates by `scale_y`.
    pub fn unscale(&self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x1: self.x1 / scale_x,
            y1: self.y1 / scale_y,
            x2: self.x2 / scale_x,
            y2: self.y2 / scale_y,
        }
    }

    /// Multiplies x coordinates by `sx` and y coordinates by `sy`.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<[f32; 4]> for BBox {
    fn from(arr: [f32; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        b.to_array()
    }
}

/// Inclusive-pixel intersection area of two boxes.
#[inline]
pub fn intersection_inclusive(a: &BBox, b: &BBox) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1) + 1.0).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1) + 1.0).max(0.0);
    w * h
}
