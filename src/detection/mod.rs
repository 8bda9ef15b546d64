//! Detection rows and per-image metadata.
//!
//! A detection is stored as `[label, score, x1, y1, x2, y2]` when flattened
//! into a table. Label `-1` marks a row that was invalidated (for example an
//! empty box after clipping) but kept to preserve row counts.

pub mod batch;

pub use batch::{BatchBuffer, Images};

use crate::bbox::BBox;
use crate::util::math::round_half_up;
use crate::util::{DetPostError, DetPostResult};

/// One detection: class label, confidence and box.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Detection {
    /// Class id, or [`Detection::INVALID_LABEL`].
    pub label: i32,
    pub score: f32,
    pub bbox: BBox,
}

impl Detection {
    /// Label assigned to suppressed or degenerate rows.
    pub const INVALID_LABEL: i32 = -1;

    pub const fn new(label: i32, score: f32, bbox: BBox) -> Self {
        Self { label, score, bbox }
    }

    /// Placeholder row inserted for images without detections: label 0,
    /// score 0 and the unit box `(0, 0, 1, 1)`.
    pub const fn sentinel() -> Self {
        Self::new(0, 0.0, BBox::new(0.0, 0.0, 1.0, 1.0))
    }

    pub fn is_valid(&self) -> bool {
        self.label != Self::INVALID_LABEL
    }

    /// Flattens to `[label, score, x1, y1, x2, y2]`.
    pub fn to_row(&self) -> [f32; 6] {
        [
            self.label as f32,
            self.score,
            self.bbox.x1,
            self.bbox.y1,
            self.bbox.x2,
            self.bbox.y2,
        ]
    }

    /// Parses a `[label, score, x1, y1, x2, y2]` row; the label is rounded.
    pub fn from_row(row: [f32; 6]) -> Self {
        Self {
            label: row[0].round() as i32,
            score: row[1],
            bbox: BBox::new(row[2], row[3], row[4], row[5]),
        }
    }
}

/// Single-class NMS input row `[score, x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ScoredBox {
    pub score: f32,
    pub bbox: BBox,
}

impl ScoredBox {
    pub const fn new(score: f32, bbox: BBox) -> Self {
        Self { score, bbox }
    }

    pub fn from_row(row: [f32; 5]) -> Self {
        Self::new(row[0], BBox::new(row[1], row[2], row[3], row[4]))
    }

    pub fn to_row(&self) -> [f32; 5] {
        [
            self.score,
            self.bbox.x1,
            self.bbox.y1,
            self.bbox.x2,
            self.bbox.y2,
        ]
    }
}

/// Integer size of the image before the network resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct OriginShape {
    pub height: usize,
    pub width: usize,
}

impl OriginShape {
    pub const fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn height_f32(&self) -> f32 {
        self.height as f32
    }

    pub fn width_f32(&self) -> f32 {
        self.width as f32
    }
}

/// Per-image resize bookkeeping supplied alongside the head outputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageMeta {
    /// `(h, w)` of the network input without padding.
    pub im_shape: [f32; 2],
    /// `(scale_y, scale_x)` from the original image to `im_shape`.
    pub scale_factor: [f32; 2],
    /// `(h, w)` of the padded network input, when padding was applied.
    pub pad_shape: Option<[f32; 2]>,
}

impl ImageMeta {
    pub fn new(im_shape: [f32; 2], scale_factor: [f32; 2]) -> DetPostResult<Self> {
        let meta = Self {
            im_shape,
            scale_factor,
            pad_shape: None,
        };
        meta.validate()?;
        Ok(meta)
    }

    pub fn with_pad_shape(mut self, pad_shape: [f32; 2]) -> DetPostResult<Self> {
        self.pad_shape = Some(pad_shape);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> DetPostResult<()> {
        let shape_ok = |s: [f32; 2]| s.iter().all(|v| v.is_finite() && *v >= 0.0);
        if !shape_ok(self.im_shape) {
            return Err(DetPostError::InvalidConfig {
                reason: "im_shape must be finite and non-negative",
            });
        }
        if !self
            .scale_factor
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
        {
            return Err(DetPostError::InvalidConfig {
                reason: "scale_factor must be finite and positive",
            });
        }
        if let Some(pad) = self.pad_shape {
            if !shape_ok(pad) {
                return Err(DetPostError::InvalidConfig {
                    reason: "pad_shape must be finite and non-negative",
                });
            }
        }
        Ok(())
    }

    pub fn scale_y(&self) -> f32 {
        self.scale_factor[0]
    }

    pub fn scale_x(&self) -> f32 {
        self.scale_factor[1]
    }

    /// Reconstructs the original image size as `floor(im_shape / scale + 0.5)`.
    pub fn origin_shape(&self) -> OriginShape {
        let h = round_half_up(self.im_shape[0] / self.scale_factor[0]);
        let w = round_half_up(self.im_shape[1] / self.scale_factor[1]);
        OriginShape::new(h as usize, w as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::{Detection, ImageMeta, OriginShape};

    #[test]
    fn origin_shape_rounds_half_up() {
        let meta = ImageMeta::new([640.0, 640.0], [0.5, 0.5]).unwrap();
        assert_eq!(meta.origin_shape(), OriginShape::new(1280, 1280));

        let meta = ImageMeta::new([608.0, 810.0], [1.5, 1.5]).unwrap();
        // 405.33 -> 405, 540.0 -> 540
        assert_eq!(meta.origin_shape(), OriginShape::new(405, 540));
    }

    #[test]
    fn meta_rejects_zero_scale() {
        assert!(ImageMeta::new([10.0, 10.0], [0.0, 1.0]).is_err());
        assert!(ImageMeta::new([10.0, f32::NAN], [1.0, 1.0]).is_err());
    }

    #[test]
    fn rows_round_trip() {
        let row = [3.0, 0.75, 1.0, 2.0, 30.0, 40.0];
        let det = Detection::from_row(row);
        assert_eq!(det.label, 3);
        assert_eq!(det.to_row(), row);
        assert!(det.is_valid());
        assert_eq!(
            Detection::sentinel().to_row(),
            [0.0, 0.0, 0.0, 0.0, 1.0, 1.0]
        );
    }
}
