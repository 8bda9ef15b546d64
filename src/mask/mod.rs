//! Instance mask post-processing.
//!
//! Each detection carries a small `Kh x Kw` logit map predicted inside its
//! box. [`MaskPostProcess`] pastes every map onto its image at original
//! resolution and binarizes it. Planes of a batch share one canvas sized to
//! the largest image; cells outside an image's own extent stay at `-1`.

pub mod paste;
pub mod resize;

use crate::detection::{BatchBuffer, Detection, OriginShape};
use crate::map::MapStack;
use crate::trace::{trace_event, trace_span};
use crate::util::{DetPostError, DetPostResult};

pub use paste::{binarize, paste_mask};
pub use resize::resize_bilinear;

/// Value of canvas cells outside an image's own extent.
pub const CANVAS_FILL: i32 = -1;

/// Binary masks for a set of detections, `[count, height, width]` row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskCanvas {
    data: Vec<i32>,
    count: usize,
    height: usize,
    width: usize,
}

impl MaskCanvas {
    /// Creates `count` planes of `height x width` filled with `value`.
    pub fn filled(value: i32, count: usize, height: usize, width: usize) -> DetPostResult<Self> {
        let len = count
            .checked_mul(height)
            .and_then(|v| v.checked_mul(width))
            .ok_or(DetPostError::InvalidDimensions { width, height })?;
        Ok(Self {
            data: vec![value; len],
            count,
            height,
            width,
        })
    }

    /// Wraps a buffer holding exactly `count * height * width` values.
    pub fn from_vec(
        data: Vec<i32>,
        count: usize,
        height: usize,
        width: usize,
    ) -> DetPostResult<Self> {
        let needed = count
            .checked_mul(height)
            .and_then(|v| v.checked_mul(width))
            .ok_or(DetPostError::InvalidDimensions { width, height })?;
        if data.len() != needed {
            return Err(DetPostError::ShapeMismatch {
                expected: needed,
                got: data.len(),
                context: "mask canvas length",
            });
        }
        Ok(Self {
            data,
            count,
            height,
            width,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[i32] {
        &self.data
    }

    fn plane_len(&self) -> usize {
        self.height * self.width
    }

    /// Plane `idx` as a row-major slice.
    pub fn plane(&self, idx: usize) -> Option<&[i32]> {
        if idx >= self.count {
            return None;
        }
        let len = self.plane_len();
        self.data.get(idx * len..(idx + 1) * len)
    }

    /// Value at `(x, y)` of plane `idx`.
    pub fn get(&self, idx: usize, x: usize, y: usize) -> Option<i32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.plane(idx).map(|plane| plane[y * self.width + x])
    }

    pub fn into_vec(self) -> Vec<i32> {
        self.data
    }
}

/// Executor for the per-detection paste step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleBackend {
    /// Sequential loop over detections.
    #[default]
    Scalar,
    /// Rayon across detections; sequential without the `rayon` feature.
    Parallel,
}

impl std::str::FromStr for SampleBackend {
    type Err = DetPostError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "scalar" | "cpu" => Ok(Self::Scalar),
            "parallel" => Ok(Self::Parallel),
            _ => Err(DetPostError::InvalidConfig {
                reason: "backend must be \"scalar\" or \"parallel\"",
            }),
        }
    }
}

/// Configuration for [`MaskPostProcess`].
#[derive(Clone, Debug, PartialEq)]
pub struct MaskPostProcessConfig {
    /// Pasted values `>= binary_threshold` become foreground.
    pub binary_threshold: f32,
    /// Single-image export graph: canvas is exactly the image size.
    pub export_onnx: bool,
    pub backend: SampleBackend,
}

impl Default for MaskPostProcessConfig {
    fn default() -> Self {
        Self {
            binary_threshold: 0.5,
            export_onnx: false,
            backend: SampleBackend::Scalar,
        }
    }
}

impl MaskPostProcessConfig {
    pub fn validate(&self) -> DetPostResult<()> {
        if !self.binary_threshold.is_finite() {
            return Err(DetPostError::InvalidConfig {
                reason: "binary_threshold must be finite",
            });
        }
        Ok(())
    }
}

/// One paste job: the detection and the extent of its image.
#[derive(Clone, Copy)]
struct PasteJob<'a> {
    det: &'a Detection,
    shape: OriginShape,
}

/// Pastes per-detection mask logits onto full-resolution canvases.
#[derive(Clone, Debug)]
pub struct MaskPostProcess {
    cfg: MaskPostProcessConfig,
}

impl MaskPostProcess {
    pub fn new(cfg: MaskPostProcessConfig) -> DetPostResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &MaskPostProcessConfig {
        &self.cfg
    }

    /// Pastes one mask per detection row.
    ///
    /// `mask_logits` holds one map per row of `detections`, in row order;
    /// `origin_shapes` holds one entry per image.
    pub fn run(
        &self,
        mask_logits: MapStack<'_, f32>,
        detections: &BatchBuffer,
        origin_shapes: &[OriginShape],
    ) -> DetPostResult<MaskCanvas> {
        let _span = trace_span!(
            "mask_paste",
            masks = mask_logits.count(),
            images = origin_shapes.len()
        )
        .entered();

        if mask_logits.count() != detections.len() {
            return Err(DetPostError::ShapeMismatch {
                expected: detections.len(),
                got: mask_logits.count(),
                context: "mask logits per detection",
            });
        }
        if origin_shapes.len() != detections.num_images() {
            return Err(DetPostError::BatchSizeMismatch {
                expected: detections.num_images(),
                got: origin_shapes.len(),
                context: "mask origin shapes",
            });
        }
        if self.cfg.export_onnx && origin_shapes.len() != 1 {
            return Err(DetPostError::BatchSizeMismatch {
                expected: 1,
                got: origin_shapes.len(),
                context: "mask paste (export)",
            });
        }

        let height = origin_shapes.iter().map(|s| s.height).max().unwrap_or(0);
        let width = origin_shapes.iter().map(|s| s.width).max().unwrap_or(0);
        let mut canvas = MaskCanvas::filled(CANVAS_FILL, detections.len(), height, width)?;
        if canvas.plane_len() == 0 {
            return Ok(canvas);
        }

        let jobs: Vec<PasteJob<'_>> = detections
            .images()
            .zip(origin_shapes)
            .flat_map(|(image, &shape)| image.iter().map(move |det| PasteJob { det, shape }))
            .collect();

        let threshold = self.cfg.binary_threshold;
        let paste_one = |idx: usize, plane: &mut [i32]| -> DetPostResult<()> {
            let missing = DetPostError::ShapeMismatch {
                expected: jobs.len(),
                got: mask_logits.count(),
                context: "mask logits per detection",
            };
            let job = jobs.get(idx).ok_or_else(|| missing.clone())?;
            let mask = mask_logits.map(idx).ok_or(missing)?;
            paste::paste_binary_into(
                mask,
                &job.det.bbox,
                job.shape.width,
                job.shape.height,
                threshold,
                plane,
                width,
            )
        };
        let plane_len = canvas.plane_len();
        for_each_plane(&mut canvas.data, plane_len, self.cfg.backend, paste_one)?;

        let foreground = canvas.data.iter().filter(|&&v| v == 1).count();
        trace_event!("masks_pasted", planes = canvas.count(), foreground = foreground);
        Ok(canvas)
    }
}

fn for_each_plane_seq<F>(data: &mut [i32], plane_len: usize, f: F) -> DetPostResult<()>
where
    F: Fn(usize, &mut [i32]) -> DetPostResult<()>,
{
    for (idx, plane) in data.chunks_mut(plane_len).enumerate() {
        f(idx, plane)?;
    }
    Ok(())
}

#[cfg(feature = "rayon")]
fn for_each_plane<F>(
    data: &mut [i32],
    plane_len: usize,
    backend: SampleBackend,
    f: F,
) -> DetPostResult<()>
where
    F: Fn(usize, &mut [i32]) -> DetPostResult<()> + Send + Sync,
{
    if backend == SampleBackend::Parallel {
        use rayon::prelude::*;
        return data
            .par_chunks_mut(plane_len)
            .enumerate()
            .try_for_each(|(idx, plane)| f(idx, plane));
    }
    for_each_plane_seq(data, plane_len, f)
}

#[cfg(not(feature = "rayon"))]
fn for_each_plane<F>(
    data: &mut [i32],
    plane_len: usize,
    _backend: SampleBackend,
    f: F,
) -> DetPostResult<()>
where
    F: Fn(usize, &mut [i32]) -> DetPostResult<()>,
{
    for_each_plane_seq(data, plane_len, f)
}
