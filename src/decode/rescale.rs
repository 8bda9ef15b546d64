//! Rescaling of NMS output for two-stage and anchor-based heads.
//!
//! The head's own decoder and NMS run upstream (or through
//! [`HeadOutput::Candidates`]); this stage maps boxes from the network input
//! resolution back to the original image, clips them, and invalidates boxes
//! that became empty. Rows are never removed: an empty box keeps its row with
//! label `-1` so row counts stay fixed.

use crate::detection::{BatchBuffer, Detection, ImageMeta, OriginShape};
use crate::nms::NmsConfig;
use crate::trace::{trace_event, trace_span};
use crate::util::{DetPostError, DetPostResult};

/// Configuration for [`BBoxPostProcess`].
#[derive(Clone, Debug, PartialEq)]
pub struct BBoxPostProcessConfig {
    pub num_classes: usize,
    /// NMS applied to [`HeadOutput::Candidates`].
    pub nms: Option<NmsConfig>,
    /// Single-image export graph: no sentinel padding per image, one trailing
    /// sentinel row appended by [`BBoxPostProcess::run`].
    pub export_onnx: bool,
    /// Skip rescaling entirely; the target hardware post-processes itself.
    pub export_eb: bool,
    /// Row substituted for images without detections.
    pub sentinel: Detection,
    /// Boxes with a side `<= min_size` after clipping are invalidated.
    pub min_size: f32,
    /// Process images in parallel (requires the `rayon` feature).
    pub parallel: bool,
}

impl Default for BBoxPostProcessConfig {
    fn default() -> Self {
        Self {
            num_classes: 80,
            nms: None,
            export_onnx: false,
            export_eb: false,
            sentinel: Detection::sentinel(),
            min_size: 0.0,
            parallel: false,
        }
    }
}

impl BBoxPostProcessConfig {
    pub fn validate(&self) -> DetPostResult<()> {
        if self.num_classes == 0 {
            return Err(DetPostError::InvalidConfig {
                reason: "num_classes must be at least 1",
            });
        }
        if !(self.min_size.is_finite() && self.min_size >= 0.0) {
            return Err(DetPostError::InvalidConfig {
                reason: "min_size must be finite and non-negative",
            });
        }
        if let Some(nms) = &self.nms {
            nms.validate()?;
            if nms.num_classes != self.num_classes {
                return Err(DetPostError::InvalidConfig {
                    reason: "nms.num_classes must equal num_classes",
                });
            }
        }
        Ok(())
    }
}

/// Head output handed to [`BBoxPostProcess::run`].
#[derive(Clone, Debug)]
pub enum HeadOutput {
    /// Decoded but unsuppressed candidates; NMS still has to run.
    Candidates(BatchBuffer),
    /// Final detections produced by a decoder that already suppressed.
    Decoded(BatchBuffer),
}

/// Result of [`BBoxPostProcess::get_pred`].
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    /// NMS rows after sentinel substitution, in network input coordinates.
    pub nms_rows: BatchBuffer,
    /// Rescaled, clipped rows in original image coordinates.
    pub detections: BatchBuffer,
    /// Original image size per image, for the mask stage.
    pub origin_shapes: Vec<OriginShape>,
}

impl Prediction {
    /// Origin shape repeated for every row of its image.
    pub fn row_origin_shapes(&self) -> Vec<OriginShape> {
        let mut out = Vec::with_capacity(self.detections.len());
        for (&count, &shape) in self.detections.counts().iter().zip(&self.origin_shapes) {
            out.extend(std::iter::repeat(shape).take(count));
        }
        out
    }
}

/// Maps one detection back to the original image and clips it.
///
/// Empty boxes (a side `<= min_size`) keep their score and clipped box but
/// get label `-1`.
pub fn rescale_detection(
    det: &Detection,
    meta: &ImageMeta,
    origin: OriginShape,
    min_size: f32,
) -> Detection {
    let bbox = det
        .bbox
        .unscale(meta.scale_x(), meta.scale_y())
        .clip(origin.width_f32(), origin.height_f32());
    let label = if bbox.is_nonempty(min_size) {
        det.label
    } else {
        Detection::INVALID_LABEL
    };
    Detection::new(label, det.score, bbox)
}

/// Two-stage box post-processing: optional NMS, sentinel padding, rescale,
/// clip and empty-box filtering.
#[derive(Clone, Debug)]
pub struct BBoxPostProcess {
    cfg: BBoxPostProcessConfig,
}

impl BBoxPostProcess {
    pub fn new(cfg: BBoxPostProcessConfig) -> DetPostResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &BBoxPostProcessConfig {
        &self.cfg
    }

    /// Suppresses candidates when needed and, in export mode, appends the
    /// trailing sentinel row.
    pub fn run(&self, head: HeadOutput) -> DetPostResult<BatchBuffer> {
        let mut out = match head {
            HeadOutput::Candidates(candidates) => {
                let nms = self.cfg.nms.as_ref().ok_or(DetPostError::InvalidConfig {
                    reason: "candidates require an nms config",
                })?;
                let _span = trace_span!("bbox_nms", images = candidates.num_images()).entered();
                self.suppress(&candidates, nms)
            }
            HeadOutput::Decoded(decoded) => decoded,
        };

        if self.cfg.export_onnx {
            out.append_sentinel(&self.cfg.sentinel)?;
        }
        Ok(out)
    }

    fn suppress(&self, candidates: &BatchBuffer, nms: &NmsConfig) -> BatchBuffer {
        #[cfg(feature = "rayon")]
        {
            if self.cfg.parallel {
                use rayon::prelude::*;
                let images: Vec<&[Detection]> = candidates.images().collect();
                let kept: Vec<Vec<Detection>> =
                    images.par_iter().map(|image| nms.apply(image)).collect();
                return BatchBuffer::from_images(kept);
            }
        }
        BatchBuffer::from_images(candidates.images().map(|image| nms.apply(image)))
    }

    /// Rescales, clips and filters NMS output.
    ///
    /// `metas` holds one entry per image. In export mode the batch must
    /// contain exactly one image.
    pub fn get_pred(&self, nms_out: &BatchBuffer, metas: &[ImageMeta]) -> DetPostResult<Prediction> {
        let _span = trace_span!(
            "get_pred",
            images = nms_out.num_images(),
            rows = nms_out.len()
        )
        .entered();

        if self.cfg.export_eb {
            check_batch(nms_out.num_images(), metas.len(), "get_pred (bypass)")?;
            return Ok(Prediction {
                nms_rows: nms_out.clone(),
                detections: nms_out.clone(),
                origin_shapes: metas.iter().map(ImageMeta::origin_shape).collect(),
            });
        }

        if self.cfg.export_onnx {
            return self.get_pred_single(nms_out, metas);
        }

        let padded = nms_out.with_sentinels(&self.cfg.sentinel);
        check_batch(padded.num_images(), metas.len(), "get_pred")?;
        let origin_shapes: Vec<OriginShape> = metas.iter().map(ImageMeta::origin_shape).collect();
        let detections = self.rescale_batch(&padded, metas, &origin_shapes);

        let invalid = detections.rows().iter().filter(|d| !d.is_valid()).count();
        trace_event!("rescaled", rows = detections.len(), invalid = invalid);

        Ok(Prediction {
            nms_rows: padded,
            detections,
            origin_shapes,
        })
    }

    /// Batch-size-1 fast path used for export graphs.
    fn get_pred_single(
        &self,
        nms_out: &BatchBuffer,
        metas: &[ImageMeta],
    ) -> DetPostResult<Prediction> {
        check_batch(1, metas.len(), "get_pred (export)")?;
        check_batch(1, nms_out.num_images(), "get_pred (export)")?;

        let meta = &metas[0];
        let origin = meta.origin_shape();
        let rows: Vec<Detection> = nms_out
            .rows()
            .iter()
            .map(|det| rescale_detection(det, meta, origin, self.cfg.min_size))
            .collect();
        let detections = BatchBuffer::from_parts(rows, nms_out.counts().to_vec())?;

        Ok(Prediction {
            nms_rows: nms_out.clone(),
            detections,
            origin_shapes: vec![origin],
        })
    }

    fn rescale_batch(
        &self,
        batch: &BatchBuffer,
        metas: &[ImageMeta],
        origin_shapes: &[OriginShape],
    ) -> BatchBuffer {
        let min_size = self.cfg.min_size;
        let rescale_image = |(image, (meta, &origin)): (&[Detection], (&ImageMeta, &OriginShape))| {
            image
                .iter()
                .map(|det| rescale_detection(det, meta, origin, min_size))
                .collect::<Vec<_>>()
        };

        #[cfg(feature = "rayon")]
        {
            if self.cfg.parallel {
                use rayon::prelude::*;
                let images: Vec<&[Detection]> = batch.images().collect();
                let out: Vec<Vec<Detection>> = images
                    .into_par_iter()
                    .zip(metas.par_iter().zip(origin_shapes.par_iter()))
                    .map(rescale_image)
                    .collect();
                return BatchBuffer::from_images(out);
            }
        }

        BatchBuffer::from_images(
            batch
                .images()
                .zip(metas.iter().zip(origin_shapes))
                .map(rescale_image),
        )
    }
}

fn check_batch(expected: usize, got: usize, context: &'static str) -> DetPostResult<()> {
    if expected != got {
        return Err(DetPostError::BatchSizeMismatch {
            expected,
            got,
            context,
        });
    }
    Ok(())
}
