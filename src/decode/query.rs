//! Decoding for query-based (DETR style) heads.
//!
//! Every query predicts one normalized `cxcywh` box and one class
//! distribution. Instead of NMS the decoder keeps the best `num_top_queries`
//! scores per image. With a mask head each selected query also yields a
//! binary mask at original resolution.

use std::fmt;
use std::str::FromStr;

use crate::bbox::BBox;
use crate::candidate::topk::{top_k, Ranked};
use crate::detection::{BatchBuffer, Detection, ImageMeta, OriginShape};
use crate::map::{MapStack, MapView};
use crate::mask::{resize_bilinear, MaskCanvas};
use crate::trace::{trace_event, trace_span};
use crate::util::math::{argmax, sigmoid, softmax_into};
use crate::util::{DetPostError, DetPostResult};

/// Upsampling factor applied to raw mask logits before cropping.
const MASK_UPSAMPLE: usize = 4;

/// Target frame for normalized boxes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoxDecodeType {
    /// Boxes are normalized to the unpadded image.
    #[default]
    Origin,
    /// Boxes are normalized to the padded network input.
    Pad,
}

impl BoxDecodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Pad => "pad",
        }
    }
}

impl FromStr for BoxDecodeType {
    type Err = DetPostError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "origin" => Ok(Self::Origin),
            "pad" => Ok(Self::Pad),
            _ => Err(DetPostError::UnknownDecodeType {
                name: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for BoxDecodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How class logits turn into scores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScoreMode {
    /// Independent per-class sigmoid (focal-loss heads).
    Sigmoid,
    /// Softmax over classes plus a trailing background channel.
    #[default]
    Softmax,
}

impl ScoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sigmoid => "sigmoid",
            Self::Softmax => "softmax",
        }
    }

    /// Number of logit channels a head must emit for `num_classes`.
    pub fn logit_channels(self, num_classes: usize) -> usize {
        match self {
            Self::Sigmoid => num_classes,
            Self::Softmax => num_classes + 1,
        }
    }
}

impl FromStr for ScoreMode {
    type Err = DetPostError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sigmoid" | "focal" => Ok(Self::Sigmoid),
            "softmax" => Ok(Self::Softmax),
            _ => Err(DetPostError::UnknownScoreMode {
                name: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for ScoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for [`QueryPostProcess`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDecodeConfig {
    pub num_classes: usize,
    /// Detections kept per image.
    pub num_top_queries: usize,
    /// Only the first `Q / (dual_groups + 1)` queries are decoded.
    pub dual_queries: bool,
    pub dual_groups: usize,
    pub score_mode: ScoreMode,
    pub decode_type: BoxDecodeType,
    /// Decode mask logits for every selected query.
    pub with_mask: bool,
    /// Mask probabilities strictly above this are foreground.
    pub mask_threshold: f32,
    /// Multiply scores by the mean foreground mask probability.
    pub use_avg_mask_score: bool,
    /// Process images in parallel (requires the `rayon` feature).
    pub parallel: bool,
}

impl Default for QueryDecodeConfig {
    fn default() -> Self {
        Self {
            num_classes: 80,
            num_top_queries: 100,
            dual_queries: false,
            dual_groups: 0,
            score_mode: ScoreMode::Softmax,
            decode_type: BoxDecodeType::Origin,
            with_mask: false,
            mask_threshold: 0.5,
            use_avg_mask_score: false,
            parallel: false,
        }
    }
}

impl QueryDecodeConfig {
    pub fn validate(&self) -> DetPostResult<()> {
        if self.num_classes == 0 {
            return Err(DetPostError::InvalidConfig {
                reason: "num_classes must be at least 1",
            });
        }
        if self.num_top_queries == 0 {
            return Err(DetPostError::InvalidConfig {
                reason: "num_top_queries must be at least 1",
            });
        }
        if !self.mask_threshold.is_finite() {
            return Err(DetPostError::InvalidConfig {
                reason: "mask_threshold must be finite",
            });
        }
        Ok(())
    }

    /// Queries actually decoded out of `num_queries`.
    pub fn active_queries(&self, num_queries: usize) -> usize {
        if self.dual_queries {
            num_queries / (self.dual_groups + 1)
        } else {
            num_queries
        }
    }
}

/// Borrowed raw outputs of a query head.
///
/// `boxes` is `[batch, queries, 4]`, `logits` is `[batch, queries, channels]`
/// and the optional masks are `[batch, queries, height, width]`, all
/// row-major.
#[derive(Clone, Copy, Debug)]
pub struct QueryTensors<'a> {
    boxes: &'a [f32],
    logits: &'a [f32],
    masks: Option<MapStack<'a, f32>>,
    batch: usize,
    num_queries: usize,
    num_logits: usize,
}

impl<'a> QueryTensors<'a> {
    pub fn new(
        boxes: &'a [f32],
        logits: &'a [f32],
        batch: usize,
        num_queries: usize,
        num_logits: usize,
    ) -> DetPostResult<Self> {
        let rows = batch
            .checked_mul(num_queries)
            .ok_or(DetPostError::InvalidConfig {
                reason: "batch * num_queries overflows",
            })?;
        check_len(boxes.len(), rows.saturating_mul(4), "query boxes")?;
        check_len(
            logits.len(),
            rows.saturating_mul(num_logits),
            "query logits",
        )?;
        Ok(Self {
            boxes,
            logits,
            masks: None,
            batch,
            num_queries,
            num_logits,
        })
    }

    /// Attaches `[batch, queries, height, width]` mask logits.
    pub fn with_masks(mut self, masks: &'a [f32], height: usize, width: usize) -> DetPostResult<Self> {
        let stack = MapStack::new(masks, self.batch * self.num_queries, width, height)?;
        self.masks = Some(stack);
        Ok(self)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    pub fn num_logits(&self) -> usize {
        self.num_logits
    }

    pub fn has_masks(&self) -> bool {
        self.masks.is_some()
    }

    fn query_box(&self, image: usize, query: usize) -> [f32; 4] {
        let start = (image * self.num_queries + query) * 4;
        let b = &self.boxes[start..start + 4];
        [b[0], b[1], b[2], b[3]]
    }

    fn query_logits(&self, image: usize, query: usize) -> &'a [f32] {
        let start = (image * self.num_queries + query) * self.num_logits;
        &self.logits[start..start + self.num_logits]
    }

    fn query_mask(&self, image: usize, query: usize) -> Option<MapView<'a, f32>> {
        self.masks
            .as_ref()
            .and_then(|stack| stack.map(image * self.num_queries + query))
    }
}

fn check_len(got: usize, expected: usize, context: &'static str) -> DetPostResult<()> {
    if got != expected {
        return Err(DetPostError::ShapeMismatch {
            expected,
            got,
            context,
        });
    }
    Ok(())
}

/// Output of [`QueryPostProcess::run`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPrediction {
    /// Selected detections in original image coordinates, best first.
    pub detections: BatchBuffer,
    pub origin_shapes: Vec<OriginShape>,
    /// One canvas per image, `(rows, origin_h, origin_w)`, with `with_mask`.
    pub masks: Option<Vec<MaskCanvas>>,
}

/// A query picked by score selection.
#[derive(Clone, Copy, Debug)]
struct Selected {
    query: usize,
    label: usize,
    score: f32,
}

/// Decoder for query-based heads.
#[derive(Clone, Debug)]
pub struct QueryPostProcess {
    cfg: QueryDecodeConfig,
}

impl QueryPostProcess {
    pub fn new(cfg: QueryDecodeConfig) -> DetPostResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &QueryDecodeConfig {
        &self.cfg
    }

    /// Decodes a batch. `metas` holds one entry per image.
    pub fn run(&self, tensors: &QueryTensors<'_>, metas: &[ImageMeta]) -> DetPostResult<QueryPrediction> {
        let _span = trace_span!(
            "query_decode",
            images = tensors.batch(),
            queries = tensors.num_queries()
        )
        .entered();

        if metas.len() != tensors.batch() {
            return Err(DetPostError::BatchSizeMismatch {
                expected: tensors.batch(),
                got: metas.len(),
                context: "query decode metas",
            });
        }
        check_len(
            tensors.num_logits(),
            self.cfg.score_mode.logit_channels(self.cfg.num_classes),
            "query logit channels",
        )?;
        if self.cfg.with_mask && !tensors.has_masks() {
            return Err(DetPostError::MissingMasks);
        }

        let decode = |image: usize| self.decode_image(tensors, image, &metas[image]);

        #[cfg(feature = "rayon")]
        let per_image: Vec<(Vec<Detection>, Option<MaskCanvas>)> = if self.cfg.parallel {
            use rayon::prelude::*;
            (0..tensors.batch())
                .into_par_iter()
                .map(decode)
                .collect::<DetPostResult<_>>()?
        } else {
            (0..tensors.batch()).map(decode).collect::<DetPostResult<_>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let per_image: Vec<(Vec<Detection>, Option<MaskCanvas>)> =
            (0..tensors.batch()).map(decode).collect::<DetPostResult<_>>()?;

        let mut detections = BatchBuffer::new();
        let mut masks = Vec::with_capacity(per_image.len());
        for (rows, canvas) in per_image {
            detections.push_image(&rows);
            masks.extend(canvas);
        }
        trace_event!("queries_selected", rows = detections.len());

        Ok(QueryPrediction {
            detections,
            origin_shapes: metas.iter().map(ImageMeta::origin_shape).collect(),
            masks: self.cfg.with_mask.then_some(masks),
        })
    }

    fn decode_image(
        &self,
        tensors: &QueryTensors<'_>,
        image: usize,
        meta: &ImageMeta,
    ) -> DetPostResult<(Vec<Detection>, Option<MaskCanvas>)> {
        let queries = self.cfg.active_queries(tensors.num_queries());
        let origin = meta.origin_shape();
        let (sx, sy) = self.box_scale(meta, origin)?;

        let selected = match self.cfg.score_mode {
            ScoreMode::Sigmoid => self.select_sigmoid(tensors, image, queries),
            ScoreMode::Softmax => self.select_softmax(tensors, image, queries),
        };

        let mut rows: Vec<Detection> = selected
            .iter()
            .map(|sel| {
                let bbox = BBox::from_cxcywh(tensors.query_box(image, sel.query)).scale(sx, sy);
                Detection::new(sel.label as i32, sel.score, bbox)
            })
            .collect();

        if !self.cfg.with_mask {
            return Ok((rows, None));
        }

        let plane = origin.height * origin.width;
        let mut data = Vec::with_capacity(selected.len() * plane);
        for (sel, row) in selected.iter().zip(rows.iter_mut()) {
            let logits = tensors
                .query_mask(image, sel.query)
                .ok_or(DetPostError::MissingMasks)?;
            let (binary, mask_score) = self.decode_mask(logits, meta, origin)?;
            if self.cfg.use_avg_mask_score {
                row.score *= mask_score;
            }
            data.extend(binary);
        }
        let canvas = MaskCanvas::from_vec(data, selected.len(), origin.height, origin.width)?;
        Ok((rows, Some(canvas)))
    }

    /// Multipliers that map normalized boxes to original image pixels.
    fn box_scale(&self, meta: &ImageMeta, origin: OriginShape) -> DetPostResult<(f32, f32)> {
        match self.cfg.decode_type {
            BoxDecodeType::Origin => Ok((origin.width_f32(), origin.height_f32())),
            BoxDecodeType::Pad => {
                let pad = meta.pad_shape.ok_or(DetPostError::InvalidConfig {
                    reason: "pad decode requires pad_shape in every image meta",
                })?;
                Ok((
                    pad[1] / meta.im_shape[1] * origin.width_f32(),
                    pad[0] / meta.im_shape[0] * origin.height_f32(),
                ))
            }
        }
    }

    /// Global top-K over every `(query, class)` score.
    fn select_sigmoid(&self, tensors: &QueryTensors<'_>, image: usize, queries: usize) -> Vec<Selected> {
        let classes = self.cfg.num_classes;
        let mut scores = Vec::with_capacity(queries * classes);
        for query in 0..queries {
            scores.extend(tensors.query_logits(image, query).iter().map(|&v| sigmoid(v)));
        }
        top_k(&scores, self.cfg.num_top_queries)
            .into_iter()
            .map(|Ranked { index, score }| Selected {
                query: index / classes,
                label: index % classes,
                score,
            })
            .collect()
    }

    /// Best foreground class per query, then top-K over queries if needed.
    fn select_softmax(&self, tensors: &QueryTensors<'_>, image: usize, queries: usize) -> Vec<Selected> {
        let classes = self.cfg.num_classes;
        let mut probs = vec![0.0f32; tensors.num_logits()];
        let mut best = Vec::with_capacity(queries);
        for query in 0..queries {
            softmax_into(tensors.query_logits(image, query), &mut probs);
            let (label, score) = argmax(&probs[..classes]).unwrap_or((0, 0.0));
            best.push(Selected { query, label, score });
        }
        if queries <= self.cfg.num_top_queries {
            return best;
        }
        let scores: Vec<f32> = best.iter().map(|s| s.score).collect();
        top_k(&scores, self.cfg.num_top_queries)
            .into_iter()
            .map(|ranked| best[ranked.index])
            .collect()
    }

    /// Upsamples, crops, resizes and binarizes one query's mask.
    ///
    /// Returns the binary plane and the mean probability over its foreground.
    fn decode_mask(
        &self,
        logits: MapView<'_, f32>,
        meta: &ImageMeta,
        origin: OriginShape,
    ) -> DetPostResult<(Vec<i32>, f32)> {
        let up = resize_bilinear(
            logits,
            logits.width() * MASK_UPSAMPLE,
            logits.height() * MASK_UPSAMPLE,
        )?;
        let crop = up
            .view()
            .crop_top_left(meta.im_shape[1] as usize, meta.im_shape[0] as usize)?;
        let full = resize_bilinear(crop, origin.width, origin.height)?;

        let threshold = self.cfg.mask_threshold;
        let mut fg_prob = 0.0f32;
        let mut fg_count = 0.0f32;
        let binary = full
            .data()
            .iter()
            .map(|&v| {
                let prob = sigmoid(v);
                let fg = prob > threshold;
                if fg {
                    fg_prob += prob;
                    fg_count += 1.0;
                }
                i32::from(fg)
            })
            .collect();
        Ok((binary, fg_prob / (fg_count + 1e-6)))
    }
}
