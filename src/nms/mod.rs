//! Greedy non-maximum suppression.
//!
//! Single-class NMS sorts boxes by descending score, then sweeps them in that
//! order: every box that is still alive suppresses all later alive boxes whose
//! overlap with it reaches the threshold. Overlap uses the inclusive pixel
//! convention, `(x2 - x1 + 1) * (y2 - y1 + 1)`. Survivors are returned in
//! ascending *original* index order, not score order.
//!
//! The sort is stable with `f32::total_cmp`, so boxes with equal scores are
//! visited in ascending original index order.

use std::fmt;
use std::str::FromStr;

use crate::bbox::intersection_inclusive;
use crate::detection::{Detection, ScoredBox};
use crate::trace::{trace_event, trace_span};
use crate::util::{DetPostError, DetPostResult};

pub(crate) mod scalar;
#[cfg(feature = "simd")]
pub(crate) mod simd;

pub use scalar::SuppressScalar;
#[cfg(feature = "simd")]
pub use simd::SuppressSimd;

/// Kernel used by [`nms_indices`]: SIMD with the `simd` feature, scalar otherwise.
#[cfg(not(feature = "simd"))]
pub use scalar::SuppressScalar as Suppress;
/// Kernel used by [`nms_indices`]: SIMD with the `simd` feature, scalar otherwise.
#[cfg(feature = "simd")]
pub use simd::SuppressSimd as Suppress;

/// Overlap measure used to decide suppression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MatchMetric {
    /// Intersection over union.
    #[default]
    Iou,
    /// Intersection over the smaller of the two areas.
    Ios,
}

impl MatchMetric {
    /// Overlap value for an intersection and the two inclusive areas.
    #[inline]
    pub fn ratio(self, inter: f32, area_a: f32, area_b: f32) -> f32 {
        match self {
            MatchMetric::Iou => inter / (area_a + area_b - inter),
            MatchMetric::Ios => inter / area_a.min(area_b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchMetric::Iou => "iou",
            MatchMetric::Ios => "ios",
        }
    }
}

impl FromStr for MatchMetric {
    type Err = DetPostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iou" => Ok(MatchMetric::Iou),
            "ios" => Ok(MatchMetric::Ios),
            _ => Err(DetPostError::UnknownMetric { name: s.to_owned() }),
        }
    }
}

impl fmt::Display for MatchMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-class NMS configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct NmsConfig {
    /// Classes `0..num_classes` are processed; other labels are dropped.
    pub num_classes: usize,
    /// Boxes whose overlap is `>=` this value are suppressed.
    pub match_threshold: f32,
    pub match_metric: MatchMetric,
    /// Run per-class sweeps in parallel (requires the `rayon` feature).
    pub parallel: bool,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            num_classes: 80,
            match_threshold: 0.6,
            match_metric: MatchMetric::Iou,
            parallel: false,
        }
    }
}

impl NmsConfig {
    pub fn validate(&self) -> DetPostResult<()> {
        if self.num_classes == 0 {
            return Err(DetPostError::InvalidConfig {
                reason: "num_classes must be at least 1",
            });
        }
        if self.match_threshold.is_nan() {
            return Err(DetPostError::InvalidConfig {
                reason: "match_threshold must not be NaN",
            });
        }
        Ok(())
    }

    /// Runs multi-class NMS on one image's detections.
    pub fn apply(&self, detections: &[Detection]) -> Vec<Detection> {
        #[cfg(feature = "rayon")]
        {
            if self.parallel {
                return multiclass_nms_par(
                    detections,
                    self.num_classes,
                    self.match_threshold,
                    self.match_metric,
                );
            }
        }
        multiclass_nms(
            detections,
            self.num_classes,
            self.match_threshold,
            self.match_metric,
        )
    }
}

/// Boxes laid out column-wise in descending score order.
pub struct SortedBoxes {
    order: Vec<usize>,
    x1: Vec<f32>,
    y1: Vec<f32>,
    x2: Vec<f32>,
    y2: Vec<f32>,
    area: Vec<f32>,
}

impl SortedBoxes {
    /// Sorts `dets` by descending score (stable) and splits the coordinates.
    pub fn new(dets: &[ScoredBox]) -> Self {
        let mut order: Vec<usize> = (0..dets.len()).collect();
        order.sort_by(|&a, &b| dets[b].score.total_cmp(&dets[a].score));

        let n = dets.len();
        let mut out = Self {
            order,
            x1: Vec::with_capacity(n),
            y1: Vec::with_capacity(n),
            x2: Vec::with_capacity(n),
            y2: Vec::with_capacity(n),
            area: Vec::with_capacity(n),
        };
        for &idx in &out.order {
            let b = dets[idx].bbox;
            out.x1.push(b.x1);
            out.y1.push(b.y1);
            out.x2.push(b.x2);
            out.y2.push(b.y2);
            out.area.push(b.area_inclusive());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Original index of the box at sorted position `pos`.
    pub fn original_index(&self, pos: usize) -> usize {
        self.order[pos]
    }

    pub fn x1(&self) -> &[f32] {
        &self.x1
    }

    pub fn y1(&self) -> &[f32] {
        &self.y1
    }

    pub fn x2(&self) -> &[f32] {
        &self.x2
    }

    pub fn y2(&self) -> &[f32] {
        &self.y2
    }

    /// Inclusive areas in sorted order.
    pub fn area(&self) -> &[f32] {
        &self.area
    }
}

/// Inner sweep of greedy NMS.
pub trait SuppressKernel {
    /// Marks every alive box after sorted position `pos` whose overlap with
    /// the box at `pos` is `>= threshold`.
    ///
    /// `suppressed` is indexed by sorted position.
    fn suppress_after(
        boxes: &SortedBoxes,
        pos: usize,
        threshold: f32,
        metric: MatchMetric,
        suppressed: &mut [bool],
    );
}

/// Runs greedy NMS with kernel `K`, returning kept original indices ascending.
pub fn nms_indices_with<K: SuppressKernel>(
    dets: &[ScoredBox],
    threshold: f32,
    metric: MatchMetric,
) -> Vec<usize> {
    if dets.is_empty() {
        return Vec::new();
    }

    let boxes = SortedBoxes::new(dets);
    let mut suppressed = vec![false; boxes.len()];
    for pos in 0..boxes.len() {
        if suppressed[pos] {
            continue;
        }
        K::suppress_after(&boxes, pos, threshold, metric, &mut suppressed);
    }

    let mut keep: Vec<usize> = suppressed
        .iter()
        .enumerate()
        .filter(|(_, &s)| !s)
        .map(|(pos, _)| boxes.original_index(pos))
        .collect();
    keep.sort_unstable();
    keep
}

/// Greedy NMS returning the kept original indices in ascending order.
pub fn nms_indices(dets: &[ScoredBox], threshold: f32, metric: MatchMetric) -> Vec<usize> {
    nms_indices_with::<Suppress>(dets, threshold, metric)
}

/// Greedy NMS returning the surviving rows in ascending original order.
pub fn nms(dets: &[ScoredBox], threshold: f32, metric: MatchMetric) -> Vec<ScoredBox> {
    nms_indices(dets, threshold, metric)
        .into_iter()
        .map(|idx| dets[idx])
        .collect()
}

/// Match value between two boxes, the quantity NMS compares to its threshold.
pub fn match_value(a: &ScoredBox, b: &ScoredBox, metric: MatchMetric) -> f32 {
    let inter = intersection_inclusive(&a.bbox, &b.bbox);
    metric.ratio(inter, a.bbox.area_inclusive(), b.bbox.area_inclusive())
}

fn group_by_class(detections: &[Detection], num_classes: usize) -> Vec<Vec<ScoredBox>> {
    let mut groups = vec![Vec::new(); num_classes];
    for det in detections {
        if det.label < 0 {
            continue;
        }
        if let Some(group) = groups.get_mut(det.label as usize) {
            group.push(ScoredBox::new(det.score, det.bbox));
        }
    }
    groups
}

fn tag_class(class_id: usize, kept: Vec<ScoredBox>) -> impl Iterator<Item = Detection> {
    kept.into_iter()
        .map(move |b| Detection::new(class_id as i32, b.score, b.bbox))
}

/// Runs NMS independently for classes `0..num_classes` and concatenates the
/// survivors in class order.
///
/// Boxes of different classes never suppress each other. Rows whose label is
/// outside `0..num_classes` are dropped.
pub fn multiclass_nms(
    detections: &[Detection],
    num_classes: usize,
    threshold: f32,
    metric: MatchMetric,
) -> Vec<Detection> {
    let _span = trace_span!("multiclass_nms", rows = detections.len(), classes = num_classes)
        .entered();

    let mut out = Vec::new();
    for (class_id, group) in group_by_class(detections, num_classes)
        .into_iter()
        .enumerate()
    {
        if group.is_empty() {
            continue;
        }
        out.extend(tag_class(class_id, nms(&group, threshold, metric)));
    }

    trace_event!("nms_kept", count = out.len());
    out
}

/// Parallel [`multiclass_nms`]: classes are swept concurrently and merged in
/// class order, so the output is identical.
#[cfg(feature = "rayon")]
pub fn multiclass_nms_par(
    detections: &[Detection],
    num_classes: usize,
    threshold: f32,
    metric: MatchMetric,
) -> Vec<Detection> {
    use rayon::prelude::*;

    let _span = trace_span!(
        "multiclass_nms",
        rows = detections.len(),
        classes = num_classes,
        parallel = true
    )
    .entered();

    let per_class: Vec<Vec<ScoredBox>> = group_by_class(detections, num_classes)
        .into_par_iter()
        .map(|group| nms(&group, threshold, metric))
        .collect();

    let mut out = Vec::new();
    for (class_id, kept) in per_class.into_iter().enumerate() {
        out.extend(tag_class(class_id, kept));
    }

    trace_event!("nms_kept", count = out.len());
    out
}
