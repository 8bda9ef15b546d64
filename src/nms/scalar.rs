//! Scalar reference kernel for the suppression sweep.

use crate::nms::{MatchMetric, SortedBoxes, SuppressKernel};

/// Scalar suppression kernel.
pub struct SuppressScalar;

impl SuppressKernel for SuppressScalar {
    fn suppress_after(
        boxes: &SortedBoxes,
        pos: usize,
        threshold: f32,
        metric: MatchMetric,
        suppressed: &mut [bool],
    ) {
        let (x1, y1, x2, y2, area) = (boxes.x1(), boxes.y1(), boxes.x2(), boxes.y2(), boxes.area());
        let ix1 = x1[pos];
        let iy1 = y1[pos];
        let ix2 = x2[pos];
        let iy2 = y2[pos];
        let iarea = area[pos];

        for j in pos + 1..boxes.len() {
            if suppressed[j] {
                continue;
            }
            let w = (ix2.min(x2[j]) - ix1.max(x1[j]) + 1.0).max(0.0);
            let h = (iy2.min(y2[j]) - iy1.max(y1[j]) + 1.0).max(0.0);
            let inter = w * h;
            if metric.ratio(inter, iarea, area[j]) >= threshold {
                suppressed[j] = true;
            }
        }
    }
}
