//! SIMD suppression kernel using the `wide` crate.
//!
//! Overlap values against the current box are computed for 8 later boxes at
//! a time with `f32x8`. Boxes that are already suppressed are evaluated too
//! and simply left as they are, so the result matches the scalar kernel.

use crate::nms::{MatchMetric, SortedBoxes, SuppressKernel};
use wide::f32x8;

const LANES: usize = 8;

/// Load 8 f32 values into f32x8.
#[inline]
fn load_f32x8(slice: &[f32]) -> f32x8 {
    f32x8::from([
        slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
    ])
}

/// SIMD suppression kernel.
pub struct SuppressSimd;

impl SuppressKernel for SuppressSimd {
    fn suppress_after(
        boxes: &SortedBoxes,
        pos: usize,
        threshold: f32,
        metric: MatchMetric,
        suppressed: &mut [bool],
    ) {
        let (x1, y1, x2, y2, area) = (boxes.x1(), boxes.y1(), boxes.x2(), boxes.y2(), boxes.area());
        let n = boxes.len();

        let ix1 = f32x8::splat(x1[pos]);
        let iy1 = f32x8::splat(y1[pos]);
        let ix2 = f32x8::splat(x2[pos]);
        let iy2 = f32x8::splat(y2[pos]);
        let iarea = f32x8::splat(area[pos]);
        let one = f32x8::splat(1.0);
        let zero = f32x8::splat(0.0);

        let mut j = pos + 1;
        while j + LANES <= n {
            let w = (ix2.min(load_f32x8(&x2[j..])) - ix1.max(load_f32x8(&x1[j..])) + one).max(zero);
            let h = (iy2.min(load_f32x8(&y2[j..])) - iy1.max(load_f32x8(&y1[j..])) + one).max(zero);
            let inter = w * h;
            let jarea = load_f32x8(&area[j..]);
            let value = match metric {
                MatchMetric::Iou => inter / (iarea + jarea - inter),
                MatchMetric::Ios => inter / iarea.min(jarea),
            };
            for (lane, v) in value.to_array().into_iter().enumerate() {
                if v >= threshold {
                    suppressed[j + lane] = true;
                }
            }
            j += LANES;
        }

        let (sx1, sy1, sx2, sy2, sarea) = (x1[pos], y1[pos], x2[pos], y2[pos], area[pos]);
        for k in j..n {
            if suppressed[k] {
                continue;
            }
            let w = (sx2.min(x2[k]) - sx1.max(x1[k]) + 1.0).max(0.0);
            let h = (sy2.min(y2[k]) - sy1.max(y1[k]) + 1.0).max(0.0);
            if metric.ratio(w * h, sarea, area[k]) >= threshold {
                suppressed[k] = true;
            }
        }
    }
}
