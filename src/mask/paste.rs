//! Mask pasting via bilinear grid sampling.
//!
//! Every canvas pixel centre `(x + 0.5, y + 0.5)` is mapped into the box's
//! normalized frame, `g = (p - box_min) / (box_max - box_min) * 2 - 1`, and
//! then into mask coordinates with the non-corner-aligned convention
//! `i = ((g + 1) * K - 1) / 2`. Pixels whose `g` falls outside `[-1, 1]` on
//! either axis read 0. Inside the box, bilinear neighbours that fall off the
//! mask contribute zero, so the outermost half texel of the box fades toward
//! the background the way a zeros-padded grid sample does.
//!
//! The grid is separable, so taps are computed once per column and once per
//! row rather than per pixel.

use crate::bbox::BBox;
use crate::map::{MapView, OwnedMap};
use crate::util::{DetPostError, DetPostResult};

/// Bilinear taps for one canvas coordinate along one axis.
#[derive(Clone, Copy, Debug)]
struct AxisTap {
    i0: usize,
    i1: usize,
    w0: f32,
    w1: f32,
    inside: bool,
}

const OUTSIDE: AxisTap = AxisTap {
    i0: 0,
    i1: 0,
    w0: 0.0,
    w1: 0.0,
    inside: false,
};

/// Index and weight of one neighbour, or a zero tap when it is off the mask.
fn neighbour(idx: isize, weight: f32, mask_len: usize) -> (usize, f32) {
    match usize::try_from(idx) {
        Ok(i) if i < mask_len => (i, weight),
        _ => (0, 0.0),
    }
}

fn axis_taps(canvas_len: usize, lo: f32, hi: f32, mask_len: usize) -> Vec<AxisTap> {
    let span = hi - lo;
    (0..canvas_len)
        .map(|p| {
            let g = ((p as f32 + 0.5) - lo) / span * 2.0 - 1.0;
            // NaN and infinities from degenerate boxes fail this test too.
            if !(-1.0..=1.0).contains(&g) {
                return OUTSIDE;
            }
            // g in [-1, 1] keeps src in [-0.5, K - 0.5].
            let src = ((g + 1.0) * mask_len as f32 - 1.0) * 0.5;
            let base = src.floor();
            let frac = src - base;
            let (i0, w0) = neighbour(base as isize, 1.0 - frac, mask_len);
            let (i1, w1) = neighbour(base as isize + 1, frac, mask_len);
            AxisTap {
                i0,
                i1,
                w0,
                w1,
                inside: true,
            }
        })
        .collect()
}

/// Precomputed sampling grid for one box on one canvas.
pub(crate) struct PastePlan {
    xs: Vec<AxisTap>,
    ys: Vec<AxisTap>,
}

impl PastePlan {
    pub(crate) fn new(
        bbox: &BBox,
        canvas_width: usize,
        canvas_height: usize,
        mask_width: usize,
        mask_height: usize,
    ) -> Self {
        Self {
            xs: axis_taps(canvas_width, bbox.x1, bbox.x2, mask_width),
            ys: axis_taps(canvas_height, bbox.y1, bbox.y2, mask_height),
        }
    }

    /// Samples canvas row `y`, calling `emit(x, value)` for every column.
    fn sample_row<F: FnMut(usize, f32)>(
        &self,
        mask: MapView<'_, f32>,
        y: usize,
        mut emit: F,
    ) -> DetPostResult<()> {
        let ty = self.ys[y];
        if !ty.inside {
            for x in 0..self.xs.len() {
                emit(x, 0.0);
            }
            return Ok(());
        }
        let row0 = mask.row(ty.i0).ok_or(DetPostError::BufferTooSmall {
            needed: ty.i0 + 1,
            got: mask.height(),
        })?;
        let row1 = mask.row(ty.i1).ok_or(DetPostError::BufferTooSmall {
            needed: ty.i1 + 1,
            got: mask.height(),
        })?;
        for (x, tx) in self.xs.iter().enumerate() {
            if !tx.inside {
                emit(x, 0.0);
                continue;
            }
            let top = row0[tx.i0] * tx.w0 + row0[tx.i1] * tx.w1;
            let bottom = row1[tx.i0] * tx.w0 + row1[tx.i1] * tx.w1;
            emit(x, top * ty.w0 + bottom * ty.w1);
        }
        Ok(())
    }
}

/// Pastes `mask` into a `width x height` canvas using `bbox` as the frame.
///
/// Returns real-valued samples; see [`binarize`] for the thresholded form.
pub fn paste_mask(
    mask: MapView<'_, f32>,
    bbox: &BBox,
    width: usize,
    height: usize,
) -> DetPostResult<OwnedMap<f32>> {
    let mut out = OwnedMap::filled(0.0f32, width, height)?.into_vec();
    let plan = PastePlan::new(bbox, width, height, mask.width(), mask.height());
    for (y, dst) in out.chunks_mut(width).enumerate() {
        plan.sample_row(mask, y, |x, v| dst[x] = v)?;
    }
    OwnedMap::new(out, width, height)
}

/// Thresholds values: `v >= threshold` becomes 1, everything else 0.
pub fn binarize(values: &[f32], threshold: f32) -> Vec<i32> {
    values.iter().map(|&v| i32::from(v >= threshold)).collect()
}

/// Pastes and binarizes into the top-left `width x height` region of `out`,
/// a plane with row stride `stride`.
pub(crate) fn paste_binary_into(
    mask: MapView<'_, f32>,
    bbox: &BBox,
    width: usize,
    height: usize,
    threshold: f32,
    out: &mut [i32],
    stride: usize,
) -> DetPostResult<()> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    let needed = (height - 1) * stride + width;
    if out.len() < needed || stride < width {
        return Err(DetPostError::BufferTooSmall {
            needed,
            got: out.len(),
        });
    }
    let plan = PastePlan::new(bbox, width, height, mask.width(), mask.height());
    for y in 0..height {
        let dst = &mut out[y * stride..y * stride + width];
        plan.sample_row(mask, y, |x, v| dst[x] = i32::from(v >= threshold))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{binarize, paste_mask};
    use crate::bbox::BBox;
    use crate::map::MapView;

    #[test]
    fn constant_mask_fills_box_only() {
        let logits = vec![1.0f32; 4 * 4];
        let mask = MapView::from_slice(&logits, 4, 4).unwrap();
        let bbox = BBox::new(2.0, 2.0, 6.0, 6.0);
        let pasted = paste_mask(mask, &bbox, 8, 8).unwrap();
        let view = pasted.view();
        for y in 0..8 {
            for x in 0..8 {
                let inside = (2..6).contains(&x) && (2..6).contains(&y);
                let expected = if inside { 1.0 } else { 0.0 };
                assert_eq!(*view.get(x, y).unwrap(), expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn identity_box_reproduces_mask() {
        // Box equal to the canvas and mask of the same size samples pixel centres.
        let logits: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let mask = MapView::from_slice(&logits, 3, 3).unwrap();
        let bbox = BBox::new(0.0, 0.0, 3.0, 3.0);
        let pasted = paste_mask(mask, &bbox, 3, 3).unwrap();
        for (got, want) in pasted.data().iter().zip(&logits) {
            assert!((got - want).abs() < 1e-5);
        }
    }

    #[test]
    fn degenerate_box_pastes_nothing() {
        let logits = vec![1.0f32; 4];
        let mask = MapView::from_slice(&logits, 2, 2).unwrap();
        let bbox = BBox::new(3.0, 3.0, 3.0, 3.0);
        let pasted = paste_mask(mask, &bbox, 6, 6).unwrap();
        assert!(pasted.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn border_texels_blend_with_zero_padding() {
        // 2-texel mask over a 4-pixel box: pixel 0 samples at -0.25.
        let logits = vec![1.0f32, 1.0];
        let mask = MapView::from_slice(&logits, 2, 1).unwrap();
        let bbox = BBox::new(0.0, 0.0, 4.0, 1.0);
        let pasted = paste_mask(mask, &bbox, 4, 1).unwrap();
        let expected = [0.75, 1.0, 1.0, 0.75];
        for (got, want) in pasted.data().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn binarize_is_inclusive() {
        assert_eq!(binarize(&[0.49, 0.5, 0.51], 0.5), vec![0, 1, 1]);
    }
}
