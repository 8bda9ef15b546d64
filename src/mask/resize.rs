//! Bilinear resize with half-pixel centres (`align_corners = false`).
//!
//! Output pixel `k` reads source coordinate `(k + 0.5) * in / out - 0.5`,
//! clamped below at 0; the upper neighbour is clamped to the last source
//! pixel.

use crate::map::{MapView, OwnedMap};
use crate::util::{DetPostError, DetPostResult};

#[derive(Clone, Copy, Debug)]
struct LinearTap {
    i0: usize,
    i1: usize,
    w1: f32,
}

fn linear_taps(in_len: usize, out_len: usize) -> Vec<LinearTap> {
    let ratio = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|k| {
            let src = ((k as f32 + 0.5) * ratio - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(in_len - 1);
            let i1 = (i0 + 1).min(in_len - 1);
            LinearTap {
                i0,
                i1,
                w1: src - i0 as f32,
            }
        })
        .collect()
}

/// Resizes `src` to `out_width x out_height`.
pub fn resize_bilinear(
    src: MapView<'_, f32>,
    out_width: usize,
    out_height: usize,
) -> DetPostResult<OwnedMap<f32>> {
    let mut out = OwnedMap::filled(0.0f32, out_width, out_height)?.into_vec();
    let xs = linear_taps(src.width(), out_width);
    let ys = linear_taps(src.height(), out_height);

    let row_err = |y: usize| DetPostError::BufferTooSmall {
        needed: y + 1,
        got: src.height(),
    };
    for (dst, ty) in out.chunks_mut(out_width).zip(&ys) {
        let row0 = src.row(ty.i0).ok_or_else(|| row_err(ty.i0))?;
        let row1 = src.row(ty.i1).ok_or_else(|| row_err(ty.i1))?;
        let wy0 = 1.0 - ty.w1;
        for (value, tx) in dst.iter_mut().zip(&xs) {
            let wx0 = 1.0 - tx.w1;
            let top = row0[tx.i0] * wx0 + row0[tx.i1] * tx.w1;
            let bottom = row1[tx.i0] * wx0 + row1[tx.i1] * tx.w1;
            *value = top * wy0 + bottom * ty.w1;
        }
    }

    OwnedMap::new(out, out_width, out_height)
}

#[cfg(test)]
mod tests {
    use super::resize_bilinear;
    use crate::map::MapView;

    #[test]
    fn upsample_by_two_matches_half_pixel_rule() {
        let data = [0.0f32, 4.0];
        let src = MapView::from_slice(&data, 2, 1).unwrap();
        let out = resize_bilinear(src, 4, 1).unwrap();
        // src coords: -0.25 -> 0, 0.25, 0.75, 1.25 -> clamped neighbour
        assert_eq!(out.data(), &[0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn constant_map_stays_constant() {
        let data = vec![2.5f32; 3 * 5];
        let src = MapView::from_slice(&data, 3, 5).unwrap();
        let out = resize_bilinear(src, 7, 2).unwrap();
        assert!(out.data().iter().all(|&v| (v - 2.5).abs() < 1e-6));
    }

    #[test]
    fn downsample_reads_from_strided_crop() {
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let view = MapView::from_slice(&data, 4, 4).unwrap();
        let crop = view.crop_top_left(2, 2).unwrap();
        let out = resize_bilinear(crop, 1, 1).unwrap();
        // Centre of [[0, 1], [4, 5]].
        assert!((out.data()[0] - 2.5).abs() < 1e-6);
    }
}
