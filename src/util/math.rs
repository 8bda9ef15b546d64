//! Scalar helpers shared by the decoders.

/// Logistic sigmoid.
#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax written into `out`.
pub(crate) fn softmax_into(logits: &[f32], out: &mut [f32]) {
    debug_assert_eq!(logits.len(), out.len());
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (dst, &value) in out.iter_mut().zip(logits) {
        let e = (value - max).exp();
        *dst = e;
        sum += e;
    }
    if sum > 0.0 {
        for dst in out.iter_mut() {
            *dst /= sum;
        }
    }
}

/// Rounds half up via `floor(x + 0.5)`.
#[inline]
pub(crate) fn round_half_up(x: f32) -> f32 {
    (x + 0.5).floor()
}

/// Index and value of the first maximum, or `None` for an empty slice.
pub(crate) fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{argmax, round_half_up, sigmoid, softmax_into};

    #[test]
    fn sigmoid_is_centered() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-7);
        assert!(sigmoid(20.0) > 0.999);
        assert!(sigmoid(-20.0) < 1e-3);
    }

    #[test]
    fn softmax_sums_to_one() {
        let logits = [1.0f32, 2.0, 3.0, 1000.0];
        let mut out = [0.0f32; 4];
        softmax_into(&logits, &mut out);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(out[3] > 0.999);
    }

    #[test]
    fn round_half_up_matches_floor_plus_half() {
        assert_eq!(round_half_up(1279.5), 1280.0);
        assert_eq!(round_half_up(1279.49), 1279.0);
        assert_eq!(round_half_up(640.0 / 0.5), 1280.0);
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(argmax(&[]), None);
    }
}
