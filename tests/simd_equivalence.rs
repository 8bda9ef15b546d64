#![cfg(feature = "simd")]

use detpost::lowlevel::{nms_indices_with, SuppressScalar, SuppressSimd};
use detpost::{BBox, MatchMetric, ScoredBox};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_boxes(rng: &mut StdRng, count: usize) -> Vec<ScoredBox> {
    (0..count)
        .map(|_| {
            let x1 = rng.random_range(0.0..120.0f32);
            let y1 = rng.random_range(0.0..120.0f32);
            let bbox = BBox::new(
                x1,
                y1,
                x1 + rng.random_range(1.0..40.0f32),
                y1 + rng.random_range(1.0..40.0f32),
            );
            ScoredBox::new(rng.random_range(0..50) as f32 / 50.0, bbox)
        })
        .collect()
}

#[test]
fn simd_kernel_matches_scalar() {
    let mut rng = StdRng::seed_from_u64(2024);
    // Sizes around the lane width exercise the scalar tail.
    for count in [0usize, 1, 7, 8, 9, 17, 64, 333] {
        let dets = random_boxes(&mut rng, count);
        for metric in [MatchMetric::Iou, MatchMetric::Ios] {
            for threshold in [0.2f32, 0.5, 0.8] {
                assert_eq!(
                    nms_indices_with::<SuppressScalar>(&dets, threshold, metric),
                    nms_indices_with::<SuppressSimd>(&dets, threshold, metric),
                    "count={count} metric={metric} threshold={threshold}"
                );
            }
        }
    }
}
