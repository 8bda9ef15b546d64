use detpost::lowlevel::match_value;
use detpost::{multiclass_nms, nms, nms_indices, BBox, Detection, MatchMetric, ScoredBox};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_boxes(rng: &mut StdRng, count: usize) -> Vec<ScoredBox> {
    (0..count)
        .map(|_| {
            let x1 = rng.random_range(0.0..80.0f32);
            let y1 = rng.random_range(0.0..80.0f32);
            let w = rng.random_range(2.0..30.0f32);
            let h = rng.random_range(2.0..30.0f32);
            // Coarse scores so that ties actually occur.
            let score = rng.random_range(0..20) as f32 / 20.0;
            ScoredBox::new(score, BBox::new(x1, y1, x1 + w, y1 + h))
        })
        .collect()
}

#[test]
fn worked_example_keeps_first_and_far_box() {
    let dets = [
        ScoredBox::from_row([0.9, 0.0, 0.0, 10.0, 10.0]),
        ScoredBox::from_row([0.8, 1.0, 1.0, 11.0, 11.0]),
        ScoredBox::from_row([0.95, 50.0, 50.0, 60.0, 60.0]),
    ];
    // IoU of the first two boxes: 100 / (121 + 121 - 100) ~= 0.704.
    assert!((match_value(&dets[0], &dets[1], MatchMetric::Iou) - 100.0 / 142.0).abs() < 1e-6);
    assert_eq!(nms_indices(&dets, 0.5, MatchMetric::Iou), vec![0, 2]);
    assert_eq!(nms_indices(&dets, 0.75, MatchMetric::Iou), vec![0, 1, 2]);
}

#[test]
fn survivors_never_overlap_beyond_threshold() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for metric in [MatchMetric::Iou, MatchMetric::Ios] {
        for threshold in [0.3f32, 0.5, 0.7] {
            let dets = random_boxes(&mut rng, 120);
            let kept = nms(&dets, threshold, metric);
            for (i, a) in kept.iter().enumerate() {
                for b in &kept[i + 1..] {
                    assert!(
                        match_value(a, b, metric) < threshold,
                        "{metric} {threshold}: {a:?} vs {b:?}"
                    );
                }
            }
        }
    }
}

#[test]
fn survivors_are_in_ascending_index_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let dets = random_boxes(&mut rng, 200);
    let keep = nms_indices(&dets, 0.4, MatchMetric::Iou);
    assert!(keep.windows(2).all(|w| w[0] < w[1]));
    assert!(!keep.is_empty());
}

#[test]
fn nms_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..10 {
        let dets = random_boxes(&mut rng, 80);
        let once = nms(&dets, 0.5, MatchMetric::Iou);
        let twice = nms(&once, 0.5, MatchMetric::Iou);
        assert_eq!(once, twice);
    }
}

#[test]
fn every_removed_box_overlaps_a_better_survivor() {
    let mut rng = StdRng::seed_from_u64(99);
    let dets = random_boxes(&mut rng, 100);
    let threshold = 0.5;
    let keep = nms_indices(&dets, threshold, MatchMetric::Iou);
    for (idx, det) in dets.iter().enumerate() {
        if keep.contains(&idx) {
            continue;
        }
        let covered = keep.iter().any(|&k| {
            let survivor = &dets[k];
            let ranks_higher =
                survivor.score > det.score || (survivor.score == det.score && k < idx);
            ranks_higher && match_value(survivor, det, MatchMetric::Iou) >= threshold
        });
        assert!(covered, "box {idx} removed without a suppressor");
    }
}

#[test]
fn multiclass_output_is_grouped_by_class() {
    let mut rng = StdRng::seed_from_u64(3);
    let boxes = random_boxes(&mut rng, 60);
    let dets: Vec<Detection> = boxes
        .iter()
        .enumerate()
        .map(|(i, b)| Detection::new((i % 3) as i32, b.score, b.bbox))
        .collect();
    let kept = multiclass_nms(&dets, 3, 0.5, MatchMetric::Iou);

    assert!(kept.windows(2).all(|w| w[0].label <= w[1].label));
    for class_id in 0..3 {
        let class_boxes: Vec<ScoredBox> = dets
            .iter()
            .filter(|d| d.label == class_id)
            .map(|d| ScoredBox::new(d.score, d.bbox))
            .collect();
        let expected = nms(&class_boxes, 0.5, MatchMetric::Iou);
        let got: Vec<ScoredBox> = kept
            .iter()
            .filter(|d| d.label == class_id)
            .map(|d| ScoredBox::new(d.score, d.bbox))
            .collect();
        assert_eq!(got, expected);
    }
}
