use detpost::{
    BBox, BBoxPostProcess, BBoxPostProcessConfig, BatchBuffer, DetPostError, Detection,
    HeadOutput, ImageMeta, MatchMetric, NmsConfig, OriginShape,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn post(cfg: BBoxPostProcessConfig) -> BBoxPostProcess {
    BBoxPostProcess::new(cfg).unwrap()
}

#[test]
fn empty_images_become_sentinels_before_rescale() {
    let det = Detection::new(4, 0.8, BBox::new(10.0, 10.0, 50.0, 30.0));
    let batch = BatchBuffer::from_images([vec![], vec![det]]);
    let metas = [
        ImageMeta::new([320.0, 320.0], [0.5, 0.5]).unwrap(),
        ImageMeta::new([320.0, 320.0], [2.0, 2.0]).unwrap(),
    ];
    let pred = post(BBoxPostProcessConfig::default())
        .get_pred(&batch, &metas)
        .unwrap();

    assert_eq!(pred.nms_rows.counts(), &[1, 1]);
    assert_eq!(pred.detections.counts(), &[1, 1]);
    assert_eq!(
        pred.origin_shapes,
        vec![OriginShape::new(640, 640), OriginShape::new(160, 160)]
    );
    // Sentinel is rescaled like any other row.
    assert_eq!(pred.detections.rows()[0].bbox, BBox::new(0.0, 0.0, 2.0, 2.0));
    assert_eq!(pred.detections.rows()[1].bbox, BBox::new(5.0, 5.0, 25.0, 15.0));
    assert_eq!(pred.row_origin_shapes().len(), pred.detections.len());
}

#[test]
fn rescaled_rows_are_clipped_or_invalid() {
    let mut rng = StdRng::seed_from_u64(11);
    let metas: Vec<ImageMeta> = (0..4)
        .map(|_| {
            let sy = rng.random_range(0.3..3.0f32);
            let sx = rng.random_range(0.3..3.0f32);
            ImageMeta::new([480.0, 640.0], [sy, sx]).unwrap()
        })
        .collect();
    let images: Vec<Vec<Detection>> = (0..4)
        .map(|_| {
            (0..rng.random_range(0..30))
                .map(|_| {
                    let x1 = rng.random_range(-100.0..700.0f32);
                    let y1 = rng.random_range(-100.0..550.0f32);
                    let x2 = x1 + rng.random_range(-10.0..200.0f32);
                    let y2 = y1 + rng.random_range(-10.0..200.0f32);
                    Detection::new(rng.random_range(0..80), 0.5, BBox::new(x1, y1, x2, y2))
                })
                .collect()
        })
        .collect();
    let batch = BatchBuffer::from_images(&images);
    let pred = post(BBoxPostProcessConfig::default())
        .get_pred(&batch, &metas)
        .unwrap();

    assert_eq!(pred.detections.counts(), pred.nms_rows.counts());
    for (image, shape) in pred.detections.images().zip(&pred.origin_shapes) {
        let (w, h) = (shape.width_f32(), shape.height_f32());
        for det in image {
            let b = det.bbox;
            assert!(b.x1 >= 0.0 && b.x2 <= w && b.y1 >= 0.0 && b.y2 <= h, "{det:?}");
            if det.is_valid() {
                assert!(b.x1 < b.x2 && b.y1 < b.y2, "{det:?}");
            }
        }
    }
}

#[test]
fn min_size_marks_small_boxes_invalid() {
    let batch = BatchBuffer::from_images([vec![
        Detection::new(1, 0.9, BBox::new(0.0, 0.0, 2.0, 40.0)),
        Detection::new(2, 0.8, BBox::new(0.0, 0.0, 40.0, 40.0)),
    ]]);
    let meta = ImageMeta::new([100.0, 100.0], [1.0, 1.0]).unwrap();
    let pred = post(BBoxPostProcessConfig {
        min_size: 2.0,
        ..BBoxPostProcessConfig::default()
    })
    .get_pred(&batch, &[meta])
    .unwrap();

    let labels: Vec<i32> = pred.detections.rows().iter().map(|d| d.label).collect();
    assert_eq!(labels, vec![Detection::INVALID_LABEL, 2]);
    assert_eq!(pred.detections.len(), 2);
}

#[test]
fn bypass_mode_returns_rows_untouched() {
    let det = Detection::new(1, 0.9, BBox::new(-10.0, 0.0, 900.0, 40.0));
    let batch = BatchBuffer::from_images([vec![det]]);
    let meta = ImageMeta::new([100.0, 100.0], [0.5, 0.5]).unwrap();
    let pred = post(BBoxPostProcessConfig {
        export_eb: true,
        ..BBoxPostProcessConfig::default()
    })
    .get_pred(&batch, &[meta])
    .unwrap();
    assert_eq!(pred.detections, batch);
}

#[test]
fn export_run_appends_one_trailing_sentinel() {
    let det = Detection::new(1, 0.9, BBox::new(0.0, 0.0, 10.0, 10.0));
    let processor = post(BBoxPostProcessConfig {
        export_onnx: true,
        ..BBoxPostProcessConfig::default()
    });
    let out = processor
        .run(HeadOutput::Decoded(BatchBuffer::from_images([vec![det]])))
        .unwrap();
    assert_eq!(out.counts(), &[2]);
    assert_eq!(out.rows()[1], Detection::sentinel());

    let meta = ImageMeta::new([10.0, 10.0], [1.0, 1.0]).unwrap();
    let pred = processor.get_pred(&out, &[meta]).unwrap();
    assert_eq!(pred.detections.counts(), &[2]);

    let err = processor.get_pred(&out, &[meta, meta]).unwrap_err();
    assert!(matches!(err, DetPostError::BatchSizeMismatch { .. }));
}

#[test]
fn candidates_require_nms_config() {
    let processor = post(BBoxPostProcessConfig::default());
    let err = processor
        .run(HeadOutput::Candidates(BatchBuffer::new()))
        .unwrap_err();
    assert!(matches!(err, DetPostError::InvalidConfig { .. }));
}

#[test]
fn nms_class_count_must_agree() {
    let err = BBoxPostProcess::new(BBoxPostProcessConfig {
        num_classes: 3,
        nms: Some(NmsConfig {
            num_classes: 4,
            match_threshold: 0.5,
            match_metric: MatchMetric::Iou,
            parallel: false,
        }),
        ..BBoxPostProcessConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, DetPostError::InvalidConfig { .. }));
}

#[test]
fn meta_count_must_match_batch() {
    let batch = BatchBuffer::from_images([Vec::<Detection>::new(), Vec::new()]);
    let meta = ImageMeta::new([10.0, 10.0], [1.0, 1.0]).unwrap();
    let err = post(BBoxPostProcessConfig::default())
        .get_pred(&batch, &[meta])
        .unwrap_err();
    assert_eq!(
        err,
        DetPostError::BatchSizeMismatch {
            expected: 2,
            got: 1,
            context: "get_pred",
        }
    );
}

#[test]
fn export_fast_path_matches_general_path_for_one_image() {
    let mut rng = StdRng::seed_from_u64(77);
    let nms = NmsConfig {
        num_classes: 4,
        match_threshold: 0.45,
        match_metric: MatchMetric::Iou,
        parallel: false,
    };
    for _ in 0..10 {
        let rows: Vec<Detection> = (0..40)
            .map(|_| {
                let x1 = rng.random_range(-60.0..500.0f32);
                let y1 = rng.random_range(-60.0..400.0f32);
                Detection::new(
                    rng.random_range(0..4),
                    rng.random_range(0.0..1.0f32),
                    BBox::new(
                        x1,
                        y1,
                        x1 + rng.random_range(0.0..200.0f32),
                        y1 + rng.random_range(0.0..150.0f32),
                    ),
                )
            })
            .collect();
        let candidates = BatchBuffer::from_images([rows]);
        let meta = ImageMeta::new([416.0, 544.0], [0.37, 1.9]).unwrap();
        let cfg = |export_onnx| BBoxPostProcessConfig {
            num_classes: 4,
            nms: Some(nms.clone()),
            export_onnx,
            min_size: 1.0,
            ..BBoxPostProcessConfig::default()
        };

        let general = post(cfg(false));
        let general_pred = general
            .get_pred(&general.run(HeadOutput::Candidates(candidates.clone())).unwrap(), &[meta])
            .unwrap();
        let export = post(cfg(true));
        let export_pred = export
            .get_pred(&export.run(HeadOutput::Candidates(candidates)).unwrap(), &[meta])
            .unwrap();

        let kept = general_pred.detections.len();
        assert_eq!(export_pred.detections.len(), kept + 1);
        assert_eq!(&export_pred.detections.rows()[..kept], general_pred.detections.rows());
        assert_eq!(export_pred.origin_shapes, general_pred.origin_shapes);
    }
}
