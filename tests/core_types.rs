use detpost::bbox::intersection_inclusive;
use detpost::{
    BBox, BatchBuffer, DetPostError, Detection, ImageMeta, MapStack, MapView, OriginShape,
    OwnedMap,
};

#[test]
fn map_view_rejects_invalid_dimensions() {
    let data = [0.0f32; 4];

    let err = MapView::from_slice(&data, 0, 1).err().unwrap();
    assert_eq!(
        err,
        DetPostError::InvalidDimensions {
            width: 0,
            height: 1,
        }
    );

    let err = MapView::new(&data, 4, 1, 3).err().unwrap();
    assert!(matches!(err, DetPostError::InvalidConfig { .. }));

    let err = MapView::from_slice(&data, 3, 2).err().unwrap();
    assert_eq!(err, DetPostError::BufferTooSmall { needed: 6, got: 4 });
}

#[test]
fn map_stack_requires_exact_length() {
    let data = vec![0.0f32; 2 * 3 * 3 + 1];
    let err = MapStack::new(&data, 2, 3, 3).err().unwrap();
    assert_eq!(
        err,
        DetPostError::ShapeMismatch {
            expected: 18,
            got: 19,
            context: "map stack length",
        }
    );
}

#[test]
fn owned_map_view_round_trips_rows() {
    let map = OwnedMap::new((0..6).collect::<Vec<u8>>(), 3, 2).unwrap();
    let view = map.view();
    assert_eq!(view.row(1).unwrap(), &[3, 4, 5]);
    assert_eq!(view.get(3, 0), None);
}

#[test]
fn cxcywh_conversion_matches_corners() {
    let bbox = BBox::from_cxcywh([10.0, 20.0, 4.0, 8.0]);
    assert_eq!(bbox, BBox::new(8.0, 16.0, 12.0, 24.0));
    assert_eq!(bbox.to_cxcywh(), [10.0, 20.0, 4.0, 8.0]);
}

#[test]
fn inclusive_intersection_counts_pixels() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(5.0, 5.0, 20.0, 20.0);
    assert_eq!(intersection_inclusive(&a, &b), 36.0);
    let far = BBox::new(30.0, 30.0, 40.0, 40.0);
    assert_eq!(intersection_inclusive(&a, &far), 0.0);
}

#[test]
fn clip_collapses_negative_bounds_to_zero() {
    let bbox = BBox::new(-5.0, 3.0, 12.0, 40.0).clip(10.0, 20.0);
    assert_eq!(bbox, BBox::new(0.0, 3.0, 10.0, 20.0));
    let collapsed = BBox::new(-5.0, -5.0, 5.0, 5.0).clip(-1.0, -1.0);
    assert_eq!(collapsed, BBox::new(0.0, 0.0, 0.0, 0.0));
}

#[test]
fn batch_counts_must_cover_rows() {
    let table = [
        [1.0, 0.9, 0.0, 0.0, 5.0, 5.0],
        [2.0, 0.8, 1.0, 1.0, 6.0, 6.0],
    ];
    let err = BatchBuffer::from_table(&table, vec![1, 0]).err().unwrap();
    assert_eq!(
        err,
        DetPostError::CountMismatch {
            counts_sum: 1,
            rows: 2,
        }
    );

    let batch = BatchBuffer::from_table(&table, vec![0, 2]).unwrap();
    assert_eq!(batch.offsets(), vec![0, 0]);
    assert!(batch.image(0).unwrap().is_empty());
    assert_eq!(batch.image(1).unwrap().len(), 2);
    assert_eq!(batch.to_table(), table.to_vec());
}

#[test]
fn empty_images_get_exactly_one_sentinel() {
    let det = Detection::new(3, 0.7, BBox::new(0.0, 0.0, 4.0, 4.0));
    let batch = BatchBuffer::from_images([vec![], vec![det, det], vec![]]);
    let padded = batch.with_sentinels(&Detection::sentinel());

    assert_eq!(padded.counts(), &[1, 2, 1]);
    assert_eq!(padded.counts().iter().sum::<usize>(), padded.len());
    assert_eq!(padded.rows()[0].to_row(), [0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
    assert_eq!(padded.rows()[3], Detection::sentinel());
}

#[test]
fn trailing_sentinel_is_single_image_only() {
    let mut batch = BatchBuffer::from_images([Vec::<Detection>::new(), Vec::new()]);
    let err = batch.append_sentinel(&Detection::sentinel()).err().unwrap();
    assert!(matches!(
        err,
        DetPostError::BatchSizeMismatch {
            expected: 1,
            got: 2,
            ..
        }
    ));

    let mut single = BatchBuffer::from_images([Vec::<Detection>::new()]);
    single.append_sentinel(&Detection::sentinel()).unwrap();
    assert_eq!(single.counts(), &[1]);
}

#[test]
fn image_meta_validates_scale() {
    assert!(ImageMeta::new([640.0, 640.0], [0.0, 1.0]).is_err());
    assert!(ImageMeta::new([640.0, f32::NAN], [1.0, 1.0]).is_err());
    let meta = ImageMeta::new([640.0, 640.0], [0.5, 0.5]).unwrap();
    assert_eq!(meta.origin_shape(), OriginShape::new(1280, 1280));
}
