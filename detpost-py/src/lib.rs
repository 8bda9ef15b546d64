//! Python bindings for the detpost post-processing library.
//!
//! Arrays cross the boundary as numpy `float32` buffers in the same row
//! layouts the Rust API uses: `[score, x1, y1, x2, y2]` for single-class NMS
//! and `[label, score, x1, y1, x2, y2]` everywhere else.

use numpy::{
    IntoPyArray, PyArray2, PyArray3, PyArrayMethods, PyReadonlyArray2, PyReadonlyArray3,
    PyUntypedArrayMethods,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use detpost::{
    BBoxPostProcess as RustBBoxPostProcess, BBoxPostProcessConfig, BatchBuffer, DetPostError,
    ImageMeta, MapStack, MaskPostProcess, MaskPostProcessConfig, MatchMetric, OriginShape,
    SampleBackend, ScoredBox,
};

/// Convert a DetPostError to a Python exception.
fn to_py_err(err: DetPostError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn parse_metric(metric: &str) -> PyResult<MatchMetric> {
    metric.parse().map_err(to_py_err)
}

/// Reads an `[n, cols]` float array into fixed-width rows.
fn read_rows<const N: usize>(array: &PyReadonlyArray2<'_, f32>) -> PyResult<Vec<[f32; N]>> {
    let shape = array.shape();
    if shape[1] != N {
        return Err(PyValueError::new_err(format!(
            "expected an array of shape [n, {N}], got [{}, {}]",
            shape[0], shape[1]
        )));
    }
    let data = array.as_slice()?;
    Ok(data
        .chunks_exact(N)
        .map(|chunk| {
            let mut row = [0.0f32; N];
            row.copy_from_slice(chunk);
            row
        })
        .collect())
}

fn read_metas(
    im_shape: &PyReadonlyArray2<'_, f32>,
    scale_factor: &PyReadonlyArray2<'_, f32>,
) -> PyResult<Vec<ImageMeta>> {
    let shapes = read_rows::<2>(im_shape)?;
    let scales = read_rows::<2>(scale_factor)?;
    if shapes.len() != scales.len() {
        return Err(PyValueError::new_err(
            "im_shape and scale_factor must have the same batch size",
        ));
    }
    shapes
        .into_iter()
        .zip(scales)
        .map(|(shape, scale)| ImageMeta::new(shape, scale).map_err(to_py_err))
        .collect()
}

fn rows_to_array<'py>(py: Python<'py>, rows: Vec<[f32; 6]>) -> PyResult<Bound<'py, PyArray2<f32>>> {
    let count = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    flat.into_pyarray(py).reshape([count, 6])
}

/// Single-class greedy NMS.
///
/// Args:
///     dets: float32 array of shape [n, 5] with rows [score, x1, y1, x2, y2]
///     threshold: boxes overlapping a kept box by >= threshold are removed
///     metric: "iou" or "ios" (default: "iou")
///
/// Returns:
///     Kept row indices in ascending order.
#[pyfunction]
#[pyo3(signature = (dets, threshold = 0.6, metric = "iou"))]
fn nms(dets: PyReadonlyArray2<'_, f32>, threshold: f32, metric: &str) -> PyResult<Vec<usize>> {
    let metric = parse_metric(metric)?;
    let boxes: Vec<ScoredBox> = read_rows::<5>(&dets)?
        .into_iter()
        .map(ScoredBox::from_row)
        .collect();
    Ok(detpost::nms_indices(&boxes, threshold, metric))
}

/// Per-class NMS over [label, score, x1, y1, x2, y2] rows.
///
/// Returns:
///     float32 array [m, 6] of survivors grouped by class.
#[pyfunction]
#[pyo3(signature = (dets, num_classes = 80, threshold = 0.6, metric = "iou"))]
fn multiclass_nms<'py>(
    py: Python<'py>,
    dets: PyReadonlyArray2<'py, f32>,
    num_classes: usize,
    threshold: f32,
    metric: &str,
) -> PyResult<Bound<'py, PyArray2<f32>>> {
    let metric = parse_metric(metric)?;
    let rows: Vec<detpost::Detection> = read_rows::<6>(&dets)?
        .into_iter()
        .map(detpost::Detection::from_row)
        .collect();
    let kept = detpost::multiclass_nms_par(&rows, num_classes, threshold, metric);
    rows_to_array(py, kept.iter().map(detpost::Detection::to_row).collect())
}

/// Rescales NMS output back to original image coordinates.
#[pyclass]
pub struct BBoxPostProcess {
    inner: RustBBoxPostProcess,
}

#[pymethods]
impl BBoxPostProcess {
    /// Args:
    ///     num_classes: number of classes (default: 80)
    ///     export_onnx: single-image export path (default: False)
    ///     export_eb: return rows without rescaling (default: False)
    ///     min_size: boxes with a side <= min_size get label -1 (default: 0.0)
    ///     parallel: process images in parallel (default: False)
    #[new]
    #[pyo3(signature = (num_classes = 80, export_onnx = false, export_eb = false, min_size = 0.0, parallel = false))]
    fn new(
        num_classes: usize,
        export_onnx: bool,
        export_eb: bool,
        min_size: f32,
        parallel: bool,
    ) -> PyResult<Self> {
        let inner = RustBBoxPostProcess::new(BBoxPostProcessConfig {
            num_classes,
            export_onnx,
            export_eb,
            min_size,
            parallel,
            ..BBoxPostProcessConfig::default()
        })
        .map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Args:
    ///     bboxes: float32 [n, 6] NMS rows
    ///     counts: rows per image
    ///     im_shape: float32 [b, 2] network input (h, w) per image
    ///     scale_factor: float32 [b, 2] (scale_y, scale_x) per image
    ///
    /// Returns:
    ///     (rows [m, 6], counts, origin_shapes [(h, w), ...])
    #[allow(clippy::type_complexity)]
    fn get_pred<'py>(
        &self,
        py: Python<'py>,
        bboxes: PyReadonlyArray2<'py, f32>,
        counts: Vec<usize>,
        im_shape: PyReadonlyArray2<'py, f32>,
        scale_factor: PyReadonlyArray2<'py, f32>,
    ) -> PyResult<(Bound<'py, PyArray2<f32>>, Vec<usize>, Vec<(usize, usize)>)> {
        let batch = BatchBuffer::from_table(&read_rows::<6>(&bboxes)?, counts).map_err(to_py_err)?;
        let metas = read_metas(&im_shape, &scale_factor)?;
        let pred = self.inner.get_pred(&batch, &metas).map_err(to_py_err)?;
        let shapes = pred
            .origin_shapes
            .iter()
            .map(|s| (s.height, s.width))
            .collect();
        let counts = pred.detections.counts().to_vec();
        Ok((rows_to_array(py, pred.detections.to_table())?, counts, shapes))
    }

    fn __repr__(&self) -> String {
        let cfg = self.inner.config();
        format!(
            "BBoxPostProcess(num_classes={}, export_onnx={}, export_eb={}, min_size={})",
            cfg.num_classes, cfg.export_onnx, cfg.export_eb, cfg.min_size
        )
    }
}

/// Pastes per-detection mask logits onto full-resolution canvases.
///
/// Args:
///     masks: float32 [n, kh, kw] mask logits, one per row of `bboxes`
///     bboxes: float32 [n, 6] rescaled detection rows
///     counts: rows per image
///     origin_shapes: (h, w) per image
///     threshold: pasted values >= threshold become 1 (default: 0.5)
///     parallel: paste detections in parallel (default: False)
///
/// Returns:
///     int32 array [n, max_h, max_w]; cells outside an image are -1.
#[pyfunction]
#[pyo3(signature = (masks, bboxes, counts, origin_shapes, threshold = 0.5, parallel = false))]
fn paste_masks<'py>(
    py: Python<'py>,
    masks: PyReadonlyArray3<'py, f32>,
    bboxes: PyReadonlyArray2<'py, f32>,
    counts: Vec<usize>,
    origin_shapes: Vec<(usize, usize)>,
    threshold: f32,
    parallel: bool,
) -> PyResult<Bound<'py, PyArray3<i32>>> {
    let shape = masks.shape();
    let (count, height, width) = (shape[0], shape[1], shape[2]);
    let stack = MapStack::new(masks.as_slice()?, count, width, height).map_err(to_py_err)?;
    let batch = BatchBuffer::from_table(&read_rows::<6>(&bboxes)?, counts).map_err(to_py_err)?;
    let shapes: Vec<OriginShape> = origin_shapes
        .into_iter()
        .map(|(h, w)| OriginShape::new(h, w))
        .collect();

    let post = MaskPostProcess::new(MaskPostProcessConfig {
        binary_threshold: threshold,
        backend: if parallel {
            SampleBackend::Parallel
        } else {
            SampleBackend::Scalar
        },
        ..MaskPostProcessConfig::default()
    })
    .map_err(to_py_err)?;
    let canvas = post.run(stack, &batch, &shapes).map_err(to_py_err)?;
    let dims = [canvas.count(), canvas.height(), canvas.width()];
    canvas.into_vec().into_pyarray(py).reshape(dims)
}

/// Python module for detpost.
#[pymodule]
fn _detpost(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<BBoxPostProcess>()?;
    m.add_function(wrap_pyfunction!(nms, m)?)?;
    m.add_function(wrap_pyfunction!(multiclass_nms, m)?)?;
    m.add_function(wrap_pyfunction!(paste_masks, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
