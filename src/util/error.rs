//! Error types for detpost.

use thiserror::Error;

/// Result alias for detpost operations.
pub type DetPostResult<T> = std::result::Result<T, DetPostError>;

/// Errors that can occur while post-processing detections.
///
/// Every variant is a contract or configuration violation; none of them is
/// transient.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetPostError {
    /// Width or height is zero or overflows.
    #[error("invalid dimensions: width={width}, height={height}")]
    InvalidDimensions { width: usize, height: usize },
    /// Backing buffer is shorter than the declared shape.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Overlap metric name is not one of `iou`, `ios`.
    #[error("unknown match metric `{name}` (expected `iou` or `ios`)")]
    UnknownMetric { name: String },
    /// Box decode type name is not one of `origin`, `pad`.
    #[error("unknown bbox decode type `{name}` (expected `origin` or `pad`)")]
    UnknownDecodeType { name: String },
    /// Score mode name is not one of `sigmoid`, `softmax`.
    #[error("unknown score mode `{name}` (expected `sigmoid` or `softmax`)")]
    UnknownScoreMode { name: String },
    /// Per-image counts do not add up to the number of rows.
    #[error("counts sum to {counts_sum} but the buffer holds {rows} rows")]
    CountMismatch { counts_sum: usize, rows: usize },
    /// Batch size differs from what the operation requires.
    #[error("batch size mismatch in {context}: expected {expected}, got {got}")]
    BatchSizeMismatch {
        expected: usize,
        got: usize,
        context: &'static str,
    },
    /// A tensor has the wrong number of elements along some axis.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        expected: usize,
        got: usize,
        context: &'static str,
    },
    /// A configuration value is out of range or inconsistent.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: &'static str },
    /// Mask decoding was requested but the head produced no mask logits.
    #[error("mask output requested but no mask logits were provided")]
    MissingMasks,
}
