//! Decoders that turn head outputs into image-space detections.
//!
//! [`rescale`] handles heads whose boxes are already decoded in network input
//! coordinates (two-stage and anchor-based detectors). [`query`] handles
//! query-based heads that emit normalized boxes and rely on top-K selection.

pub mod query;
pub mod rescale;

pub use query::{
    BoxDecodeType, QueryDecodeConfig, QueryPostProcess, QueryPrediction, QueryTensors, ScoreMode,
};
pub use rescale::{
    rescale_detection, BBoxPostProcess, BBoxPostProcessConfig, HeadOutput, Prediction,
};
