//! detpost turns raw detection-head outputs into final detections and masks.
//!
//! The crate covers the CPU side of an object-detection pipeline after the
//! network has run: greedy per-class NMS, rescaling boxes back to the original
//! image, top-K decoding for query-based heads and pasting instance masks at
//! full resolution. Batches are flat buffers with per-image counts. Optional
//! parallelism is available via the `rayon` feature and a SIMD suppression
//! kernel via `simd`.

mod trace;

pub mod bbox;
mod candidate;
pub mod decode;
pub mod detection;
pub mod lowlevel;
pub mod map;
pub mod mask;
pub mod nms;
pub mod util;

pub use bbox::BBox;
pub use decode::{
    BBoxPostProcess, BBoxPostProcessConfig, BoxDecodeType, HeadOutput, Prediction,
    QueryDecodeConfig, QueryPostProcess, QueryPrediction, QueryTensors, ScoreMode,
};
pub use detection::{BatchBuffer, Detection, ImageMeta, OriginShape, ScoredBox};
pub use map::{MapStack, MapView, OwnedMap};
pub use mask::{MaskCanvas, MaskPostProcess, MaskPostProcessConfig, SampleBackend};
pub use nms::{multiclass_nms, nms, nms_indices, MatchMetric, NmsConfig};
pub use util::{DetPostError, DetPostResult};

#[cfg(feature = "rayon")]
pub use nms::multiclass_nms_par;
