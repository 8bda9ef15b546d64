//! Low-level building blocks for custom post-processing pipelines.
//!
//! These items expose the suppression kernels, the sorted box layout they
//! operate on, top-K selection and the raw resampling helpers used by the mask
//! stage. Most users should prefer the top-level post-processors.

pub use crate::bbox::intersection_inclusive;
pub use crate::candidate::topk::{Ranked, TopK};
pub use crate::mask::paste::{binarize, paste_mask};
pub use crate::mask::resize::resize_bilinear;
pub use crate::nms::{
    match_value, nms_indices_with, SortedBoxes, Suppress, SuppressKernel, SuppressScalar,
};

#[cfg(feature = "simd")]
pub use crate::nms::SuppressSimd;

/// Selects the `k` highest scores, best first, ties broken by lower index.
pub fn top_k(scores: &[f32], k: usize) -> Vec<Ranked> {
    crate::candidate::topk::top_k(scores, k)
}
