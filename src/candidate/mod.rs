//! Candidate ranking utilities.
//!
//! Includes deterministic Top-K selection used by the query decoder.

pub(crate) mod topk;
