//! Admission side of the pipeline: rate limiting, request gating and the
//! durable hand-off to the dispatch queue, plus preference write validation.

pub mod ingestion;
pub mod preferences;
pub mod rate_limiter;
