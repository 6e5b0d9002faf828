//! Outbound delivery of detection results.
//!
//! The detection worker hands each non-empty `DetectionResult` to a
//! `ResultSink`. Delivery is best effort: a failed POST is reported to the
//! caller, which logs it and moves on to the next frame.

mod sink;

pub use sink::{HttpResultSink, NullSink, ResultSink, DEFAULT_POST_TIMEOUT};
