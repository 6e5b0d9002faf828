//! Frame ingestion.
//!
//! This module provides the capture backends and the session that drives them:
//! - RTSP streams through GStreamer (feature: rtsp-gstreamer)
//! - HTTP MJPEG streams and snapshot endpoints
//! - Synthetic `stub://` source (demos and testing)
//!
//! All backends produce `Frame` instances that the `CaptureSession` stamps
//! with a sequence number and hands to the `FrameDistributor`.
//!
//! The ingestion layer MUST NOT:
//! - Log stream credentials (use the endpoint's redacted form)
//! - Block on downstream consumers

pub mod mjpeg;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod session;
pub mod source;
pub mod synthetic;

pub use mjpeg::MjpegHttpSource;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::GstreamerRtspSource;
pub use session::{
    CaptureSession, CaptureState, SessionConfig, SessionMonitor, SessionStats,
    DEFAULT_CONNECT_BACKOFF, DEFAULT_READ_RETRY,
};
pub use source::{
    source_for, CaptureSource, SourceSettings, DEFAULT_READ_TIMEOUT, SUPPORTED_SCHEMES,
};
pub use synthetic::SyntheticSource;
