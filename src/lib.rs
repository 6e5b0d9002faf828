//! camwatch: edge video capture and distribution.
//!
//! A single capture session keeps a network camera stream connected and
//! publishes decoded frames to a distributor. Independent consumers read
//! from it at their own pace:
//!
//! - detection reads a bounded drop-oldest queue and POSTs results
//! - preview reads the latest-frame slot and draws overlays on a copy
//! - the HTTP server streams the latest frame as MJPEG
//!
//! # Invariants
//!
//! 1. **Credentials never rendered**: endpoints display with `****:****`
//!    in place of the userinfo, and transport error text is scrubbed.
//! 2. **Capture never blocks on consumers**: publishing evicts the oldest
//!    buffered frame instead of waiting.
//! 3. **Frames are immutable once published**: drawing happens on a copy.
//! 4. **Handles are released on every exit path**: exactly once per open.
//!
//! # Module Structure
//!
//! - `endpoint`: stream address, credentials, redaction
//! - `frame`: decoded frame type and JPEG helpers
//! - `distributor`: `FrameQueue`, `LatestFrame`, `FrameDistributor`
//! - `ingest`: capture backends and the `CaptureSession` state machine
//! - `detect`: detector trait, built-in backends, result types
//! - `transport`: result sinks
//! - `consumers`: detection and preview workers
//! - `api`: HTTP MJPEG server
//! - `lifecycle`: start/stop controller
//! - `config`: layered configuration

pub mod api;
pub mod config;
pub mod consumers;
pub mod detect;
pub mod distributor;
pub mod endpoint;
pub mod frame;
pub mod ingest;
pub mod lifecycle;
pub mod net;
pub mod shutdown;
pub mod transport;

pub use api::{ApiConfig, ApiHandle, ApiServer, ApiState};
pub use config::{CamwatchConfig, ConfigOverrides};
pub use consumers::{
    DetectionWorker, JpegFilePreview, LatestDetections, LogPreview, PreviewSink, PreviewWorker,
};
pub use detect::{BackendRegistry, Detection, DetectionResult, DetectorBackend, StubBackend};
pub use distributor::{FrameDistributor, FrameQueue, LatestFrame};
pub use endpoint::{redact_text, Credentials, StreamEndpoint, REDACTED_USERINFO};
pub use frame::{Frame, SharedFrame};
pub use ingest::{
    source_for, CaptureSession, CaptureSource, CaptureState, SessionConfig, SessionMonitor,
    SessionStats, SourceSettings,
};
pub use lifecycle::{Controller, ControllerBuilder};
pub use shutdown::ShutdownSignal;
pub use transport::{HttpResultSink, NullSink, ResultSink};
