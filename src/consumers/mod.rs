//! Consumer adapters.
//!
//! Each consumer runs on its own thread against its own view of the
//! distributor:
//! - detection reads a `FrameQueue` (capture order, may drop on overflow)
//! - preview reads the `LatestFrame` slot (newest only)
//!
//! The MJPEG publisher lives in `api` and also reads the latest-frame slot.

mod annotate;
mod detection;
mod preview;

pub use annotate::annotate;
pub use detection::{
    DetectionStats, DetectionWorker, LatestDetections, DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use preview::{JpegFilePreview, LogPreview, PreviewSink, PreviewWorker, DEFAULT_REFRESH_HZ};
