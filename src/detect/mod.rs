//! Object detection collaborator interface.
//!
//! The detector itself is opaque: anything implementing `DetectorBackend`
//! can be plugged in. Detection must never run on the capture thread.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectorBackend, FnBackend};
pub use backends::stub::MOTION_LABEL;
pub use backends::StubBackend;
pub use registry::BackendRegistry;
pub use result::{Detection, DetectionResult};
