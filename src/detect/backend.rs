use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Implementations receive a shared, read-only frame. They may be slow (tens
/// to hundreds of milliseconds per call); the detection worker runs them on
/// their own thread.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, returning boxes in frame pixel coordinates.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Adapts a plain `detect(frame)` function into a backend.
pub struct FnBackend<F> {
    name: &'static str,
    detect: F,
}

impl<F> FnBackend<F>
where
    F: FnMut(&Frame) -> Result<Vec<Detection>> + Send,
{
    pub fn new(name: &'static str, detect: F) -> Self {
        Self { name, detect }
    }
}

impl<F> DetectorBackend for FnBackend<F>
where
    F: FnMut(&Frame) -> Result<Vec<Detection>> + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (self.detect)(frame)
    }
}
