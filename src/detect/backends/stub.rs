use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Label reported by the stub backend.
pub const MOTION_LABEL: &str = "motion";

/// Stub backend. Hashes pixels and reports a full-frame `motion` detection
/// whenever the content differs from the previous frame.
pub struct StubBackend {
    last_hash: Option<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();

        let motion = match self.last_hash {
            Some(prev) => prev != current_hash,
            None => false,
        };

        self.last_hash = Some(current_hash);

        if !motion {
            return Ok(Vec::new());
        }
        Ok(vec![Detection::new(
            MOTION_LABEL,
            0.85,
            [0.0, 0.0, frame.width as f32, frame.height as f32],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(fill: u8) -> Frame {
        Frame::new(vec![fill; 4 * 4 * 3], 4, 4, Utc::now()).unwrap()
    }

    #[test]
    fn stub_backend_detects_motion() -> Result<()> {
        let mut backend = StubBackend::new();

        // First frame: no motion (no previous)
        assert!(backend.detect(&frame(1))?.is_empty());

        // Second frame: different content = motion
        let detections = backend.detect(&frame(2))?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, MOTION_LABEL);
        assert_eq!(detections[0].bbox, [0.0, 0.0, 4.0, 4.0]);

        // Third frame: same as second = no motion
        assert!(backend.detect(&frame(2))?.is_empty());
        Ok(())
    }
}
