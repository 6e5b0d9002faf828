use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// One detected object.
///
/// Serialises as `{"class": ..., "confidence": ..., "bbox": [x1, y1, x2, y2]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    /// Clamped to `[0, 1]`.
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in frame pixel coordinates.
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Detections for one frame, as posted to the result sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Capture time of the originating frame, ISO-8601.
    pub timestamp: String,
    pub detections: Vec<Detection>,
    /// `[height, width]` of the originating frame.
    pub frame_shape: [u32; 2],
    /// Sequence of the originating frame. Not part of the wire payload.
    #[serde(skip)]
    pub sequence: u64,
}

impl DetectionResult {
    pub fn for_frame(frame: &Frame, detections: Vec<Detection>) -> Self {
        Self {
            timestamp: frame.captured_at_iso(),
            detections,
            frame_shape: frame.shape(),
            sequence: frame.sequence(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
