use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::detect::{DetectionResult, DetectorBackend};
use crate::distributor::FrameQueue;
use crate::frame::Frame;
use crate::shutdown::ShutdownSignal;
use crate::transport::ResultSink;

/// Default minimum confidence for a detection to be forwarded.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Most recent non-empty detection result, shared with preview and the API.
#[derive(Debug, Default)]
pub struct LatestDetections {
    slot: Mutex<Option<DetectionResult>>,
}

impl LatestDetections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: DetectionResult) {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result);
    }

    pub fn latest(&self) -> Option<DetectionResult> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Counters reported when the worker exits.
#[derive(Debug, Default)]
pub struct DetectionStats {
    pub frames_processed: AtomicU64,
    pub results_delivered: AtomicU64,
    pub detector_failures: AtomicU64,
    pub sink_failures: AtomicU64,
}

/// Queue-backed consumer that runs the detector and forwards results.
pub struct DetectionWorker {
    queue: Arc<FrameQueue>,
    backend: Box<dyn DetectorBackend>,
    sink: Box<dyn ResultSink>,
    latest: Arc<LatestDetections>,
    stats: Arc<DetectionStats>,
    threshold: f32,
    take_timeout: Duration,
}

impl DetectionWorker {
    pub fn new(
        queue: Arc<FrameQueue>,
        backend: Box<dyn DetectorBackend>,
        sink: Box<dyn ResultSink>,
        latest: Arc<LatestDetections>,
    ) -> Self {
        Self {
            queue,
            backend,
            sink,
            latest,
            stats: Arc::new(DetectionStats::default()),
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            take_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_take_timeout(mut self, timeout: Duration) -> Self {
        self.take_timeout = timeout;
        self
    }

    pub fn stats(&self) -> Arc<DetectionStats> {
        self.stats.clone()
    }

    pub fn run(mut self, shutdown: &ShutdownSignal) {
        if let Err(err) = self.backend.warm_up() {
            log::warn!("detector {} warm-up failed: {:#}", self.backend.name(), err);
        }
        log::info!(
            "detection worker started (detector {}, threshold {:.2})",
            self.backend.name(),
            self.threshold
        );
        while !shutdown.is_cancelled() {
            match self.queue.take(self.take_timeout) {
                Some(frame) => self.process(&frame),
                None if self.queue.is_closed() => break,
                None => continue,
            }
        }
        log::info!(
            "detection worker stopped after {} frames ({} results delivered, {} dropped frames)",
            self.stats.frames_processed.load(Ordering::Relaxed),
            self.stats.results_delivered.load(Ordering::Relaxed),
            self.queue.dropped()
        );
    }

    /// Detect, filter, publish, and deliver one frame. Failures are logged.
    pub fn process(&mut self, frame: &Frame) {
        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
        let detections = match self.backend.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.stats.detector_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "detector {} failed on frame {}: {:#}",
                    self.backend.name(),
                    frame.sequence(),
                    err
                );
                return;
            }
        };

        let kept: Vec<_> = detections
            .into_iter()
            .filter(|detection| detection.confidence >= self.threshold)
            .collect();
        if kept.is_empty() {
            return;
        }

        for detection in &kept {
            log::info!(
                "frame {}: {} ({:.2})",
                frame.sequence(),
                detection.label,
                detection.confidence
            );
        }

        let result = DetectionResult::for_frame(frame, kept);
        match self.sink.deliver(&result) {
            Ok(()) => {
                self.stats.results_delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("dropping detection result for frame {}: {:#}", frame.sequence(), err);
            }
        }
        self.latest.publish(result);
    }
}
