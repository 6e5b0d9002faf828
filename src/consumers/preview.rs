//! Local preview consumer.
//!
//! Reads the latest-frame slot at the display refresh rate, overlays the most
//! recent detections on a private copy, and hands the image to a
//! `PreviewSink`. Frames published between refreshes are skipped.

use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::annotate::annotate;
use super::detection::LatestDetections;
use crate::distributor::LatestFrame;
use crate::frame::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::shutdown::ShutdownSignal;

/// Default preview refresh rate.
pub const DEFAULT_REFRESH_HZ: u32 = 30;

/// Detections older than this many frames are not drawn.
const OVERLAY_MAX_AGE_FRAMES: u64 = 15;

/// Display target for annotated frames.
pub trait PreviewSink: Send {
    fn name(&self) -> &'static str;

    fn show(&mut self, image: &RgbImage) -> Result<()>;
}

/// Logs preview throughput at debug level.
#[derive(Debug, Default)]
pub struct LogPreview {
    shown: u64,
    window_started: Option<Instant>,
    window_frames: u64,
}

impl LogPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl PreviewSink for LogPreview {
    fn name(&self) -> &'static str {
        "log"
    }

    fn show(&mut self, image: &RgbImage) -> Result<()> {
        self.shown += 1;
        self.window_frames += 1;
        let started = *self.window_started.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        if elapsed >= Duration::from_secs(5) {
            log::debug!(
                "preview {}x{} at {:.1} fps",
                image.width(),
                image.height(),
                self.window_frames as f64 / elapsed.as_secs_f64()
            );
            self.window_started = Some(Instant::now());
            self.window_frames = 0;
        }
        Ok(())
    }
}

/// Keeps the newest annotated frame in a JPEG file.
///
/// Each frame is written to a sibling temp file and renamed over the target,
/// so readers never see a partial image.
#[derive(Debug)]
pub struct JpegFilePreview {
    path: PathBuf,
    tmp_path: PathBuf,
    quality: u8,
}

impl JpegFilePreview {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "preview.jpg".into());
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        Self {
            path,
            tmp_path,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreviewSink for JpegFilePreview {
    fn name(&self) -> &'static str {
        "jpeg-file"
    }

    fn show(&mut self, image: &RgbImage) -> Result<()> {
        let jpeg = encode_jpeg(image.as_raw(), image.width(), image.height(), self.quality)?;
        fs::write(&self.tmp_path, &jpeg)
            .with_context(|| format!("write {}", self.tmp_path.display()))?;
        fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("rename preview into {}", self.path.display()))?;
        Ok(())
    }
}

pub struct PreviewWorker {
    latest: Arc<LatestFrame>,
    detections: Arc<LatestDetections>,
    sink: Box<dyn PreviewSink>,
    refresh: Duration,
    wait_timeout: Duration,
}

impl PreviewWorker {
    pub fn new(
        latest: Arc<LatestFrame>,
        detections: Arc<LatestDetections>,
        sink: Box<dyn PreviewSink>,
        refresh_hz: u32,
    ) -> Self {
        Self {
            latest,
            detections,
            sink,
            refresh: Duration::from_secs_f64(1.0 / f64::from(refresh_hz.max(1))),
            wait_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn run(mut self, shutdown: &ShutdownSignal) {
        log::info!(
            "preview worker started ({} sink, every {:?})",
            self.sink.name(),
            self.refresh
        );
        let mut last_sequence = 0;
        let mut shown = 0u64;
        while !shutdown.is_cancelled() {
            let tick = Instant::now();
            let Some(frame) = self.latest.wait_newer(last_sequence, self.wait_timeout) else {
                if self.latest.is_closed() {
                    break;
                }
                log::debug!("preview: no new frame for {:?}", self.wait_timeout);
                continue;
            };
            last_sequence = frame.sequence();

            let overlay = self
                .detections
                .latest()
                .filter(|result| result.sequence + OVERLAY_MAX_AGE_FRAMES >= frame.sequence())
                .map(|result| result.detections)
                .unwrap_or_default();

            match annotate(&frame, &overlay).and_then(|image| self.sink.show(&image)) {
                Ok(()) => shown += 1,
                Err(err) => log::warn!(
                    "preview skipped frame {}: {:#}",
                    frame.sequence(),
                    err
                ),
            }

            if let Some(remaining) = self.refresh.checked_sub(tick.elapsed()) {
                if shutdown.wait_timeout(remaining) {
                    break;
                }
            }
        }
        log::info!("preview worker stopped after {} frames", shown);
    }
}
