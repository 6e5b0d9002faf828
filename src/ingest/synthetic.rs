//! Synthetic frame source for `stub://` endpoints.
//!
//! Produces a moving RGB pattern at the configured rate. Used for demos and
//! for exercising the pipeline without a camera.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::time::{Duration, Instant};

use super::source::{CaptureSource, SourceSettings};
use crate::endpoint::StreamEndpoint;
use crate::frame::Frame;

pub struct SyntheticSource {
    settings: SourceSettings,
    open: bool,
    frame_count: u64,
    /// Simulated scene state; changes occasionally to look like motion.
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            open: false,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.settings.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((1000 / self.settings.target_fps).max(1) as u64)
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let offset = (self.frame_count % width.max(1) as u64) as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + offset) % 256) as u8;
            px[1] = (y % 256) as u8;
            px[2] = self.scene_state.wrapping_mul(40);
        }
        pixels
    }
}

impl CaptureSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, endpoint: &StreamEndpoint) -> Result<()> {
        self.open = true;
        log::info!("synthetic source connected to {}", endpoint);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("synthetic source is not open"));
        }
        let interval = self.frame_interval();
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.settings.width, self.settings.height, Utc::now()).map(Some)
    }

    fn release(&mut self) {
        self.open = false;
        self.last_frame_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SourceSettings {
        SourceSettings {
            target_fps: 0,
            width: 16,
            height: 8,
            ..SourceSettings::default()
        }
    }

    #[test]
    fn produces_frames_of_configured_size() -> Result<()> {
        let mut source = SyntheticSource::new(settings());
        source.open(&StreamEndpoint::parse("stub://test")?)?;
        let frame = source.read()?.expect("frame");
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.pixels().len(), 16 * 8 * 3);
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut source = SyntheticSource::new(settings());
        source.open(&StreamEndpoint::parse("stub://test")?)?;
        let a = source.read()?.expect("frame");
        let b = source.read()?.expect("frame");
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn read_after_release_fails() -> Result<()> {
        let mut source = SyntheticSource::new(settings());
        source.open(&StreamEndpoint::parse("stub://test")?)?;
        source.release();
        assert!(source.read().is_err());
        Ok(())
    }
}
