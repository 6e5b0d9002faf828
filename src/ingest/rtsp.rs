//! RTSP capture through GStreamer (feature `rtsp-gstreamer`).
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` producing RGB.
//! Credentials are set as `rtspsrc` properties rather than embedded in the
//! pipeline description, and bus messages are scrubbed before they reach a
//! log line or error.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use gstreamer::prelude::*;
use std::time::Duration;

use super::source::{CaptureSource, SourceSettings};
use crate::endpoint::{redact_text, StreamEndpoint};
use crate::frame::Frame;

const PIPELINE_DESCRIPTION: &str = "rtspsrc name=src latency=0 ! decodebin ! videoconvert ! \
     video/x-raw,format=RGB ! appsink name=appsink sync=false max-buffers=1 drop=true";

pub struct GstreamerRtspSource {
    settings: SourceSettings,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: Option<gstreamer_app::AppSink>,
}

impl GstreamerRtspSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            settings,
            pipeline: None,
            appsink: None,
        })
    }

    fn build_pipeline(
        &self,
        endpoint: &StreamEndpoint,
    ) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        let pipeline = gstreamer::parse::launch(PIPELINE_DESCRIPTION)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let src = pipeline
            .by_name("src")
            .context("rtspsrc element missing from pipeline")?;
        src.set_property("location", endpoint.url_without_credentials());
        src.set_property("timeout", self.settings.read_timeout.as_micros() as u64);
        if let Some(creds) = endpoint.credentials() {
            src.set_property("user-id", creds.username());
            src.set_property("user-pw", creds.password());
        }

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok((pipeline, appsink))
    }

    /// Drain pending bus messages. Errors and EOS end the read loop.
    fn poll_bus(&self) -> Result<BusStatus> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Ok(BusStatus::Running);
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        redact_text(&err.error().to_string())
                    ));
                }
                MessageView::Eos(..) => return Ok(BusStatus::Eos),
                _ => {}
            }
        }
        Ok(BusStatus::Running)
    }
}

enum BusStatus {
    Running,
    Eos,
}

impl CaptureSource for GstreamerRtspSource {
    fn name(&self) -> &'static str {
        "gstreamer-rtsp"
    }

    fn open(&mut self, endpoint: &StreamEndpoint) -> Result<()> {
        let (pipeline, appsink) = self.build_pipeline(endpoint)?;
        self.pipeline = Some(pipeline.clone());
        self.appsink = Some(appsink);
        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|_| anyhow!("set RTSP pipeline for {} to Playing", endpoint))?;
        if let BusStatus::Eos = self.poll_bus()? {
            return Err(anyhow!("RTSP stream {} ended during connect", endpoint));
        }
        log::info!("gstreamer source connected to {}", endpoint);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if let BusStatus::Eos = self.poll_bus()? {
            return Ok(None);
        }
        let appsink = self
            .appsink
            .as_ref()
            .ok_or_else(|| anyhow!("RTSP source not connected; call open() first"))?;

        let timeout = gstreamer::ClockTime::from_nseconds(
            self.settings
                .read_timeout
                .max(Duration::from_millis(500))
                .as_nanos() as u64,
        );
        let Some(sample) = appsink.try_pull_sample(timeout) else {
            if appsink.is_eos() {
                return Ok(None);
            }
            return Err(anyhow!(
                "RTSP stream stalled for {:?}",
                self.settings.read_timeout
            ));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Frame::new(pixels, width, height, Utc::now()).map(Some)
    }

    fn release(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if pipeline.set_state(gstreamer::State::Null).is_err() {
                log::warn!("RTSP pipeline did not reach Null state on release");
            }
        }
    }
}

impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let frame_bytes = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?;
        return Ok((frame_bytes.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
