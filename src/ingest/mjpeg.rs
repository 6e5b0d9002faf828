//! HTTP MJPEG pull source for `http(s)://` endpoints.
//!
//! Reads a `multipart/x-mixed-replace` JPEG stream (such as another edge
//! device's `/frame` endpoint) or, when the server answers with a single
//! image, re-fetches a snapshot on every read. Credentials go out as HTTP
//! Basic auth and never appear in the request URL.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::Read;
use std::time::Duration;
use zeroize::Zeroizing;

use super::source::{CaptureSource, SourceSettings};
use crate::endpoint::{redact_text, StreamEndpoint};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegHttpSource {
    settings: SourceSettings,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    url: String,
    authorization: Option<Zeroizing<String>>,
    frames_read: u64,
}

enum HttpStream {
    Multipart(MjpegStream),
    Snapshot,
}

impl MjpegHttpSource {
    pub fn new(settings: SourceSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(settings.read_timeout)
            .build();
        Self {
            settings,
            agent,
            stream: None,
            url: String::new(),
            authorization: None,
            frames_read: 0,
        }
    }

    fn get(&self) -> Result<ureq::Response> {
        let mut request = self.agent.get(&self.url);
        if let Some(value) = &self.authorization {
            request = request.set("Authorization", value.as_str());
        }
        request
            .call()
            .map_err(|err| anyhow!("GET {} failed: {}", self.url, redact_text(&err.to_string())))
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>> {
        let response = self.get()?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        Ok(bytes)
    }
}

impl CaptureSource for MjpegHttpSource {
    fn name(&self) -> &'static str {
        "mjpeg-http"
    }

    fn open(&mut self, endpoint: &StreamEndpoint) -> Result<()> {
        self.url = endpoint.url_without_credentials();
        self.authorization = endpoint.credentials().map(|creds| {
            let raw = Zeroizing::new(format!("{}:{}", creds.username(), creds.password()));
            Zeroizing::new(format!("Basic {}", BASE64.encode(raw.as_bytes())))
        });

        let response = self.get()?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        self.stream = Some(if content_type.contains("multipart") {
            HttpStream::Multipart(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        });
        log::info!(
            "mjpeg source connected to {} ({}, read timeout {:?})",
            endpoint,
            if content_type.is_empty() { "unknown type" } else { content_type.as_str() },
            self.settings.read_timeout
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let jpeg = match self.stream.as_mut() {
            Some(HttpStream::Multipart(stream)) => match stream.read_next_jpeg()? {
                Some(jpeg) => jpeg,
                None => return Ok(None),
            },
            Some(HttpStream::Snapshot) => self.fetch_snapshot()?,
            None => return Err(anyhow!("mjpeg source not connected; call open() first")),
        };
        let frame = Frame::from_jpeg(&jpeg)?;
        self.frames_read += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("mjpeg source released after {} frames", self.frames_read);
        }
        self.authorization = None;
    }
}

/// Incremental scanner for JPEG images in a multipart byte stream.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` once the stream ends cleanly.
    pub(crate) fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
