use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;

use crate::detect::DetectionResult;
use crate::endpoint::redact_text;

/// Bound on one result POST, connect included.
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for detection results.
pub trait ResultSink: Send {
    /// Deliver one result. Never retried by the caller.
    fn deliver(&mut self, result: &DetectionResult) -> Result<()>;
}

/// POSTs results as JSON to an HTTP endpoint.
pub struct HttpResultSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpResultSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|err| anyhow!("invalid result url {}: {}", redact_text(url), err))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "result url {} must use http or https",
                redact_text(url)
            );
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            url: parsed.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ResultSink for HttpResultSink {
    fn deliver(&mut self, result: &DetectionResult) -> Result<()> {
        let body = serde_json::to_string(result).context("serialize detection result")?;
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => {
                log::debug!(
                    "delivered {} detections to {} ({})",
                    result.detections.len(),
                    redact_text(&self.url),
                    response.status()
                );
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => Err(anyhow!(
                "result sink {} answered HTTP {}",
                redact_text(&self.url),
                code
            )),
            Err(err) => Err(anyhow!(
                "POST to {} failed: {}",
                redact_text(&self.url),
                redact_text(&err.to_string())
            )),
        }
    }
}

/// Discards results. Used when no result URL is configured.
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn deliver(&mut self, _result: &DetectionResult) -> Result<()> {
        Ok(())
    }
}
