//! Capture session: keeps a stream connected and feeds the distributor.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming
//!      ^              |            |
//!      |          open failed   read ended / failed
//!      |              v            v
//!      +---- wait ---- Failed <----+
//!
//! any state -> Stopped   (shutdown signal)
//! ```
//!
//! A failed open waits `connect_backoff` before the next attempt; a stream
//! that ends or errors waits the shorter `read_retry`. There is no terminal
//! failure state: the session retries until it is told to stop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::source::CaptureSource;
use crate::distributor::FrameDistributor;
use crate::endpoint::{redact_text, StreamEndpoint};
use crate::shutdown::ShutdownSignal;

/// Default wait after a failed connect.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Default wait after a stream ends or a read fails.
pub const DEFAULT_READ_RETRY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Disconnected,
    Connecting,
    Streaming,
    Failed,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Disconnected => "disconnected",
            CaptureState::Connecting => "connecting",
            CaptureState::Streaming => "streaming",
            CaptureState::Failed => "failed",
            CaptureState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub connect_backoff: Duration,
    pub read_retry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
            read_retry: DEFAULT_READ_RETRY,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStats {
    pub state: CaptureState,
    pub frames_captured: u64,
    pub connect_attempts: u64,
    pub reconnects: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct MonitorInner {
    state: Mutex<CaptureState>,
    last_frame_at: Mutex<Option<DateTime<Utc>>>,
    frames_captured: AtomicU64,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
}

/// Cloneable read-only handle onto a running session's state and counters.
#[derive(Clone, Debug)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionMonitor {
    fn new() -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(CaptureState::Disconnected),
                last_frame_at: Mutex::new(None),
                frames_captured: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        *lock(&self.inner.state)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state(),
            frames_captured: self.inner.frames_captured.load(Ordering::Relaxed),
            connect_attempts: self.inner.connect_attempts.load(Ordering::Relaxed),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            last_frame_at: *lock(&self.inner.last_frame_at),
        }
    }

    fn set_state(&self, state: CaptureState) -> CaptureState {
        std::mem::replace(&mut *lock(&self.inner.state), state)
    }
}

/// Owns the capture source for the lifetime of the run.
pub struct CaptureSession {
    endpoint: StreamEndpoint,
    source: Box<dyn CaptureSource>,
    distributor: Arc<FrameDistributor>,
    config: SessionConfig,
    monitor: SessionMonitor,
    next_sequence: u64,
    handle_open: bool,
}

impl CaptureSession {
    pub fn new(
        endpoint: StreamEndpoint,
        source: Box<dyn CaptureSource>,
        distributor: Arc<FrameDistributor>,
        config: SessionConfig,
    ) -> Self {
        Self {
            endpoint,
            source,
            distributor,
            config,
            monitor: SessionMonitor::new(),
            next_sequence: 0,
            handle_open: false,
        }
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    /// Run until `shutdown` is cancelled. Never returns early on stream errors.
    ///
    /// The source handle is released on every exit path.
    pub fn run(mut self, shutdown: &ShutdownSignal) {
        let mut streamed_before = false;

        while !shutdown.is_cancelled() {
            self.transition(CaptureState::Connecting);
            self.monitor
                .inner
                .connect_attempts
                .fetch_add(1, Ordering::Relaxed);

            self.handle_open = true;
            if let Err(err) = self.source.open(&self.endpoint) {
                self.release_handle();
                self.transition(CaptureState::Failed);
                log::warn!(
                    "failed to open {} via {}: {}; retrying in {:?}",
                    self.endpoint,
                    self.source.name(),
                    redact_text(&format!("{err:#}")),
                    self.config.connect_backoff
                );
                if self.backoff(shutdown, self.config.connect_backoff) {
                    break;
                }
                continue;
            }

            if streamed_before {
                self.monitor.inner.reconnects.fetch_add(1, Ordering::Relaxed);
            }
            streamed_before = true;
            self.transition(CaptureState::Streaming);

            if self.stream(shutdown) {
                break;
            }

            self.release_handle();
            self.transition(CaptureState::Failed);
            if self.backoff(shutdown, self.config.read_retry) {
                break;
            }
        }

        self.release_handle();
        self.transition(CaptureState::Stopped);
    }

    /// Read loop. Returns `true` when it exited because of shutdown.
    fn stream(&mut self, shutdown: &ShutdownSignal) -> bool {
        loop {
            if shutdown.is_cancelled() {
                return true;
            }
            match self.source.read() {
                Ok(Some(mut frame)) => {
                    self.next_sequence += 1;
                    frame.set_sequence(self.next_sequence);
                    let captured_at = frame.captured_at();
                    self.distributor.publish(frame);
                    self.monitor
                        .inner
                        .frames_captured
                        .fetch_add(1, Ordering::Relaxed);
                    *lock(&self.monitor.inner.last_frame_at) = Some(captured_at);
                }
                Ok(None) if shutdown.is_cancelled() => return true,
                Err(_) if shutdown.is_cancelled() => return true,
                Ok(None) => {
                    log::warn!(
                        "stream {} ended; reconnecting in {:?}",
                        self.endpoint,
                        self.config.read_retry
                    );
                    return false;
                }
                Err(err) => {
                    log::warn!(
                        "failed to read frame from {}: {}; reconnecting in {:?}",
                        self.endpoint,
                        redact_text(&format!("{err:#}")),
                        self.config.read_retry
                    );
                    return false;
                }
            }
        }
    }

    /// Wait out a retry interval as `Disconnected`. Returns `true` on shutdown.
    fn backoff(&self, shutdown: &ShutdownSignal, interval: Duration) -> bool {
        self.transition(CaptureState::Disconnected);
        shutdown.wait_timeout(interval)
    }

    fn release_handle(&mut self) {
        if self.handle_open {
            self.handle_open = false;
            self.source.release();
        }
    }

    fn transition(&self, next: CaptureState) {
        let previous = self.monitor.set_state(next);
        if previous == next {
            return;
        }
        match next {
            CaptureState::Connecting => log::info!("connecting to {}", self.endpoint),
            CaptureState::Streaming => log::info!("streaming from {}", self.endpoint),
            CaptureState::Stopped => log::info!("capture session for {} stopped", self.endpoint),
            _ => log::debug!("capture session {} -> {}", previous, next),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release_handle();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
