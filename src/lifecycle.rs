//! Start/stop authority for the capture thread and every consumer.
//!
//! Shutdown order: cancel the shared signal, join the capture thread (its
//! session releases the source handle on the way out), close the distributor
//! so blocked consumers wake, then join consumers and the HTTP server. Once
//! `stop` returns no frame is published again and no capture handle is open.

use anyhow::{anyhow, bail, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::api::{ApiConfig, ApiHandle, ApiServer, ApiState};
use crate::consumers::{
    DetectionStats, DetectionWorker, LatestDetections, PreviewSink, PreviewWorker,
};
use crate::detect::DetectorBackend;
use crate::distributor::{FrameDistributor, DEFAULT_BUFFER_CAPACITY};
use crate::endpoint::StreamEndpoint;
use crate::ingest::{CaptureSession, CaptureSource, SessionConfig, SessionMonitor};
use crate::shutdown::ShutdownSignal;
use crate::transport::ResultSink;

pub struct ControllerBuilder {
    endpoint: StreamEndpoint,
    source: Box<dyn CaptureSource>,
    session_config: SessionConfig,
    buffer_capacity: usize,
    detection: Option<DetectionSetup>,
    preview: Option<PreviewSetup>,
    http: Option<ApiConfig>,
}

struct DetectionSetup {
    backend: Box<dyn DetectorBackend>,
    sink: Box<dyn ResultSink>,
    threshold: f32,
    take_timeout: Duration,
}

struct PreviewSetup {
    sink: Box<dyn PreviewSink>,
    refresh_hz: u32,
}

impl ControllerBuilder {
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn detection(
        mut self,
        backend: Box<dyn DetectorBackend>,
        sink: Box<dyn ResultSink>,
        threshold: f32,
        take_timeout: Duration,
    ) -> Self {
        self.detection = Some(DetectionSetup {
            backend,
            sink,
            threshold,
            take_timeout,
        });
        self
    }

    pub fn preview(mut self, sink: Box<dyn PreviewSink>, refresh_hz: u32) -> Self {
        self.preview = Some(PreviewSetup { sink, refresh_hz });
        self
    }

    pub fn http(mut self, config: ApiConfig) -> Self {
        self.http = Some(config);
        self
    }

    /// Wire components together. Nothing runs until [`Controller::start`].
    pub fn build(self) -> Controller {
        let distributor = Arc::new(FrameDistributor::new(self.buffer_capacity));
        let detections = Arc::new(LatestDetections::new());
        let session = CaptureSession::new(
            self.endpoint,
            self.source,
            distributor.clone(),
            self.session_config,
        );
        let monitor = session.monitor();

        // Subscribe now so the detector's queue sees the very first frame.
        let detection = self.detection.map(|setup| {
            DetectionWorker::new(
                distributor.subscribe(),
                setup.backend,
                setup.sink,
                detections.clone(),
            )
            .with_threshold(setup.threshold)
            .with_take_timeout(setup.take_timeout)
        });
        let detection_stats = detection.as_ref().map(DetectionWorker::stats);
        let preview = self.preview.map(|setup| {
            PreviewWorker::new(
                distributor.latest(),
                detections.clone(),
                setup.sink,
                setup.refresh_hz,
            )
        });
        let api = self.http.map(|cfg| {
            ApiServer::new(
                cfg,
                ApiState {
                    latest: distributor.latest(),
                    detections: detections.clone(),
                    monitor: Some(monitor.clone()),
                },
            )
        });

        Controller {
            shutdown: ShutdownSignal::new(),
            distributor,
            detections,
            monitor,
            detection_stats,
            state: Mutex::new(ControllerState::Idle(Box::new(Components {
                session,
                detection,
                preview,
                api,
            }))),
        }
    }
}

struct Components {
    session: CaptureSession,
    detection: Option<DetectionWorker>,
    preview: Option<PreviewWorker>,
    api: Option<ApiServer>,
}

struct Running {
    capture: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    api: Option<ApiHandle>,
}

enum ControllerState {
    Idle(Box<Components>),
    Running(Running),
    Stopped,
}

pub struct Controller {
    shutdown: ShutdownSignal,
    distributor: Arc<FrameDistributor>,
    detections: Arc<LatestDetections>,
    monitor: SessionMonitor,
    detection_stats: Option<Arc<DetectionStats>>,
    state: Mutex<ControllerState>,
}

impl Controller {
    pub fn builder(endpoint: StreamEndpoint, source: Box<dyn CaptureSource>) -> ControllerBuilder {
        ControllerBuilder {
            endpoint,
            source,
            session_config: SessionConfig::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            detection: None,
            preview: None,
            http: None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the capture thread and every configured consumer.
    ///
    /// No-op while running. A stopped controller cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        let components = match std::mem::replace(&mut *state, ControllerState::Stopped) {
            ControllerState::Idle(components) => components,
            running @ ControllerState::Running(_) => {
                *state = running;
                log::debug!("start requested while already running");
                return Ok(());
            }
            ControllerState::Stopped => bail!("controller has been stopped"),
        };
        let Components {
            session,
            detection,
            preview,
            api,
        } = *components;

        let mut running = Running {
            capture: None,
            workers: Vec::new(),
            api: None,
        };

        let spawned = (|| -> Result<()> {
            if let Some(server) = api {
                running.api = Some(server.spawn(self.shutdown.clone())?);
            }
            if let Some(worker) = detection {
                running
                    .workers
                    .push(self.spawn_named("detect", move |shutdown| worker.run(shutdown))?);
            }
            if let Some(worker) = preview {
                running
                    .workers
                    .push(self.spawn_named("preview", move |shutdown| worker.run(shutdown))?);
            }
            running.capture = Some(self.spawn_named("capture", move |shutdown| {
                session.run(shutdown)
            })?);
            Ok(())
        })();

        match spawned {
            Ok(()) => {
                *state = ControllerState::Running(running);
                Ok(())
            }
            Err(err) => {
                // Whatever did start is torn down; the controller is spent.
                self.shutdown.cancel();
                self.teardown(running);
                Err(err)
            }
        }
    }

    fn spawn_named<F>(&self, name: &str, body: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(&ShutdownSignal) + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&shutdown))
            .map_err(|err| anyhow!("spawn {} thread: {}", name, err))
    }

    /// Stop everything and wait for it. Idempotent; concurrent callers block
    /// until the first one finishes.
    pub fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, ControllerState::Stopped) {
            ControllerState::Running(running) => {
                log::info!("stopping capture and consumers");
                self.teardown(running)
            }
            // Never started: dropping the session releases nothing it did not open.
            ControllerState::Idle(_) => Ok(()),
            ControllerState::Stopped => Ok(()),
        }
    }

    fn teardown(&self, mut running: Running) -> Result<()> {
        let mut panicked = Vec::new();
        if let Some(capture) = running.capture.take() {
            if capture.join().is_err() {
                panicked.push("capture");
            }
        }
        self.distributor.close();
        for worker in running.workers.drain(..) {
            if worker.join().is_err() {
                panicked.push("consumer");
            }
        }
        if let Some(api) = running.api.take() {
            if let Err(err) = api.stop() {
                log::warn!("{:#}", err);
                panicked.push("http");
            }
        }
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("threads panicked during shutdown: {}", panicked.join(", ")))
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), ControllerState::Running(_))
    }

    /// Bound HTTP address, once started with an HTTP server.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        match &*self.lock_state() {
            ControllerState::Running(running) => running.api.as_ref().map(|api| api.addr),
            _ => None,
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn distributor(&self) -> Arc<FrameDistributor> {
        self.distributor.clone()
    }

    pub fn detections(&self) -> Arc<LatestDetections> {
        self.detections.clone()
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    pub fn detection_stats(&self) -> Option<Arc<DetectionStats>> {
        self.detection_stats.clone()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("controller shutdown: {:#}", err);
        }
    }
}
