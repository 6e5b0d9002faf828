//! camwatchd - edge capture daemon
//!
//! This daemon:
//! 1. Connects to the configured camera stream and keeps it connected
//! 2. Runs detection on buffered frames and POSTs results
//! 3. Renders an annotated local preview
//! 4. Serves the latest frame as MJPEG on `GET /frame`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::Ordering;
use std::time::Duration;

use camwatch::{
    api::ApiConfig,
    consumers::{JpegFilePreview, LogPreview, PreviewSink},
    ingest::SessionConfig,
    net, source_for, BackendRegistry, CamwatchConfig, ConfigOverrides, Controller,
    HttpResultSink, NullSink, ResultSink,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Stream URL; overrides RTSP_URL. Credentials belong in RTSP_USERNAME/RTSP_PASSWORD.
    #[arg(long)]
    url: Option<String>,
    /// Host to bind; the configured port is kept unless --port is given.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind; the configured host is kept unless --host is given.
    #[arg(long)]
    port: Option<u16>,
    /// Detection results are POSTed here as JSON.
    #[arg(long)]
    result_url: Option<String>,
    /// Detector backend name.
    #[arg(long)]
    detector: Option<String>,
    /// Minimum confidence for a detection to be forwarded.
    #[arg(long)]
    confidence: Option<f32>,
    /// Frames buffered per queue consumer.
    #[arg(long)]
    buffer_capacity: Option<usize>,
    /// Write the annotated preview to this JPEG file.
    #[arg(long)]
    preview_path: Option<PathBuf>,
    /// List detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            url: self.url.clone(),
            http_addr: None,
            http_host: self.host.clone(),
            http_port: self.port,
            result_url: self.result_url.clone(),
            detector: self.detector.clone(),
            confidence_threshold: self.confidence,
            buffer_capacity: self.buffer_capacity,
            preview_path: self.preview_path.clone(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let registry = BackendRegistry::with_builtin();
    if args.list_detectors {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }

    let config = CamwatchConfig::load(&args.overrides())?;
    let endpoint = config.endpoint()?;
    let source = source_for(&endpoint, &config.source_settings())?;
    let backend = registry.create(&config.detection.detector)?;
    let sink: Box<dyn ResultSink> = match &config.detection.result_url {
        Some(url) => Box::new(HttpResultSink::new(url, config.detection.post_timeout)?),
        None => {
            log::info!("no result url configured; detections are logged only");
            Box::new(NullSink)
        }
    };
    let preview: Box<dyn PreviewSink> = match &config.preview.output_path {
        Some(path) => Box::new(JpegFilePreview::new(path).with_quality(config.http.jpeg_quality)),
        None => Box::new(LogPreview::new()),
    };

    log::info!(
        "camwatchd {} connecting to stream: {}",
        env!("CARGO_PKG_VERSION"),
        endpoint
    );

    let label = endpoint.to_string();
    let controller = Controller::builder(endpoint, source)
        .session_config(SessionConfig {
            connect_backoff: config.stream.connect_backoff,
            read_retry: config.stream.read_retry,
        })
        .buffer_capacity(config.buffer_capacity)
        .detection(
            backend,
            sink,
            config.detection.confidence_threshold,
            config.take_timeout,
        )
        .preview(preview, config.preview.refresh_hz)
        .http(ApiConfig {
            addr: config.http.addr.clone(),
            jpeg_quality: config.http.jpeg_quality,
            frame_wait: config.http.frame_wait,
        })
        .build();
    controller.start()?;

    if let Some(addr) = controller.http_addr() {
        log::info!("serving MJPEG on {}", addr);
        log::info!("available network interfaces:");
        for url in net::interface_urls(addr) {
            log::info!("  - {}/frame", url);
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("camwatchd running; waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => log_health(&controller, &label),
        }
    }

    log::info!("shutdown signal received, stopping...");
    controller.stop()?;
    log::info!("camwatchd stopped");
    Ok(())
}

fn log_health(controller: &Controller, endpoint: &str) {
    let stats = controller.monitor().stats();
    let detection = controller
        .detection_stats()
        .map(|stats| {
            format!(
                " detected={} delivered={} sink_failures={}",
                stats.frames_processed.load(Ordering::Relaxed),
                stats.results_delivered.load(Ordering::Relaxed),
                stats.sink_failures.load(Ordering::Relaxed),
            )
        })
        .unwrap_or_default();
    log::info!(
        "health: {} state={} frames={} connects={} reconnects={}{}",
        endpoint,
        stats.state,
        stats.frames_captured,
        stats.connect_attempts,
        stats.reconnects,
        detection
    );
}
