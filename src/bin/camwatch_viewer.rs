//! camwatch_viewer - remote viewer for a camwatchd edge device
//!
//! Pulls the edge's `/frame` MJPEG stream through a capture session, so a
//! dropped edge is reconnected the same way a dropped camera is, and feeds
//! the frames to a local preview.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use camwatch::{
    consumers::{JpegFilePreview, LogPreview, PreviewSink, DEFAULT_REFRESH_HZ},
    ingest::{SessionConfig, SourceSettings},
    source_for, Controller, Credentials, StreamEndpoint,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Edge device base URL, e.g. http://10.0.0.20:8000
    #[arg(long, default_value = "http://localhost:8000")]
    edge: String,
    /// Basic-auth user for the edge, if it sits behind a proxy.
    #[arg(long, env = "CAMWATCH_EDGE_USERNAME")]
    username: Option<String>,
    #[arg(long, env = "CAMWATCH_EDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Write the preview to this JPEG file instead of only logging it.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_REFRESH_HZ)]
    refresh_hz: u32,
    /// Seconds to wait before reconnecting to an unreachable edge.
    #[arg(long, default_value_t = 5)]
    connect_backoff_secs: u64,
}

fn frame_endpoint(args: &Args) -> Result<StreamEndpoint> {
    let mut endpoint = StreamEndpoint::parse(&args.edge)?;
    if matches!(endpoint.path(), "" | "/") {
        endpoint = StreamEndpoint::parse(&format!("{}/frame", args.edge.trim_end_matches('/')))?;
    }
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(anyhow!("edge url {} must use http or https", endpoint));
    }
    match (&args.username, &args.password) {
        (Some(user), Some(pass)) => Ok(endpoint.with_credentials(Credentials::new(user, pass))),
        (None, None) => Ok(endpoint),
        _ => Err(anyhow!("--username and --password must be given together")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.connect_backoff_secs == 0 {
        return Err(anyhow!("connect backoff must be >= 1 second"));
    }
    let endpoint = frame_endpoint(&args)?;
    let source = source_for(&endpoint, &SourceSettings::default())?;
    let preview: Box<dyn PreviewSink> = match &args.output {
        Some(path) => Box::new(JpegFilePreview::new(path)),
        None => Box::new(LogPreview::new()),
    };

    log::info!("viewing {}", endpoint);
    let controller = Controller::builder(endpoint, source)
        .session_config(SessionConfig {
            connect_backoff: Duration::from_secs(args.connect_backoff_secs),
            ..SessionConfig::default()
        })
        .preview(preview, args.refresh_hz)
        .build();
    controller.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    let _ = rx.recv();
    log::info!("stopping viewer...");
    controller.stop()?;
    let stats = controller.monitor().stats();
    log::info!(
        "viewer stopped after {} frames ({} reconnects)",
        stats.frames_captured,
        stats.reconnects
    );
    Ok(())
}
