//! HTTP frame server.
//!
//! Routes:
//! - `GET /frame`: `multipart/x-mixed-replace` JPEG stream, boundary `frame`
//! - `GET /snapshot.jpg`: newest frame as one JPEG, 204 before the first frame
//! - `GET /detections`: newest detection result as JSON, 204 if none yet
//! - `GET /health`: capture state and counters
//!
//! Each connection gets its own thread. A `/frame` stream that has no new
//! frame within the wait window logs and keeps the connection open.

use anyhow::{anyhow, Result};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::consumers::LatestDetections;
use crate::distributor::LatestFrame;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::SessionMonitor;
use crate::shutdown::ShutdownSignal;

const MAX_REQUEST_BYTES: usize = 8192;
const BOUNDARY: &str = "frame";
const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Pause after a failed accept (fd exhaustion, aborted handshake) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default listen address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8000";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub jpeg_quality: u8,
    /// How long a `/frame` stream waits for a new frame before logging.
    pub frame_wait: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_HTTP_ADDR.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_wait: Duration::from_secs(1),
        }
    }
}

/// Views the server reads from. None of them are mutated here.
#[derive(Clone)]
pub struct ApiState {
    pub latest: Arc<LatestFrame>,
    pub detections: Arc<LatestDetections>,
    pub monitor: Option<SessionMonitor>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: ShutdownSignal,
    active: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Connection threads that have not exited yet.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting, end open streams, and join every connection thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();
        self.join_server()
    }

    fn join_server(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("http server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let _ = self.join_server();
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    /// Bind and serve on a background thread until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: ShutdownSignal) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|err| anyhow!("invalid http address '{}': {}", self.cfg.addr, err))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|err| anyhow!("bind http server on {}: {}", configured_addr, err))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let active = Arc::new(AtomicUsize::new(0));
        let thread_shutdown = shutdown.clone();
        let thread_active = active.clone();
        let join = std::thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || run_api(listener, self.cfg, self.state, thread_shutdown, thread_active))?;

        Ok(ApiHandle {
            addr,
            shutdown,
            active,
            join: Some(join),
        })
    }
}

/// Decrements the live-connection count when a connection thread exits.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: ApiState,
    shutdown: ShutdownSignal,
    active: Arc<AtomicUsize>,
) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    while !shutdown.is_cancelled() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let state = state.clone();
                let shutdown = shutdown.clone();
                let guard = ConnectionGuard::enter(&active);
                let spawned = std::thread::Builder::new()
                    .name("http-conn".to_string())
                    .spawn(move || {
                        let _guard = guard;
                        if let Err(err) = handle_connection(stream, &cfg, &state, &shutdown) {
                            log::debug!("http connection from {} ended: {:#}", peer, err);
                        }
                    });
                match spawned {
                    Ok(handle) => connections.push(handle),
                    Err(err) => log::warn!("could not spawn connection thread: {}", err),
                }
            }
            Err(err) => {
                let delay = accept_retry_delay(&err);
                if err.kind() != ErrorKind::WouldBlock {
                    log::warn!("accept failed: {}; retrying in {:?}", err, delay);
                }
                shutdown.wait_timeout(delay);
            }
        }
        connections.retain(|handle| !handle.is_finished());
    }
    for handle in connections {
        let _ = handle.join();
    }
    log::info!("http server stopped");
}

/// Accept errors never end the server; they only choose how long to pause.
fn accept_retry_delay(err: &io::Error) -> Duration {
    match err.kind() {
        ErrorKind::WouldBlock => ACCEPT_POLL,
        _ => ACCEPT_ERROR_BACKOFF,
    }
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/frame" => stream_frames(stream, cfg, state, shutdown),
        "/snapshot.jpg" => {
            let Some(frame) = state.latest.latest() else {
                return write_response(&mut stream, 204, "image/jpeg", &[]);
            };
            let jpeg = frame.encode_jpeg(cfg.jpeg_quality)?;
            write_response(&mut stream, 200, "image/jpeg", &jpeg)
        }
        "/detections" => match state.detections.latest() {
            Some(result) => {
                let payload = serde_json::to_vec(&result)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            None => write_response(&mut stream, 204, "application/json", &[]),
        },
        "/health" => {
            let payload = match &state.monitor {
                Some(monitor) => serde_json::to_vec(&serde_json::json!({
                    "status": "ok",
                    "capture": monitor.stats(),
                }))?,
                None => br#"{"status":"ok"}"#.to_vec(),
            };
            write_response(&mut stream, 200, "application/json", &payload)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Write multipart JPEG parts until the client goes away or shutdown.
fn stream_frames(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    stream.flush()?;

    let mut last_sequence = 0;
    while !shutdown.is_cancelled() {
        let Some(frame) = state.latest.wait_newer(last_sequence, cfg.frame_wait) else {
            if state.latest.is_closed() {
                break;
            }
            if peer_closed(&stream) {
                log::debug!("frame stream client went away while waiting");
                break;
            }
            log::warn!("no frame available for {:?}; still waiting", cfg.frame_wait);
            continue;
        };
        last_sequence = frame.sequence();

        let jpeg = match frame.encode_jpeg(cfg.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::warn!("failed to encode frame {}: {:#}", frame.sequence(), err);
                continue;
            }
        };
        let part_header = format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        );
        stream.write_all(part_header.as_bytes())?;
        stream.write_all(&jpeg)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
    }
    Ok(())
}

/// True once the client has closed its end. Does not consume any input.
fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let closed = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => err.kind() != ErrorKind::WouldBlock,
    };
    closed || stream.set_nonblocking(false).is_err()
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use chrono::Utc;

    fn state() -> ApiState {
        ApiState {
            latest: Arc::new(LatestFrame::new()),
            detections: Arc::new(LatestDetections::new()),
            monitor: None,
        }
    }

    fn spawn(state: ApiState) -> ApiHandle {
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        ApiServer::new(cfg, state)
            .spawn(ShutdownSignal::new())
            .unwrap()
    }

    fn get(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[test]
    fn unknown_path_is_404() {
        let handle = spawn(state());
        let response = get(handle.addr, "GET /nope HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 404"));
        handle.stop().unwrap();
    }

    #[test]
    fn non_get_is_405() {
        let handle = spawn(state());
        let response = get(handle.addr, "POST /frame HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 405"));
        handle.stop().unwrap();
    }

    #[test]
    fn snapshot_is_empty_until_first_frame() {
        let state = state();
        let handle = spawn(state.clone());
        let response = get(handle.addr, "GET /snapshot.jpg HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 204"));

        let mut frame = Frame::new(vec![90; 8 * 8 * 3], 8, 8, Utc::now()).unwrap();
        frame.set_sequence(1);
        state.latest.publish(Arc::new(frame));
        let response = get(handle.addr, "GET /snapshot.jpg HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Content-Type: image/jpeg"));
        handle.stop().unwrap();
    }

    #[test]
    fn accept_errors_only_pause_the_loop() {
        assert_eq!(
            accept_retry_delay(&io::Error::from(ErrorKind::WouldBlock)),
            ACCEPT_POLL
        );
        for kind in [
            ErrorKind::ConnectionAborted,
            ErrorKind::ConnectionReset,
            ErrorKind::Other,
        ] {
            assert_eq!(accept_retry_delay(&io::Error::from(kind)), ACCEPT_ERROR_BACKOFF);
        }
    }

    #[test]
    fn waiting_stream_ends_when_client_leaves() {
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            frame_wait: Duration::from_millis(50),
            ..ApiConfig::default()
        };
        let handle = ApiServer::new(cfg, state())
            .spawn(ShutdownSignal::new())
            .unwrap();

        let mut client = TcpStream::connect(handle.addr).unwrap();
        client.write_all(b"GET /frame HTTP/1.1\r\n\r\n").unwrap();
        let mut header = [0u8; 12];
        client.read_exact(&mut header).unwrap();
        assert_eq!(&header, b"HTTP/1.1 200");
        assert_eq!(handle.active_connections(), 1);
        drop(client);

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while handle.active_connections() > 0 {
            assert!(std::time::Instant::now() < deadline, "stream thread outlived its client");
            std::thread::sleep(Duration::from_millis(20));
        }
        handle.stop().unwrap();
    }

    #[test]
    fn health_reports_ok() {
        let handle = spawn(state());
        let response = get(handle.addr, "GET /health HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));
        handle.stop().unwrap();
    }
}
