use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camwatch::{CamwatchConfig, ConfigOverrides};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMWATCH_CONFIG",
        "RTSP_URL",
        "RTSP_USERNAME",
        "RTSP_PASSWORD",
        "CAMWATCH_HTTP_ADDR",
        "CAMWATCH_RESULT_URL",
        "CAMWATCH_BUFFER_CAPACITY",
        "CAMWATCH_CONNECT_BACKOFF_MS",
        "CAMWATCH_READ_RETRY_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn missing_stream_url_fails_startup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = CamwatchConfig::load(&ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("no stream url configured"));

    // A config file without a stream section is not enough either.
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "http": { "addr": "127.0.0.1:9000" } }"#)
        .expect("write config");
    let overrides = ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..ConfigOverrides::default()
    };
    assert!(CamwatchConfig::load(&overrides).is_err());

    let overrides = ConfigOverrides {
        url: Some("stub://demo".to_string()),
        ..ConfigOverrides::default()
    };
    assert!(CamwatchConfig::load(&overrides).is_ok());
}

#[test]
fn loads_json_file_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "stream": {
            "url": "http://10.0.0.20:8080/video",
            "connect_backoff_ms": 2500,
            "target_fps": 15
        },
        "buffer": { "capacity": 4 },
        "http": { "addr": "127.0.0.1:9000", "jpeg_quality": 70 },
        "detection": { "detector": "stub", "confidence_threshold": 0.6 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_HTTP_ADDR", "0.0.0.0:8100");
    std::env::set_var("CAMWATCH_READ_RETRY_MS", "250");

    let cfg = CamwatchConfig::load(&ConfigOverrides::default()).expect("load config");
    assert_eq!(cfg.stream.url.as_deref(), Some("http://10.0.0.20:8080/video"));
    assert_eq!(cfg.stream.connect_backoff, Duration::from_millis(2500));
    assert_eq!(cfg.stream.read_retry, Duration::from_millis(250));
    assert_eq!(cfg.stream.target_fps, 15);
    assert_eq!(cfg.buffer_capacity, 4);
    assert_eq!(cfg.http.addr, "0.0.0.0:8100");
    assert_eq!(cfg.http.jpeg_quality, 70);
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert!(cfg.detection.result_url.is_none());

    clear_env();
}

#[test]
fn toml_extension_selects_toml_parser() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[stream]
url = "stub://lobby"
width = 320
height = 240

[detection]
result_url = "http://collector.local/api/detections"

[preview]
refresh_hz = 10
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let overrides = ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..ConfigOverrides::default()
    };
    let cfg = CamwatchConfig::load(&overrides).expect("load config");
    assert_eq!(cfg.stream.url.as_deref(), Some("stub://lobby"));
    assert_eq!(cfg.source_settings().width, 320);
    assert_eq!(cfg.source_settings().height, 240);
    assert_eq!(
        cfg.detection.result_url.as_deref(),
        Some("http://collector.local/api/detections")
    );
    assert_eq!(cfg.preview.refresh_hz, 10);
}

#[test]
fn unknown_file_keys_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "stream": { "uri": "stub://typo" } }"#)
        .expect("write config");
    let overrides = ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..ConfigOverrides::default()
    };
    let err = CamwatchConfig::load(&overrides).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
}

#[test]
fn rtsp_credentials_come_from_env_and_stay_redacted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RTSP_URL", "rtsp://192.168.1.64:554/Streaming/Channels/101");
    let err = CamwatchConfig::load(&ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("requires a username and password"));

    std::env::set_var("RTSP_USERNAME", "admin");
    std::env::set_var("RTSP_PASSWORD", "hunter2-secret");
    let cfg = CamwatchConfig::load(&ConfigOverrides::default()).expect("load config");
    let endpoint = cfg.endpoint().expect("endpoint");
    let creds = endpoint.credentials().expect("credentials");
    assert_eq!(creds.username(), "admin");
    assert_eq!(creds.password(), "hunter2-secret");

    let rendered = format!("{:?} {} {:?}", cfg.stream, endpoint, endpoint);
    assert!(!rendered.contains("hunter2-secret"), "leaked: {rendered}");
    assert!(!rendered.contains("admin"), "leaked: {rendered}");

    clear_env();
}

#[test]
fn half_supplied_credentials_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RTSP_URL", "rtsp://192.168.1.64/stream1");
    std::env::set_var("RTSP_USERNAME", "admin");
    let err = CamwatchConfig::load(&ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("must be set together"));

    clear_env();
}

#[test]
fn command_line_overrides_beat_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RTSP_URL", "stub://from_env");
    std::env::set_var("CAMWATCH_HTTP_ADDR", "0.0.0.0:8100");
    std::env::set_var("CAMWATCH_BUFFER_CAPACITY", "8");

    let overrides = ConfigOverrides {
        url: Some("stub://from_cli".to_string()),
        http_addr: Some("127.0.0.1:8200".to_string()),
        buffer_capacity: Some(3),
        confidence_threshold: Some(0.75),
        preview_path: Some(PathBuf::from("/tmp/camwatch-preview.jpg")),
        ..ConfigOverrides::default()
    };
    let cfg = CamwatchConfig::load(&overrides).expect("load config");
    assert_eq!(cfg.stream.url.as_deref(), Some("stub://from_cli"));
    assert_eq!(cfg.http.addr, "127.0.0.1:8200");
    assert_eq!(cfg.buffer_capacity, 3);
    assert_eq!(cfg.detection.confidence_threshold, 0.75);
    assert_eq!(
        cfg.preview.output_path,
        Some(PathBuf::from("/tmp/camwatch-preview.jpg"))
    );

    clear_env();
}

#[test]
fn host_and_port_flags_merge_with_configured_addr() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RTSP_URL", "stub://cam");
    std::env::set_var("CAMWATCH_HTTP_ADDR", "0.0.0.0:9100");

    let overrides = ConfigOverrides {
        http_host: Some("127.0.0.1".to_string()),
        ..ConfigOverrides::default()
    };
    let cfg = CamwatchConfig::load(&overrides).expect("load config");
    assert_eq!(cfg.http.addr, "127.0.0.1:9100");

    let overrides = ConfigOverrides {
        http_port: Some(9200),
        ..ConfigOverrides::default()
    };
    let cfg = CamwatchConfig::load(&overrides).expect("load config");
    assert_eq!(cfg.http.addr, "0.0.0.0:9200");

    clear_env();
}

#[test]
fn invalid_timing_values_are_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RTSP_URL", "stub://cam");
    std::env::set_var("CAMWATCH_CONNECT_BACKOFF_MS", "soon");
    let err = CamwatchConfig::load(&ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("CAMWATCH_CONNECT_BACKOFF_MS"));

    std::env::set_var("CAMWATCH_CONNECT_BACKOFF_MS", "0");
    let err = CamwatchConfig::load(&ConfigOverrides::default()).unwrap_err();
    assert!(err.to_string().contains("connect backoff"));

    clear_env();

    let overrides = ConfigOverrides {
        url: Some("stub://cam".to_string()),
        confidence_threshold: Some(1.5),
        ..ConfigOverrides::default()
    };
    let err = CamwatchConfig::load(&overrides).unwrap_err();
    assert!(err.to_string().contains("confidence threshold"));
}
