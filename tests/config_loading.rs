use std::io::Write;

use flowdeck_core::config::AppConfig;
use flowdeck_core::FlowdeckError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[backend]
api_url = "https://agents.example.com"
api_prefix = "/api/v2"
request_timeout_secs = 10

[stream]
ping_interval_secs = 15
idle_timeout_secs = 600
buffer = 128

[retry]
max_retries = 4
initial_backoff_ms = 250
max_backoff_ms = 8000

[editor]
default_name = "Untitled"
exported_by = "CI"
export_dir = "/tmp/flowdeck-exports"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.backend.api_url, "https://agents.example.com");
    assert_eq!(config.backend.api_base(), "https://agents.example.com/api/v2");
    assert_eq!(config.backend.ws_base(), "wss://agents.example.com/api/v2");
    assert_eq!(config.backend.request_timeout_secs, 10);
    assert_eq!(config.stream.ping_interval_secs, 15);
    assert_eq!(config.stream.idle_timeout_secs, Some(600));
    assert_eq!(config.stream.buffer, 128);
    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.max_backoff_ms, 8000);
    assert_eq!(config.editor.default_name, "Untitled");
    assert_eq!(config.editor.exported_by, "CI");
    assert_eq!(config.editor.export_dir, "/tmp/flowdeck-exports");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[backend]\napi_url = \"http://10.0.0.5:8000\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.backend.api_prefix, "/api/v1");
    assert_eq!(config.backend.ws_base(), "ws://10.0.0.5:8000/api/v1");
    assert_eq!(config.backend.request_timeout_secs, 30);
    assert_eq!(config.stream.ping_interval_secs, 30);
    assert!(config.stream.idle_timeout_secs.is_none());
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.editor.exported_by, "Flowdeck Workflow Editor");
}

#[test]
fn test_explicit_ws_url_wins() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(
        br#"
[backend]
api_url = "http://localhost:8000"
ws_url = "ws://events.internal:9000/"
"#,
    )
    .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.backend.ws_base(), "ws://events.internal:9000/api/v1");
}

#[test]
fn test_env_var_expansion() {
    std::env::set_var("FLOWDECK_TEST_BACKEND_HOST", "backend.test");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(
        br#"
[backend]
api_url = "http://${FLOWDECK_TEST_BACKEND_HOST}:8000"

[editor]
exported_by = "${FLOWDECK_TEST_UNSET_VARIABLE}"
"#,
    )
    .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.backend.api_url, "http://backend.test:8000");
    assert_eq!(config.editor.exported_by, "${FLOWDECK_TEST_UNSET_VARIABLE}");
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("flowdeck.toml");

    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, FlowdeckError::ConfigNotFound(_)));

    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.backend.api_url, "http://localhost:8000");
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[backend\napi_url = ").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, FlowdeckError::Config(_)));
}
