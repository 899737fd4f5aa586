use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FlowdeckError, Result};

/// Top-level Flowdeck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub editor: EditorConfig,
}

/// Where the agent backend lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// WebSocket base URL. Derived from `api_url` when absent.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_prefix: default_api_prefix(),
            ws_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    /// `http://host:8000` + `/api/v1`, without a trailing slash.
    pub fn api_base(&self) -> String {
        format!(
            "{}{}",
            self.api_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/')
        )
    }

    /// WebSocket counterpart of `api_base`; `https` maps to `wss`.
    pub fn ws_base(&self) -> String {
        let root = match &self.ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let url = self.api_url.trim_end_matches('/');
                match url.strip_prefix("http") {
                    Some(rest) => format!("ws{}", rest),
                    None => url.to_string(),
                }
            }
        };
        format!("{}{}", root, self.api_prefix.trim_end_matches('/'))
    }
}

/// Live event channel behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Seconds between liveness pings (0 disables them).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Give up on a silent channel after this many seconds.
    /// Unset means wait forever, like the backend's own clients do.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Events buffered between the socket reader and the reconciler.
    #[serde(default = "default_stream_buffer")]
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            idle_timeout_secs: None,
            buffer: default_stream_buffer(),
        }
    }
}

/// Backoff for idempotent reads (catalog, listing, fetch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Name given to a fresh, untitled document.
    #[serde(default = "default_workflow_name")]
    pub default_name: String,
    /// Tag written to `exported_by` in exported files.
    #[serde(default = "default_exported_by")]
    pub exported_by: String,
    /// Directory exports are written to when no path is given.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            default_name: default_workflow_name(),
            exported_by: default_exported_by(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_api_url() -> String { "http://localhost:8000".to_string() }
fn default_api_prefix() -> String { "/api/v1".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_ping_interval() -> u64 { 30 }
fn default_stream_buffer() -> usize { 64 }
fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 5_000 }
fn default_workflow_name() -> String { "My Workflow".to_string() }
fn default_exported_by() -> String { "Flowdeck Workflow Editor".to_string() }
fn default_export_dir() -> String { ".".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowdeckError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowdeckError::Config(e.to_string()))?;
        debug!(path = %path.display(), api_url = %config.backend.api_url, "Config loaded");
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
