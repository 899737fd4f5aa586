use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowdeckError {
    // Document errors
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Failed to parse workflow file: {0}")]
    ImportParse(String),

    // Backend errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    // Event channel errors
    #[error("Event stream error: {0}")]
    Stream(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowdeckError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowdeckError::Network(_) => true,
            FlowdeckError::Backend { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Human-readable validation messages, if this is a validation error.
    pub fn validation_errors(&self) -> Option<&[String]> {
        match self {
            FlowdeckError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowdeckError>;
