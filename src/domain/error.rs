use std::time::Duration;
use thiserror::Error;

/// Application-level error used by configuration loading and the binary.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request failed: {0}")]
    Request(#[from] RequestError),
}

/// Outcome of a failed optimized request.
///
/// Cloneable so a single failure can be handed to every caller that joined
/// the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("endpoint {endpoint} is throttled, retry later")]
    Throttled { endpoint: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl RequestError {
    /// Throttle rejections are left to the caller; everything else is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RequestError::Throttled { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            RequestError::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        RequestError::Network(err.to_string())
    }
}

/// Failure reported by a connection probe backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("backend error {}: {message}", .code.as_deref().unwrap_or("<none>"))]
    Backend {
        code: Option<String>,
        message: String,
    },

    #[error("backend unreachable: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        ProbeError::Transport(err.to_string())
    }
}
