// Error types for starboard.
// Covers upstream HTTP failures, cache I/O, dispatch limits and configuration errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarboardError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Malformed upstream payload: {0}")]
    Malformed(String),

    #[error("Missing {0} environment variable")]
    MissingToken(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication failed: missing or invalid bearer token")]
    Unauthorized,

    #[error("Dispatch item {index} is {size} bytes, limit is {limit}")]
    ItemTooLarge {
        index: usize,
        size: usize,
        limit: usize,
    },

    #[error("Dispatch batch has {count} items, limit is {limit}")]
    BatchTooLarge { count: usize, limit: usize },

    #[error("Dispatch results exceed {limit} bytes")]
    ResultTooLarge { limit: usize },

    #[error("Dispatch stream ended before the final result")]
    IncompleteStream,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StarboardError {
    /// Configuration errors are the only failures that reach the end caller.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::MissingToken(_) | Self::Config(_))
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StarboardError>;
