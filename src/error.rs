//! Crate-level error type.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while loading data or driving the chat.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation failed: {0}")]
    Validation(String),

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("category '{0}' has no selectable messages")]
    EmptyCategory(String),

    #[error("speed must be between 0 and 100, got {0}")]
    InvalidSpeed(i64),

    #[error("volume must be between 0 and 1, got {0}")]
    InvalidVolume(f64),

    #[error("speech recognizer: {0}")]
    Recognizer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
