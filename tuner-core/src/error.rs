use std::path::PathBuf;

use thiserror::Error;

/// Errors raised outside the real-time path: configuration and profile I/O.
#[derive(Debug, Error)]
pub enum TunerError {
    #[error("invalid instrument configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown instrument preset '{0}'")]
    UnknownPreset(String),

    #[error("instrument '{instrument}' has no string {index}")]
    UnknownString { instrument: String, index: usize },

    #[error("failed to access profile {path}: {source}")]
    ProfileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile {path}: {source}")]
    ProfileFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, TunerError>;
