//! Error types for gridshim

use thiserror::Error;

/// Result type alias using gridshim Error
pub type Result<T> = std::result::Result<T, Error>;

/// gridshim error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network or TLS failure reaching the upstream API or the script endpoint.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned status {status}: {message}")]
    UpstreamProtocol { status: u16, message: String },

    #[error("Local resource unavailable: {0}")]
    LocalResource(String),

    #[error("Script {script} failed: {message}")]
    Script { script: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure happened before any response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout { .. })
    }
}

impl From<notify::Error> for Error {
    fn from(e: notify::Error) -> Self {
        Error::LocalResource(e.to_string())
    }
}
