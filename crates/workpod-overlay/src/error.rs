use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Overlay network errors
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Coordination server unreachable: {0}")]
    CoordinatorUnreachable(String),

    #[error("Overlay credentials rejected: {0}")]
    CredentialRejected(String),

    #[error("Failed to spawn overlay node {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Overlay node socket {0} did not come up")]
    SocketTimeout(PathBuf),

    #[error("Overlay node did not reach running state within {0:?}")]
    JoinTimeout(Duration),

    #[error("LocalAPI returned {status}: {message}")]
    LocalApi { status: u16, message: String },

    #[error("Dial to {target} rejected: {message}")]
    DialRejected { target: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}
