use std::path::PathBuf;
use thiserror::Error;
use workpod_overlay::OverlayError;
use workpod_platform::{ControlPlaneError, NamespaceError};

/// Front door errors
#[derive(Debug, Error)]
pub enum FrontDoorError {
    #[error("Another daemon is already running (socket at {0:?} is active)")]
    AlreadyRunning(PathBuf),

    #[error("Failed to bind {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out dialing {0}")]
    DialTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon startup and runtime errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("Front door error: {0}")]
    FrontDoor(#[from] FrontDoorError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error("Workspace cache for {namespace} failed to start: {source}")]
    CacheOpen {
        namespace: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
