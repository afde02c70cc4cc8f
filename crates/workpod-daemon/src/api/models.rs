//! Control API request and response models

use serde::{Deserialize, Serialize};
use workpod_platform::WorkspaceInstance;

pub use workpod_proto::{StatusResponse, VersionResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub status: String,
}

/// `GET /status` query; any `debug` key enables the debug payload
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub debug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceQuery {
    pub uid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WatchQuery {
    pub project: Option<String>,
}

/// Body of `POST /create-workspace` and `POST /update-workspace`
///
/// The instance namespace wins; otherwise it is derived from `project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRequest {
    #[serde(default)]
    pub project: Option<String>,
    pub instance: WorkspaceInstance,
}
