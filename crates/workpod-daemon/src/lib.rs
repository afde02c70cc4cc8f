//! Workpod daemon
//!
//! A long-running local process that shares one IPC endpoint between its own
//! control API and the overlay node's LocalAPI, keeps a watch-fed cache of
//! remote workspaces and serves it to the CLI.

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod daemon;
pub mod endpoint;
pub mod error;
pub mod frontdoor;
pub mod local_store;
pub mod projection;
pub mod workspace_client;

pub use api::{build_router, ApiError, ApiListener, ApiState, NodeStatusSource};
pub use auth::{AuthStatus, AuthStatusMonitor};
pub use cache::{CacheOptions, Snapshot, WorkspaceCache};
pub use client::{ClientError, DaemonClient};
pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use endpoint::Endpoint;
pub use error::{DaemonError, FrontDoorError};
pub use frontdoor::{Routes, SocketFrontDoor};
pub use local_store::{IdeConfig, LocalWorkspace, LocalWorkspaceStore};
pub use projection::{EnrichedProjection, WorkspaceSource};
pub use workspace_client::{
    workspace_client, DaemonWorkspaceClient, ProviderKind, WorkspaceClient, WorkspaceClientError,
    WorkspaceStatus, WorkspaceTarget,
};
