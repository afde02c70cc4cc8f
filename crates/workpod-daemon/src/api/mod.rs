//! Local control API
//!
//! An axum router served on a private listener. Clients never reach it
//! directly; the front door relays marker-prefixed connections to it.

pub mod error;
pub mod handlers;
pub mod models;

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use workpod_overlay::{NodeStatus, OverlayError, OverlayNetworkClient};
use workpod_platform::{ControlPlane, ProjectNamespacer, SelfIdentity};
use workpod_proto::VersionResponse;

use crate::auth::AuthStatusMonitor;
use crate::cache::WorkspaceCache;
use crate::endpoint::Endpoint;
use crate::local_store::LocalWorkspaceStore;

pub use error::ApiError;

/// Source of overlay node status for `/status`
#[async_trait]
pub trait NodeStatusSource: Send + Sync {
    async fn node_status(&self) -> Result<NodeStatus, OverlayError>;
}

#[async_trait]
impl NodeStatusSource for OverlayNetworkClient {
    async fn node_status(&self) -> Result<NodeStatus, OverlayError> {
        self.status().await
    }
}

/// State shared across handlers
pub struct ApiState {
    pub control_plane: Arc<dyn ControlPlane>,
    pub namespacer: ProjectNamespacer,
    /// Caches opened at startup, keyed by project name
    pub caches: HashMap<String, Arc<WorkspaceCache>>,
    pub store: LocalWorkspaceStore,
    pub selector: String,
    pub default_project: Option<String>,
    pub owner: Option<SelfIdentity>,
    pub auth: Arc<AuthStatusMonitor>,
    pub node: Arc<dyn NodeStatusSource>,
    /// Redacted configuration shown by `/status?debug`
    pub debug_config: serde_json::Value,
    pub version: VersionResponse,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/status", get(handlers::status))
        .route("/version", get(handlers::version))
        .route("/self", get(handlers::self_identity))
        .route("/shutdown", get(handlers::shutdown))
        .route("/projects", get(handlers::list_projects))
        .route("/projects/{project}/templates", get(handlers::list_templates))
        .route("/projects/{project}/clusters", get(handlers::list_clusters))
        .route("/workspace", get(handlers::get_workspace))
        .route("/list-workspaces", get(handlers::list_workspaces))
        .route("/watch-workspaces", get(handlers::watch_workspaces))
        .route("/create-workspace", post(handlers::create_workspace))
        .route("/update-workspace", post(handlers::update_workspace))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Private listener for the control API
pub enum ApiListener {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
    Tcp(tokio::net::TcpListener),
}

impl ApiListener {
    /// Bind a private unix socket, replacing any leftover file
    #[cfg(unix)]
    pub async fn bind(path: PathBuf) -> std::io::Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        let listener = tokio::net::UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        Ok(ApiListener::Unix { listener, path })
    }

    /// Bind an ephemeral loopback port
    #[cfg(windows)]
    pub async fn bind(_path: PathBuf) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        Ok(ApiListener::Tcp(listener))
    }

    /// Where the front door should relay API connections
    pub fn endpoint(&self) -> std::io::Result<Endpoint> {
        match self {
            #[cfg(unix)]
            ApiListener::Unix { path, .. } => Ok(Endpoint::Local(path.clone())),
            ApiListener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?)),
        }
    }
}

/// Serve the router until `cancel` fires
pub async fn serve(
    listener: ApiListener,
    router: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    match listener {
        #[cfg(unix)]
        ApiListener::Unix { listener, path } => {
            info!("Control API listening on {}", path.display());
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await;
            let _ = std::fs::remove_file(&path);
            result
        }
        ApiListener::Tcp(listener) => {
            info!("Control API listening on {}", listener.local_addr()?);
            axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
        }
    }
}
