//! Workspace lifecycle clients
//!
//! CLI commands drive a workspace through [`WorkspaceClient`]. The variant is
//! picked by provider kind; only the daemon-backed variant lives here, the
//! others are served by their own providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, PoisonError, Weak};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use workpod_exec::{ExecError, ExecOptions, TunnelError};
use workpod_platform::{InstancePhase, WorkspaceInstance};
use workpod_proto::DEFAULT_MAX_MESSAGE_SIZE;

use crate::api::models::WorkspaceRequest;
use crate::client::{ClientError, DaemonClient};
use crate::projection::EnrichedProjection;

/// Annotation the platform reconciles to start or stop an instance
pub const DESIRED_STATE_ANNOTATION: &str = "workpod.dev/desired-state";

/// How a provider reaches its workspaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Daemon,
    Agent,
    Direct,
    Machine,
    Proxy,
    Server,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Daemon => "daemon",
            ProviderKind::Agent => "agent",
            ProviderKind::Direct => "direct",
            ProviderKind::Machine => "machine",
            ProviderKind::Proxy => "proxy",
            ProviderKind::Server => "server",
        };
        f.write_str(name)
    }
}

impl FromStr for ProviderKind {
    type Err = WorkspaceClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daemon" => Ok(ProviderKind::Daemon),
            "agent" => Ok(ProviderKind::Agent),
            "direct" => Ok(ProviderKind::Direct),
            "machine" => Ok(ProviderKind::Machine),
            "proxy" => Ok(ProviderKind::Proxy),
            "server" => Ok(ProviderKind::Server),
            other => Err(WorkspaceClientError::UnknownProvider(other.to_string())),
        }
    }
}

/// Coarse workspace state as seen by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceStatus {
    Running,
    Busy,
    Stopped,
    NotFound,
}

impl From<&InstancePhase> for WorkspaceStatus {
    fn from(phase: &InstancePhase) -> Self {
        match phase {
            InstancePhase::Ready => WorkspaceStatus::Running,
            InstancePhase::Pending | InstancePhase::WaitingToInitialize => WorkspaceStatus::Busy,
            InstancePhase::Failed | InstancePhase::Unknown => WorkspaceStatus::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkspaceClientError {
    #[error("Operation {operation} is not supported by {kind} providers")]
    Unsupported {
        operation: &'static str,
        kind: ProviderKind,
    },

    #[error("Unknown provider kind: {0}")]
    UnknownProvider(String),

    #[error("Workspace {0} not found")]
    NotFound(String),

    #[error("No exec endpoint configured for workspace {0}")]
    NoExecEndpoint(String),

    #[error("Invalid exec endpoint: {0}")]
    InvalidExecEndpoint(#[from] url::ParseError),

    #[error(transparent)]
    Daemon(#[from] ClientError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// A command to run inside a workspace
pub struct CommandRequest<'a> {
    pub command: &'a str,
    pub stdin: Option<Box<dyn AsyncRead + Unpin + Send>>,
    pub stdout: &'a mut (dyn AsyncWrite + Unpin + Send),
    pub stderr: &'a mut (dyn AsyncWrite + Unpin + Send),
}

/// Lifecycle operations on one workspace
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create(&self, instance: WorkspaceInstance)
        -> Result<WorkspaceInstance, WorkspaceClientError>;

    async fn start(&self) -> Result<(), WorkspaceClientError>;

    async fn stop(&self) -> Result<(), WorkspaceClientError>;

    async fn delete(&self) -> Result<(), WorkspaceClientError>;

    async fn status(&self) -> Result<WorkspaceStatus, WorkspaceClientError>;

    /// Run a command remotely; returns its exit code
    async fn command(&self, request: CommandRequest<'_>) -> Result<i64, WorkspaceClientError>;

    /// Serialize lifecycle operations on this workspace within the process
    async fn lock(&self) -> Result<(), WorkspaceClientError>;

    async fn unlock(&self) -> Result<(), WorkspaceClientError>;
}

/// Which workspace a client operates on
#[derive(Debug, Clone, Default)]
pub struct WorkspaceTarget {
    pub project: String,
    pub uid: String,
    /// WebSocket URL of the workspace's exec endpoint
    pub exec_url: Option<String>,
    pub token: Option<String>,
}

/// Build the client for a provider kind
pub fn workspace_client(
    kind: ProviderKind,
    daemon: DaemonClient,
    target: WorkspaceTarget,
) -> Result<Box<dyn WorkspaceClient>, WorkspaceClientError> {
    match kind {
        ProviderKind::Daemon => Ok(Box::new(DaemonWorkspaceClient::new(daemon, target))),
        kind => Err(WorkspaceClientError::Unsupported {
            operation: "client",
            kind,
        }),
    }
}

/// Lifecycle lock for `uid`, shared by every client in the process
fn workspace_lock(uid: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<std::sync::Mutex<HashMap<String, Weak<Mutex<()>>>>> = OnceLock::new();

    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks.retain(|_, lock| lock.strong_count() > 0);

    if let Some(lock) = locks.get(uid).and_then(Weak::upgrade) {
        return lock;
    }
    let lock = Arc::new(Mutex::new(()));
    locks.insert(uid.to_string(), Arc::downgrade(&lock));
    lock
}

fn workspace_path(uid: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("uid", uid)
        .finish();
    format!("/workspace?{}", query)
}

/// Workspace client backed by the local daemon
pub struct DaemonWorkspaceClient {
    daemon: DaemonClient,
    target: WorkspaceTarget,
    lock: Arc<Mutex<()>>,
    guard: Mutex<Option<OwnedMutexGuard<()>>>,
}

impl DaemonWorkspaceClient {
    pub fn new(daemon: DaemonClient, target: WorkspaceTarget) -> Self {
        Self {
            daemon,
            lock: workspace_lock(&target.uid),
            target,
            guard: Mutex::new(None),
        }
    }

    async fn projection(&self) -> Result<EnrichedProjection, WorkspaceClientError> {
        match self.daemon.get_json(&workspace_path(&self.target.uid)).await {
            Ok(projection) => Ok(projection),
            Err(ClientError::Api { status: 404, .. }) => {
                Err(WorkspaceClientError::NotFound(self.target.uid.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_desired_state(&self, state: &str) -> Result<(), WorkspaceClientError> {
        let mut instance = self.projection().await?.instance;
        instance
            .metadata
            .annotations
            .insert(DESIRED_STATE_ANNOTATION.to_string(), state.to_string());

        info!(name = %instance.metadata.name, state, "Requesting workspace state");
        let request = WorkspaceRequest {
            project: Some(self.target.project.clone()),
            instance,
        };
        let _: WorkspaceInstance = self.daemon.post_json("/update-workspace", &request).await?;
        Ok(())
    }

    fn exec_url(&self, command: &str) -> Result<Url, WorkspaceClientError> {
        let raw = self
            .target
            .exec_url
            .as_deref()
            .ok_or_else(|| WorkspaceClientError::NoExecEndpoint(self.target.uid.clone()))?;
        let mut url = Url::parse(raw)?;
        url.query_pairs_mut().append_pair("command", command);
        Ok(url)
    }
}

#[async_trait]
impl WorkspaceClient for DaemonWorkspaceClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Daemon
    }

    async fn create(
        &self,
        instance: WorkspaceInstance,
    ) -> Result<WorkspaceInstance, WorkspaceClientError> {
        let request = WorkspaceRequest {
            project: Some(self.target.project.clone()),
            instance,
        };
        Ok(self.daemon.post_json("/create-workspace", &request).await?)
    }

    async fn start(&self) -> Result<(), WorkspaceClientError> {
        self.set_desired_state("running").await
    }

    async fn stop(&self) -> Result<(), WorkspaceClientError> {
        self.set_desired_state("stopped").await
    }

    async fn delete(&self) -> Result<(), WorkspaceClientError> {
        Err(WorkspaceClientError::Unsupported {
            operation: "delete",
            kind: ProviderKind::Daemon,
        })
    }

    async fn status(&self) -> Result<WorkspaceStatus, WorkspaceClientError> {
        match self.projection().await {
            Ok(projection) => Ok(projection
                .instance
                .status
                .phase
                .as_ref()
                .map(WorkspaceStatus::from)
                .unwrap_or(WorkspaceStatus::Busy)),
            Err(WorkspaceClientError::NotFound(_)) => Ok(WorkspaceStatus::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn command(&self, request: CommandRequest<'_>) -> Result<i64, WorkspaceClientError> {
        let url = self.exec_url(request.command)?;
        debug!("Running command in {} via {}", self.target.uid, url.host_str().unwrap_or(""));

        let (sender, mut receiver) = workpod_exec::websocket::connect(
            url.as_str(),
            self.target.token.as_deref(),
            DEFAULT_MAX_MESSAGE_SIZE,
        )
        .await?;

        let CommandRequest {
            stdin,
            mut stdout,
            mut stderr,
            ..
        } = request;
        let cancel = CancellationToken::new();
        let code = workpod_exec::exec(
            &sender,
            &mut receiver,
            stdin,
            &mut stdout,
            &mut stderr,
            &ExecOptions::default(),
            &cancel,
        )
        .await?;
        Ok(code)
    }

    async fn lock(&self) -> Result<(), WorkspaceClientError> {
        let guard = self.lock.clone().lock_owned().await;
        *self.guard.lock().await = Some(guard);
        Ok(())
    }

    async fn unlock(&self) -> Result<(), WorkspaceClientError> {
        self.guard.lock().await.take();
        Ok(())
    }
}
