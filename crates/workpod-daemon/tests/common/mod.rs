//! Shared fakes for daemon integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use workpod_daemon::api::ApiState;
use workpod_daemon::auth::AuthStatusMonitor;
use workpod_daemon::cache::Snapshot;
use workpod_daemon::local_store::LocalWorkspaceStore;
use workpod_daemon::NodeStatusSource;
use workpod_overlay::{NodeStatus, OverlayError};
use workpod_platform::types::{EntityInfo, UserOrTeam, WorkspaceInstanceStatus};
use workpod_platform::{
    Cluster, ControlPlane, ControlPlaneError, InstancePhase, Project, ProjectNamespacer,
    SelfIdentity, Template, WatchEvent, WatchStream, WorkspaceInstance,
};
use workpod_proto::VersionResponse;

pub type WatchSender = mpsc::UnboundedSender<Result<WatchEvent, ControlPlaneError>>;

/// How the fake answers `self_identity`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Ok,
    Unauthorized,
    Unavailable,
}

/// In-memory control plane
pub struct FakeControlPlane {
    pub identity: Mutex<Identity>,
    pub projects: Mutex<Vec<Project>>,
    /// Returned by `list_workspaces`, keyed by namespace
    pub listed: Mutex<HashMap<String, Vec<WorkspaceInstance>>>,
    pub created: Mutex<Vec<WorkspaceInstance>>,
    pub fail_watch: Mutex<bool>,
    pub watch_calls: AtomicUsize,
    watch: Mutex<Option<mpsc::UnboundedReceiver<Result<WatchEvent, ControlPlaneError>>>>,
}

impl FakeControlPlane {
    /// A fake plus the sender feeding its first watch
    pub fn new() -> (Arc<Self>, WatchSender) {
        let (tx, rx) = mpsc::unbounded();
        let fake = Arc::new(Self {
            identity: Mutex::new(Identity::Ok),
            projects: Mutex::new(Vec::new()),
            listed: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            fail_watch: Mutex::new(false),
            watch_calls: AtomicUsize::new(0),
            watch: Mutex::new(Some(rx)),
        });
        (fake, tx)
    }

    pub fn set_identity(&self, identity: Identity) {
        *self.identity.lock().unwrap() = identity;
    }

    pub fn set_projects(&self, names: &[&str]) {
        *self.projects.lock().unwrap() = names.iter().map(|name| project(name)).collect();
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn self_identity(&self) -> Result<SelfIdentity, ControlPlaneError> {
        match *self.identity.lock().unwrap() {
            Identity::Ok => Ok(me()),
            Identity::Unauthorized => Err(ControlPlaneError::from_status(
                401,
                "access key not found".to_string(),
            )),
            Identity::Unavailable => Err(ControlPlaneError::from_status(
                503,
                "upstream unavailable".to_string(),
            )),
        }
    }

    async fn list_projects(&self) -> Result<Vec<Project>, ControlPlaneError> {
        Ok(self.projects.lock().unwrap().clone())
    }

    async fn list_templates(&self, project: &str) -> Result<Vec<Template>, ControlPlaneError> {
        Err(ControlPlaneError::from_status(
            403,
            format!("templates of {} are forbidden", project),
        ))
    }

    async fn list_clusters(&self, _project: &str) -> Result<Vec<Cluster>, ControlPlaneError> {
        Ok(Vec::new())
    }

    async fn list_workspaces(
        &self,
        namespace: &str,
        _selector: &str,
    ) -> Result<Vec<WorkspaceInstance>, ControlPlaneError> {
        Ok(self
            .listed
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn watch_workspaces(
        &self,
        _namespace: &str,
        _selector: &str,
    ) -> Result<WatchStream, ControlPlaneError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_watch.lock().unwrap() {
            return Err(ControlPlaneError::from_status(
                500,
                "watch unavailable".to_string(),
            ));
        }
        match self.watch.lock().unwrap().take() {
            Some(rx) => Ok(rx.boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn create_workspace(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<WorkspaceInstance, ControlPlaneError> {
        let mut created = instance.clone();
        created.metadata.uid = format!("uid-{}", instance.metadata.name);
        self.created.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_workspace(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<WorkspaceInstance, ControlPlaneError> {
        Ok(instance.clone())
    }
}

/// Overlay node status source with a settable backend state
pub struct FakeNode {
    /// `None` makes the node unreachable
    pub backend_state: Mutex<Option<String>>,
}

impl FakeNode {
    pub fn new(state: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            backend_state: Mutex::new(state.map(str::to_string)),
        })
    }

    pub fn set(&self, state: Option<&str>) {
        *self.backend_state.lock().unwrap() = state.map(str::to_string);
    }
}

#[async_trait]
impl NodeStatusSource for FakeNode {
    async fn node_status(&self) -> Result<NodeStatus, OverlayError> {
        let state = self.backend_state.lock().unwrap().clone();
        match state {
            Some(backend_state) => Ok(NodeStatus {
                backend_state,
                ..Default::default()
            }),
            None => Err(OverlayError::SocketTimeout(PathBuf::from(
                "/nonexistent/node.sock",
            ))),
        }
    }
}

pub fn me() -> SelfIdentity {
    SelfIdentity {
        user: Some(EntityInfo {
            name: "alice".to_string(),
            display_name: None,
        }),
        team: Some(EntityInfo {
            name: "platform".to_string(),
            display_name: None,
        }),
        project_namespace_prefix: Some("p-".to_string()),
    }
}

pub fn project(name: &str) -> Project {
    let mut project = Project::default();
    project.metadata.name = name.to_string();
    project
}

pub fn instance(namespace: &str, name: &str, phase: InstancePhase) -> WorkspaceInstance {
    let mut instance = WorkspaceInstance::default();
    instance.metadata.namespace = namespace.to_string();
    instance.metadata.name = name.to_string();
    instance.metadata.uid = format!("uid-{}", name);
    instance.status = WorkspaceInstanceStatus {
        phase: Some(phase),
        ..Default::default()
    };
    instance
}

pub fn owned_by(mut instance: WorkspaceInstance, user: &str) -> WorkspaceInstance {
    instance.spec.owner = Some(UserOrTeam {
        user: Some(user.to_string()),
        team: None,
    });
    instance
}

/// Wait until a published snapshot satisfies `predicate`
pub async fn wait_for<F>(receiver: &mut watch::Receiver<Snapshot>, predicate: F) -> Snapshot
where
    F: Fn(&Snapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = receiver.borrow_and_update().clone();
            if predicate(&snapshot) {
                return snapshot;
            }
            receiver
                .changed()
                .await
                .expect("cache stopped publishing");
        }
    })
    .await
    .expect("timed out waiting for cache snapshot")
}

/// API state over the fakes with no caches
pub fn api_state(
    control_plane: Arc<FakeControlPlane>,
    node: Arc<FakeNode>,
    store_root: &std::path::Path,
) -> ApiState {
    ApiState {
        control_plane: control_plane.clone(),
        namespacer: ProjectNamespacer::new("p-"),
        caches: HashMap::new(),
        store: LocalWorkspaceStore::new(store_root),
        selector: "workpod.dev/managed=true".to_string(),
        default_project: None,
        owner: None,
        auth: Arc::new(AuthStatusMonitor::new(
            control_plane,
            true,
            Duration::from_secs(10),
        )),
        node,
        debug_config: serde_json::json!({ "provider": "workpod", "accessKey": "<redacted>" }),
        version: VersionResponse {
            version: "0.1.0".to_string(),
            commit: "abc1234".to_string(),
        },
        shutdown: CancellationToken::new(),
    }
}
