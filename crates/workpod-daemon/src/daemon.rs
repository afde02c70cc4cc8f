//! Daemon lifecycle
//!
//! Startup is strictly ordered and every step is fatal on failure: claim the
//! IPC endpoint, authenticate, join the overlay, open one workspace cache per
//! accessible project, then serve until cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use workpod_overlay::OverlayNetworkClient;
use workpod_platform::{ControlPlane, HttpControlPlane, ProjectNamespacer};
use workpod_proto::VersionResponse;

use crate::api::{self, ApiListener, ApiState};
use crate::auth::AuthStatusMonitor;
use crate::cache::{CacheOptions, WorkspaceCache};
use crate::config::DaemonConfig;
use crate::endpoint::Endpoint;
use crate::error::DaemonError;
use crate::frontdoor::{Routes, SocketFrontDoor};
use crate::local_store::LocalWorkspaceStore;

pub struct Daemon {
    config: DaemonConfig,
    version: VersionResponse,
    control_plane: Option<Arc<dyn ControlPlane>>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, version: VersionResponse) -> Self {
        Self {
            config,
            version,
            control_plane: None,
        }
    }

    /// Use `control_plane` instead of the HTTP client built from the config
    pub fn with_control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    /// Run until `cancel` fires or a client requests shutdown
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        self.config.validate()?;

        let overlay = Arc::new(OverlayNetworkClient::new(self.config.overlay_config()));

        // The API socket path is fixed on unix; on windows the port is only
        // known once bound.
        #[cfg(unix)]
        let (api_endpoint, reserved_api) =
            (Endpoint::Local(self.config.api_socket_path()), None);
        #[cfg(windows)]
        let (api_endpoint, reserved_api) = {
            let listener = ApiListener::bind(self.config.api_socket_path()).await?;
            (listener.endpoint()?, Some(listener))
        };

        let routes = Routes::new(
            api_endpoint,
            Endpoint::Local(overlay.local_endpoint().to_path_buf()),
        );
        let front_door = SocketFrontDoor::bind(&self.config.socket_path(), routes).await?;

        let result = self
            .serve(front_door, reserved_api, overlay.clone(), cancel.clone())
            .await;

        cancel.cancel();
        overlay.shutdown().await;
        if let Err(e) = &result {
            error!("Daemon stopped with error: {}", e);
        } else {
            info!("Daemon stopped");
        }
        result
    }

    async fn serve(
        &self,
        front_door: SocketFrontDoor,
        reserved_api: Option<ApiListener>,
        overlay: Arc<OverlayNetworkClient>,
        cancel: CancellationToken,
    ) -> Result<(), DaemonError> {
        let control_plane: Arc<dyn ControlPlane> = match &self.control_plane {
            Some(control_plane) => control_plane.clone(),
            None => Arc::new(HttpControlPlane::new(
                &self.config.platform_url,
                self.config.access_key.clone(),
            )?),
        };

        let identity = control_plane.self_identity().await?;
        info!(
            user = identity.user.as_ref().map(|u| u.name.as_str()).unwrap_or(""),
            team = identity.team.as_ref().map(|t| t.name.as_str()).unwrap_or(""),
            "Authenticated with the platform"
        );
        let namespacer = ProjectNamespacer::from_self(&identity);

        overlay.probe_coordinator().await?;
        let node = overlay.join().await?;
        info!(state = %node.backend_state, "Joined the overlay network");

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        if let Some(path) = &self.config.netmap_path {
            background.push(overlay.watch_netmap(path.clone(), cancel.clone()));
        }

        let store = LocalWorkspaceStore::new(&self.config.workspace_store_dir);
        let owner = self.config.owned_only.then(|| identity.clone());

        let mut caches = HashMap::new();
        for project in control_plane.list_projects().await? {
            let name = project.metadata.name;
            let options =
                CacheOptions::new(namespacer.namespace_for(&name)?, &self.config.label_selector)
                    .with_owner(owner.clone());
            let cache = Arc::new(WorkspaceCache::new(
                control_plane.clone(),
                store.clone(),
                options,
            ));
            cache.open().await?;
            caches.insert(name, cache);
        }
        info!("Watching workspaces in {} project(s)", caches.len());

        let auth = Arc::new(AuthStatusMonitor::new(
            control_plane.clone(),
            true,
            self.config.auth_check_interval(),
        ));
        background.push(auth.clone().spawn(cancel.clone()));

        let state = Arc::new(ApiState {
            control_plane,
            namespacer,
            caches: caches.clone(),
            store,
            selector: self.config.label_selector.clone(),
            default_project: self.config.default_project.clone(),
            owner,
            auth,
            node: overlay,
            debug_config: serde_json::to_value(self.config.redacted()).unwrap_or_default(),
            version: self.version.clone(),
            shutdown: cancel.clone(),
        });

        let api_listener = match reserved_api {
            Some(listener) => listener,
            None => ApiListener::bind(self.config.api_socket_path()).await?,
        };
        let api_task = tokio::spawn(api::serve(
            api_listener,
            api::build_router(state),
            cancel.clone(),
        ));

        let result = front_door.run(cancel.clone()).await;
        cancel.cancel();

        match api_task.await {
            Ok(Err(e)) => warn!("Control API stopped with error: {}", e),
            Err(e) => warn!("Control API task failed: {}", e),
            Ok(Ok(())) => {}
        }
        for cache in caches.values() {
            cache.close().await;
        }
        for task in background {
            let _ = task.await;
        }

        Ok(result?)
    }
}
