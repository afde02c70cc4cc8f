//! Overlay network client
//!
//! Runs (or attaches to) a userspace overlay node and brings it onto the
//! platform's private network. Construction has no side effects; [`join`]
//! spawns the node and blocks until it is connected.
//!
//! [`join`]: OverlayNetworkClient::join

use futures::StreamExt;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OverlayError;
use crate::localapi::{connect_local, LocalApiClient, NOTIFY_INITIAL_NETMAP};
use crate::types::{NodeStatus, StartOptions, StartPrefs};

/// Protocol capability version sent to the coordination server
pub const CAPABILITY_VERSION: u32 = 106;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_WAIT: Duration = Duration::from_secs(15);
const SOCKET_POLL: Duration = Duration::from_millis(100);

/// Overlay node settings
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Node binary; `None` attaches to a node already serving `socket_path`
    pub binary: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub control_url: String,
    pub auth_key: Option<String>,
    pub hostname: String,
    /// Keep node state in memory so the peer is dropped once it goes offline
    pub ephemeral: bool,
    pub join_timeout: Duration,
    /// How long the node may sit in NeedsLogin before the key counts as rejected
    pub login_settle: Duration,
    pub poll_interval: Duration,
}

impl OverlayConfig {
    pub fn new(state_dir: impl Into<PathBuf>, control_url: &str, hostname: &str) -> Self {
        let state_dir = state_dir.into();
        Self {
            binary: None,
            socket_path: state_dir.join("node.sock"),
            state_dir,
            control_url: control_url.to_string(),
            auth_key: None,
            hostname: hostname.to_string(),
            ephemeral: true,
            join_timeout: Duration::from_secs(60),
            login_settle: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Client for the daemon's overlay node
pub struct OverlayNetworkClient {
    config: OverlayConfig,
    api: LocalApiClient,
    child: Mutex<Option<Child>>,
    http: reqwest::Client,
}

impl OverlayNetworkClient {
    pub fn new(config: OverlayConfig) -> Self {
        let api = LocalApiClient::new(config.socket_path.clone());
        Self {
            config,
            api,
            child: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Socket that raw overlay clients are relayed to
    pub fn local_endpoint(&self) -> &Path {
        self.api.socket_path()
    }

    /// Check that the coordination server answers
    pub async fn probe_coordinator(&self) -> Result<(), OverlayError> {
        let url = format!(
            "{}/key?v={}",
            self.config.control_url.trim_end_matches('/'),
            CAPABILITY_VERSION
        );
        debug!("Probing coordination server at {}", url);

        let response = self
            .http
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| OverlayError::CoordinatorUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OverlayError::CoordinatorUnreachable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    /// Start the node and wait until it is connected
    pub async fn join(&self) -> Result<NodeStatus, OverlayError> {
        if let Some(binary) = &self.config.binary {
            self.spawn_node(binary).await?;
        }
        self.wait_for_socket().await?;

        let options = StartOptions {
            update_prefs: StartPrefs {
                control_url: self.config.control_url.clone(),
                hostname: self.config.hostname.clone(),
                want_running: true,
            },
            auth_key: self.config.auth_key.clone(),
        };
        self.api.start(&options).await?;

        let status = self.wait_until_running().await?;
        info!(
            hostname = %self.config.hostname,
            peers = status.peers.len(),
            "Joined overlay network"
        );
        Ok(status)
    }

    async fn spawn_node(&self, binary: &Path) -> Result<(), OverlayError> {
        tokio::fs::create_dir_all(&self.config.state_dir).await?;

        // A socket left behind by a previous node would satisfy the readiness wait
        match tokio::fs::remove_file(&self.config.socket_path).await {
            Ok(()) => debug!("Removed stale node socket {:?}", self.config.socket_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut command = Command::new(binary);
        command
            .args(node_args(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if !self.config.ephemeral {
            warn!("Overlay node keeps persistent state; it stays registered after exit");
        }

        let child = command.spawn().map_err(|source| OverlayError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;
        info!(pid = ?child.id(), "Started overlay node {:?}", binary);

        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn wait_for_socket(&self) -> Result<(), OverlayError> {
        let deadline = Instant::now() + SOCKET_WAIT;
        loop {
            match connect_local(&self.config.socket_path).await {
                Ok(_) => return Ok(()),
                Err(e) if Instant::now() >= deadline => {
                    debug!("Node socket never became ready: {}", e);
                    return Err(OverlayError::SocketTimeout(self.config.socket_path.clone()));
                }
                Err(_) => tokio::time::sleep(SOCKET_POLL).await,
            }
        }
    }

    async fn wait_until_running(&self) -> Result<NodeStatus, OverlayError> {
        let deadline = Instant::now() + self.config.join_timeout;
        let mut needs_login_since: Option<Instant> = None;

        loop {
            let status = self.api.status().await?;
            if status.is_running() {
                return Ok(status);
            }

            if status.needs_login() {
                let since = *needs_login_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.config.login_settle {
                    let detail = status
                        .health
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "node requires login".to_string());
                    return Err(OverlayError::CredentialRejected(detail));
                }
            } else {
                needs_login_since = None;
            }

            if Instant::now() >= deadline {
                return Err(OverlayError::JoinTimeout(self.config.join_timeout));
            }
            debug!("Overlay backend state is {:?}", status.backend_state);
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    pub async fn status(&self) -> Result<NodeStatus, OverlayError> {
        self.api.status().await
    }

    pub async fn dial(&self, host: &str, port: u16) -> Result<TokioIo<Upgraded>, OverlayError> {
        self.api.dial(host, port).await
    }

    /// Keep `path` updated with the node's latest network map
    ///
    /// Runs until the bus ends or `cancel` fires. Failures are logged only.
    pub fn watch_netmap(&self, path: PathBuf, cancel: CancellationToken) -> JoinHandle<()> {
        let api = self.api.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = run_netmap_watch(&api, &path) => {
                    if let Err(e) = result {
                        warn!("Network map watch ended: {}", e);
                    }
                }
                _ = cancel.cancelled() => debug!("Network map watch cancelled"),
            }
        })
    }

    /// Stop a node this client spawned
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop overlay node: {}", e);
            }
        }
    }
}

/// Command line for a spawned node
///
/// An in-memory state store makes the node register as ephemeral.
pub fn node_args(config: &OverlayConfig) -> Vec<String> {
    let mut args = vec![
        "--tun=userspace-networking".to_string(),
        format!("--statedir={}", config.state_dir.display()),
        format!("--socket={}", config.socket_path.display()),
    ];
    if config.ephemeral {
        args.push("--state=mem:".to_string());
    }
    args
}

async fn run_netmap_watch(api: &LocalApiClient, path: &Path) -> Result<(), OverlayError> {
    let mut notifications = api.watch_ipn_bus(NOTIFY_INITIAL_NETMAP).await?;

    while let Some(notify) = notifications.next().await {
        let notify = notify?;
        if let Some(message) = notify.err_message {
            warn!("Overlay node reported: {}", message);
        }
        if let Some(netmap) = notify.net_map {
            write_snapshot(path, &netmap).await?;
            debug!("Wrote network map snapshot to {:?}", path);
        }
    }
    Ok(())
}

/// Replace `path` with a pretty-printed snapshot of `value`
pub async fn write_snapshot(path: &Path, value: &serde_json::Value) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, serde_json::to_vec_pretty(value)?).await?;
    tokio::fs::rename(&temp, path).await
}
