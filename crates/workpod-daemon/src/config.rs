//! Daemon configuration
//!
//! Loaded from an optional JSON file; the CLI layers flags and `WORKPOD_*`
//! environment variables on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use workpod_overlay::OverlayConfig;

use crate::error::DaemonError;

const REDACTED: &str = "<redacted>";

/// Label selecting workspace instances managed through the daemon
pub const DEFAULT_LABEL_SELECTOR: &str = "workpod.dev/managed=true";

/// Settings for the daemon's overlay node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Node binary; unset attaches to a node that is already running
    pub binary: Option<PathBuf>,
    pub state_dir: PathBuf,
    /// Coordination server; derived from the platform URL when empty
    pub control_url: String,
    pub auth_key: Option<String>,
    pub hostname: String,
    pub join_timeout_secs: u64,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            binary: None,
            state_dir: workpod_home().join("overlay"),
            control_url: String::new(),
            auth_key: None,
            hostname: default_hostname(),
            join_timeout_secs: 60,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Provider identity; names the IPC endpoint
    pub provider: String,
    pub platform_url: String,
    pub access_key: Option<String>,
    pub runtime_dir: PathBuf,
    /// Root of the local workspace store
    pub workspace_store_dir: PathBuf,
    pub label_selector: String,
    /// Project used for create/update requests that name none
    pub default_project: Option<String>,
    /// Only cache workspaces owned by the caller or the caller's team
    pub owned_only: bool,
    /// Where to write network map snapshots, if anywhere
    pub netmap_path: Option<PathBuf>,
    pub auth_check_interval_secs: u64,
    pub overlay: OverlaySettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            provider: "workpod".to_string(),
            platform_url: String::new(),
            access_key: None,
            runtime_dir: dirs::runtime_dir().unwrap_or_else(std::env::temp_dir),
            workspace_store_dir: workpod_home().join("workspaces"),
            label_selector: DEFAULT_LABEL_SELECTOR.to_string(),
            default_project: None,
            owned_only: false,
            netmap_path: None,
            auth_check_interval_secs: 10,
            overlay: OverlaySettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&json)
            .map_err(|e| DaemonError::Config(format!("failed to parse {:?}: {}", path, e)))
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.provider.is_empty()
            || !self
                .provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DaemonError::Config(format!(
                "invalid provider name {:?}",
                self.provider
            )));
        }
        if self.platform_url.is_empty() {
            return Err(DaemonError::Config("platform URL is required".to_string()));
        }
        Ok(())
    }

    /// IPC endpoint shared by the daemon API and overlay pass-through
    #[cfg(unix)]
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir
            .join("workpod")
            .join(format!("{}.sock", self.provider))
    }

    #[cfg(windows)]
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(format!(r"\\.\pipe\workpod-{}", self.provider))
    }

    /// Private socket the control API listens on behind the front door
    pub fn api_socket_path(&self) -> PathBuf {
        self.runtime_dir
            .join("workpod")
            .join(format!("{}-api.sock", self.provider))
    }

    pub fn overlay_control_url(&self) -> String {
        if self.overlay.control_url.is_empty() {
            format!("{}/coordinator", self.platform_url.trim_end_matches('/'))
        } else {
            self.overlay.control_url.clone()
        }
    }

    pub fn overlay_config(&self) -> OverlayConfig {
        let mut config = OverlayConfig::new(
            self.overlay.state_dir.clone(),
            &self.overlay_control_url(),
            &self.overlay.hostname,
        );
        config.binary = self.overlay.binary.clone();
        config.auth_key = self.overlay.auth_key.clone();
        config.join_timeout = Duration::from_secs(self.overlay.join_timeout_secs);
        config
    }

    pub fn auth_check_interval(&self) -> Duration {
        Duration::from_secs(self.auth_check_interval_secs.max(1))
    }

    /// Copy with every secret replaced
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.access_key.is_some() {
            config.access_key = Some(REDACTED.to_string());
        }
        if config.overlay.auth_key.is_some() {
            config.overlay.auth_key = Some(REDACTED.to_string());
        }
        config
    }
}

/// `~/.workpod`, or a temp directory when there is no home
pub fn workpod_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".workpod")
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "workpod-daemon".to_string())
}
