//! Authentication status monitor
//!
//! Periodically asks the control plane who we are. Only a definite credential
//! rejection clears the flag; transient failures leave it untouched.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workpod_platform::ControlPlane;

/// Default interval between checks
pub const AUTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthStatus {
    pub authenticated: bool,
}

/// Tracks whether the daemon's credentials are still accepted
pub struct AuthStatusMonitor {
    control_plane: Arc<dyn ControlPlane>,
    status: RwLock<AuthStatus>,
    interval: Duration,
}

impl AuthStatusMonitor {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        authenticated: bool,
        interval: Duration,
    ) -> Self {
        Self {
            control_plane,
            status: RwLock::new(AuthStatus { authenticated }),
            interval,
        }
    }

    pub async fn status(&self) -> AuthStatus {
        *self.status.read().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.status().await.authenticated
    }

    /// Run one check and update the flag
    pub async fn check(&self) {
        let authenticated = match self.control_plane.self_identity().await {
            Ok(_) => true,
            Err(e) if e.is_unauthorized() => {
                debug!("Credentials rejected: {}", e);
                false
            }
            Err(e) => {
                warn!("Auth check failed, keeping previous status: {}", e);
                return;
            }
        };

        let mut status = self.status.write().await;
        if status.authenticated != authenticated {
            info!(authenticated, "Authentication status changed");
        }
        status.authenticated = authenticated;
    }

    /// Check on a fixed interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Auth status monitor stopped");
                    return;
                }
                _ = interval.tick() => self.check().await,
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
