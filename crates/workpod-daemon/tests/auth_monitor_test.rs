mod common;

use common::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workpod_daemon::AuthStatusMonitor;

#[tokio::test]
async fn test_only_rejected_credentials_clear_the_flag() {
    let (control_plane, _watch) = FakeControlPlane::new();
    let monitor = AuthStatusMonitor::new(control_plane.clone(), true, Duration::from_secs(10));

    control_plane.set_identity(Identity::Unavailable);
    monitor.check().await;
    assert!(monitor.is_authenticated().await);

    control_plane.set_identity(Identity::Unauthorized);
    monitor.check().await;
    assert!(!monitor.is_authenticated().await);

    // A transient failure does not flip it back either
    control_plane.set_identity(Identity::Unavailable);
    monitor.check().await;
    assert!(!monitor.is_authenticated().await);

    control_plane.set_identity(Identity::Ok);
    monitor.check().await;
    assert!(monitor.status().await.authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_checks_on_interval_until_cancelled() {
    let (control_plane, _watch) = FakeControlPlane::new();
    control_plane.set_identity(Identity::Unauthorized);
    let monitor = std::sync::Arc::new(AuthStatusMonitor::new(
        control_plane.clone(),
        true,
        Duration::from_secs(10),
    ));

    let cancel = CancellationToken::new();
    let task = monitor.clone().spawn(cancel.clone());

    // The first tick fires immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.is_authenticated().await);

    control_plane.set_identity(Identity::Ok);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(monitor.is_authenticated().await);

    cancel.cancel();
    task.await.unwrap();
}
