//! Join and watch against a fake LocalAPI served on a unix socket
#![cfg(unix)]

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workpod_overlay::{OverlayConfig, OverlayError, OverlayNetworkClient};
use workpod_proto::DaemonState;

#[derive(Clone)]
struct FakeNode {
    states: Arc<Vec<&'static str>>,
    polls: Arc<AtomicUsize>,
    started: Arc<Mutex<Option<Value>>>,
}

impl FakeNode {
    fn new(states: Vec<&'static str>) -> Self {
        Self {
            states: Arc::new(states),
            polls: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Mutex::new(None)),
        }
    }
}

async fn status(State(node): State<FakeNode>) -> Json<Value> {
    let n = node.polls.fetch_add(1, Ordering::SeqCst);
    let state = node.states[n.min(node.states.len() - 1)];
    Json(json!({"BackendState": state, "Self": {"HostName": "laptop"}}))
}

async fn start(State(node): State<FakeNode>, Json(body): Json<Value>) -> Json<Value> {
    *node.started.lock().unwrap() = Some(body);
    Json(json!({}))
}

async fn watch_bus() -> String {
    format!(
        "{}\n{}\n",
        json!({"State": 6}),
        json!({"NetMap": {"SelfNode": {"Name": "laptop"}, "Peers": []}})
    )
}

fn serve(socket: &Path, node: FakeNode) {
    let app = Router::new()
        .route("/localapi/v0/status", get(status))
        .route("/localapi/v0/start", post(start))
        .route("/localapi/v0/watch-ipn-bus", get(watch_bus))
        .with_state(node);

    let listener = tokio::net::UnixListener::bind(socket).unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

fn config(dir: &Path) -> OverlayConfig {
    let mut config = OverlayConfig::new(dir, "https://ts.example.com", "laptop");
    config.auth_key = Some("tskey-abc".to_string());
    config.poll_interval = Duration::from_millis(10);
    config.login_settle = Duration::from_millis(100);
    config.join_timeout = Duration::from_secs(5);
    config
}

#[tokio::test]
async fn test_join_waits_for_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let node = FakeNode::new(vec!["NoState", "Starting", "Starting", "Running"]);
    serve(&config.socket_path, node.clone());

    let client = OverlayNetworkClient::new(config);
    let status = client.join().await.unwrap();

    assert_eq!(status.daemon_state(), DaemonState::Running);
    assert!(node.polls.load(Ordering::SeqCst) >= 4);

    let started = node.started.lock().unwrap().clone().unwrap();
    assert_eq!(started["AuthKey"], "tskey-abc");
    assert_eq!(started["UpdatePrefs"]["ControlURL"], "https://ts.example.com");
    assert_eq!(started["UpdatePrefs"]["WantRunning"], true);
}

#[tokio::test]
async fn test_spawned_node_joins_as_ephemeral() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let args_path = dir.path().join("args");
    let binary = dir.path().join("fake-node");
    std::fs::write(
        &binary,
        format!(
            "#!/bin/sh\necho \"$@\" > {0}.tmp && mv {0}.tmp {0}\nexec sleep 30\n",
            args_path.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = config(dir.path());
    config.binary = Some(binary);

    // The node's API comes up once the process has started
    let node = FakeNode::new(vec!["Running"]);
    let socket = config.socket_path.clone();
    let ready = args_path.clone();
    let served = node.clone();
    tokio::spawn(async move {
        while !ready.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        serve(&socket, served);
    });

    let client = OverlayNetworkClient::new(config);
    client.join().await.unwrap();

    let args = std::fs::read_to_string(&args_path).unwrap();
    assert!(args.contains("--state=mem:"), "{}", args);
    assert!(args.contains("--tun=userspace-networking"), "{}", args);
    assert_eq!(node.started.lock().unwrap().clone().unwrap()["AuthKey"], "tskey-abc");

    client.shutdown().await;
}

#[tokio::test]
async fn test_join_rejects_settled_needs_login() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    serve(&config.socket_path, FakeNode::new(vec!["NeedsLogin"]));

    let client = OverlayNetworkClient::new(config);
    let err = client.join().await.unwrap_err();

    assert!(matches!(err, OverlayError::CredentialRejected(_)), "{:?}", err);
}

#[tokio::test]
async fn test_join_fails_without_node() {
    let dir = tempfile::tempdir().unwrap();
    let client = OverlayNetworkClient::new(config(dir.path()));

    tokio::time::pause();
    let err = client.join().await.unwrap_err();
    assert!(matches!(err, OverlayError::SocketTimeout(_)));
}

#[tokio::test]
async fn test_netmap_snapshot_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    serve(&config.socket_path, FakeNode::new(vec!["Running"]));

    let client = OverlayNetworkClient::new(config);
    let path = dir.path().join("netmap.json");
    client
        .watch_netmap(path.clone(), CancellationToken::new())
        .await
        .unwrap();

    let snapshot: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(snapshot["SelfNode"]["Name"], "laptop");
}

#[tokio::test]
async fn test_dial_rejected_by_node() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    serve(&config.socket_path, FakeNode::new(vec!["Running"]));

    let client = OverlayNetworkClient::new(config);
    let err = client.dial("ws-1", 22).await.unwrap_err();

    assert!(matches!(err, OverlayError::DialRejected { ref target, .. } if target == "ws-1:22"));
}
