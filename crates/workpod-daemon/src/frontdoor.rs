//! Socket front door
//!
//! One local IPC endpoint carries two protocols. The first byte of every
//! connection picks the backend: [`DAEMON_MARKER`] goes to the daemon's
//! control API and is consumed, anything else goes to the overlay node's
//! local endpoint with that byte replayed first. After routing, bytes are
//! copied both ways until either direction ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workpod_proto::DAEMON_MARKER;

use crate::endpoint::Endpoint;
use crate::error::FrontDoorError;

/// Deadline for connecting to a backend
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Backends behind the front door
#[derive(Debug, Clone)]
pub struct Routes {
    pub api: Endpoint,
    pub overlay: Endpoint,
    pub dial_timeout: Duration,
}

impl Routes {
    pub fn new(api: Endpoint, overlay: Endpoint) -> Self {
        Self {
            api,
            overlay,
            dial_timeout: DIAL_TIMEOUT,
        }
    }
}

/// Where a connection goes, decided by its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Api,
    /// Overlay pass-through; carries the byte to replay
    Overlay(u8),
}

impl Route {
    pub fn for_first_byte(byte: u8) -> Self {
        if byte == DAEMON_MARKER {
            Route::Api
        } else {
            Route::Overlay(byte)
        }
    }
}

/// Route one accepted connection and relay it until either side is done
///
/// Returns `None` when the peer closed before sending anything.
pub async fn handle_connection<S>(
    mut client: S,
    routes: &Routes,
) -> Result<Option<Route>, FrontDoorError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut first = [0u8; 1];
    if client.read(&mut first).await? == 0 {
        return Ok(None);
    }

    let route = Route::for_first_byte(first[0]);
    let endpoint = match route {
        Route::Api => &routes.api,
        Route::Overlay(_) => &routes.overlay,
    };

    let mut backend = tokio::time::timeout(routes.dial_timeout, endpoint.connect())
        .await
        .map_err(|_| FrontDoorError::DialTimeout(endpoint.to_string()))??;

    if let Route::Overlay(byte) = route {
        backend.write_all(&[byte]).await?;
    }

    relay(client, backend).await?;
    Ok(Some(route))
}

/// Copy both ways; the first direction to finish tears down both
async fn relay<A, B>(client: A, backend: B) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut backend_write) => {
            let bytes = result?;
            debug!(bytes_to_backend = bytes, "Client side finished");
        }
        result = tokio::io::copy(&mut backend_read, &mut client_write) => {
            let bytes = result?;
            debug!(bytes_to_client = bytes, "Backend side finished");
        }
    }
    Ok(())
}

fn spawn_connection<S>(stream: S, routes: Arc<Routes>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = uuid::Uuid::new_v4();
    tokio::spawn(async move {
        debug!(connection_id = %connection_id, "Accepted connection");
        match handle_connection(stream, &routes).await {
            Ok(Some(route)) => debug!(connection_id = %connection_id, ?route, "Connection closed"),
            Ok(None) => debug!(connection_id = %connection_id, "Connection closed before routing"),
            Err(e) => warn!(connection_id = %connection_id, "Connection failed: {}", e),
        }
    });
}

#[cfg(unix)]
pub use unix::SocketFrontDoor;

#[cfg(windows)]
pub use windows::SocketFrontDoor;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::{UnixListener, UnixStream};

    /// Front door listening on a unix socket
    pub struct SocketFrontDoor {
        listener: UnixListener,
        path: PathBuf,
        routes: Arc<Routes>,
    }

    impl SocketFrontDoor {
        /// Bind `path`, refusing if a live daemon already answers there
        ///
        /// A leftover socket file nobody answers on is removed first. The
        /// probe and the bind are not atomic; one daemon per provider and
        /// host is assumed.
        pub async fn bind(path: &Path, routes: Routes) -> Result<Self, FrontDoorError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            if path.exists() {
                match UnixStream::connect(path).await {
                    Ok(_) => return Err(FrontDoorError::AlreadyRunning(path.to_path_buf())),
                    Err(_) => {
                        debug!("Removing stale socket {:?}", path);
                        std::fs::remove_file(path)?;
                    }
                }
            }

            let listener = UnixListener::bind(path).map_err(|source| FrontDoorError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

            Ok(Self {
                listener,
                path: path.to_path_buf(),
                routes: Arc::new(routes),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Accept connections until cancelled
        pub async fn run(self, cancel: CancellationToken) -> Result<(), FrontDoorError> {
            info!("Front door listening at {:?}", self.path);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, _)) => spawn_connection(stream, self.routes.clone()),
                        Err(e) => warn!("Failed to accept connection: {}", e),
                    },
                }
            }
            info!("Front door stopped");
            Ok(())
        }
    }

    impl Drop for SocketFrontDoor {
        fn drop(&mut self) {
            if self.path.exists() {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    /// Front door listening on a named pipe
    pub struct SocketFrontDoor {
        server: NamedPipeServer,
        path: PathBuf,
        routes: Arc<Routes>,
    }

    impl SocketFrontDoor {
        /// Create the first pipe instance; fails if another daemon owns the name
        pub async fn bind(path: &Path, routes: Routes) -> Result<Self, FrontDoorError> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)
                .map_err(|source| match source.kind() {
                    std::io::ErrorKind::PermissionDenied => {
                        FrontDoorError::AlreadyRunning(path.to_path_buf())
                    }
                    _ => FrontDoorError::Bind {
                        path: path.to_path_buf(),
                        source,
                    },
                })?;

            Ok(Self {
                server,
                path: path.to_path_buf(),
                routes: Arc::new(routes),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Accept connections until cancelled
        pub async fn run(self, cancel: CancellationToken) -> Result<(), FrontDoorError> {
            info!("Front door listening at {:?}", self.path);
            let mut server = self.server;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    connected = server.connect() => {
                        // A new instance must exist before the old one is handed off
                        let next = ServerOptions::new().create(&self.path)?;
                        let client = std::mem::replace(&mut server, next);
                        match connected {
                            Ok(()) => spawn_connection(client, self.routes.clone()),
                            Err(e) => warn!("Failed to accept connection: {}", e),
                        }
                    }
                }
            }
            info!("Front door stopped");
            Ok(())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Backend that records everything it receives on one connection
    fn recording_backend(path: &Path) -> tokio::task::JoinHandle<Vec<u8>> {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        })
    }

    fn routes(dir: &Path) -> Routes {
        Routes::new(
            Endpoint::Local(dir.join("api.sock")),
            Endpoint::Local(dir.join("overlay.sock")),
        )
    }

    #[test]
    fn test_route_for_first_byte() {
        assert_eq!(Route::for_first_byte(0x01), Route::Api);
        assert_eq!(Route::for_first_byte(b'G'), Route::Overlay(b'G'));
        assert_eq!(Route::for_first_byte(0x00), Route::Overlay(0x00));
    }

    #[tokio::test]
    async fn test_marker_routes_to_api_and_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(dir.path());
        let api = recording_backend(&dir.path().join("api.sock"));

        let (mut client, server) = tokio::io::duplex(64);
        let handler = tokio::spawn(async move { handle_connection(server, &routes).await });

        client.write_all(b"\x01GET /status").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(handler.await.unwrap().unwrap(), Some(Route::Api));
        assert_eq!(api.await.unwrap(), b"GET /status");
    }

    #[tokio::test]
    async fn test_other_byte_is_replayed_to_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(dir.path());
        let overlay = recording_backend(&dir.path().join("overlay.sock"));

        let (mut client, server) = tokio::io::duplex(64);
        let handler = tokio::spawn(async move { handle_connection(server, &routes).await });

        client.write_all(b"GET /localapi/v0/status").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(handler.await.unwrap().unwrap(), Some(Route::Overlay(b'G')));
        assert_eq!(overlay.await.unwrap(), b"GET /localapi/v0/status");
    }

    #[tokio::test]
    async fn test_backend_reply_reaches_client() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(dir.path());
        let listener = UnixListener::bind(dir.path().join("api.sock")).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4];
            stream.read_exact(&mut request).await.unwrap();
            stream.write_all(b"pong").await.unwrap();
        });

        let (mut client, server) = tokio::io::duplex(64);
        let handler = tokio::spawn(async move { handle_connection(server, &routes).await });

        client.write_all(b"\x01ping").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();

        assert_eq!(reply, b"pong");
        assert_eq!(handler.await.unwrap().unwrap(), Some(Route::Api));
    }

    #[tokio::test]
    async fn test_empty_connection_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(dir.path());

        let (client, server) = tokio::io::duplex(64);
        drop(client);

        assert_eq!(handle_connection(server, &routes).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(dir.path());

        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"\x01").await.unwrap();

        assert!(handle_connection(server, &routes).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_refuses_live_socket_and_clears_stale_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("workpod.sock");

        let first = SocketFrontDoor::bind(&path, routes(dir.path())).await.unwrap();
        let second = SocketFrontDoor::bind(&path, routes(dir.path())).await;
        assert!(matches!(second, Err(FrontDoorError::AlreadyRunning(_))));

        drop(first);
        assert!(!path.exists());

        // A socket file nobody listens on
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());
        let rebound = SocketFrontDoor::bind(&path, routes(dir.path())).await;
        assert!(rebound.is_ok());
    }
}
