//! Local endpoints the front door relays to

use std::net::SocketAddr;
use std::path::PathBuf;
use workpod_overlay::{connect_local, LocalStream};

/// A dialable local endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix socket, or named pipe on Windows
    Local(PathBuf),
    Tcp(SocketAddr),
}

impl Endpoint {
    pub async fn connect(&self) -> std::io::Result<LocalStream> {
        match self {
            Endpoint::Local(path) => connect_local(path).await,
            Endpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Local(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}
