//! Client for a running daemon's control API
//!
//! Connects to the daemon's IPC endpoint, sends the marker byte and then
//! speaks plain HTTP/1.1 over the same stream.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use workpod_proto::{StatusResponse, VersionResponse, DAEMON_MARKER};

use crate::api::models::{ErrorResponse, HealthResponse, ShutdownResponse};
use crate::endpoint::Endpoint;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon is not running at {endpoint}: {source}")]
    NotRunning {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Talks to the daemon through its front door
#[derive(Debug, Clone)]
pub struct DaemonClient {
    endpoint: Endpoint,
}

impl DaemonClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>, ClientError> {
        trace!("Daemon {} {}", request.method(), request.uri());

        let mut stream =
            self.endpoint
                .connect()
                .await
                .map_err(|source| ClientError::NotRunning {
                    endpoint: self.endpoint.to_string(),
                    source,
                })?;
        stream.write_all(&[DAEMON_MARKER]).await?;

        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Daemon connection closed: {}", e);
            }
        });

        Ok(sender.send_request(request).await?)
    }

    async fn read_json<T: DeserializeOwned>(response: Response<Incoming>) -> Result<T, ClientError> {
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn builder(method: Method, path: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "workpod-daemon")
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let request = Self::builder(Method::GET, path).body(Full::new(Bytes::new()))?;
        Self::read_json(self.send(request).await?).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let request = Self::builder(Method::POST, path)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(body)?)))?;
        Self::read_json(self.send(request).await?).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json("/health").await
    }

    pub async fn status(&self, debug: bool) -> Result<StatusResponse, ClientError> {
        let path = if debug { "/status?debug" } else { "/status" };
        self.get_json(path).await
    }

    pub async fn version(&self) -> Result<VersionResponse, ClientError> {
        self.get_json("/version").await
    }

    pub async fn shutdown(&self) -> Result<ShutdownResponse, ClientError> {
        self.get_json("/shutdown").await
    }
}
