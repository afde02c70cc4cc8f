//! LocalAPI client
//!
//! The overlay node serves an HTTP API on a local socket. Every call opens a
//! fresh connection; calls are rare and the socket is local.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use http::header::{CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use crate::error::OverlayError;
use crate::types::{NodeStatus, Notify, StartOptions};

/// Host header the node expects on LocalAPI requests
pub const LOCALAPI_HOST: &str = "local-tailscaled.sock";

/// IPN bus mask requesting the current network map up front
pub const NOTIFY_INITIAL_NETMAP: u64 = 1 << 3;

const MAX_NOTIFY_LINE: usize = 64 * 1024 * 1024;

/// A byte stream to the node's local socket
pub trait LocalIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LocalIo for T {}

pub type LocalStream = Box<dyn LocalIo>;

/// Connect to a local socket path (named pipe on Windows)
#[cfg(unix)]
pub async fn connect_local(path: &Path) -> std::io::Result<LocalStream> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
pub async fn connect_local(path: &Path) -> std::io::Result<LocalStream> {
    let client = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
    Ok(Box::new(client))
}

/// HTTP client for the node's LocalAPI
#[derive(Debug, Clone)]
pub struct LocalApiClient {
    socket: PathBuf,
}

impl LocalApiClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    fn builder(method: Method, path: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, LOCALAPI_HOST)
            .header("Sec-Tailscale", "localapi")
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>, OverlayError> {
        trace!("LocalAPI {} {}", request.method(), request.uri());

        let stream = connect_local(&self.socket).await?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;

        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!("LocalAPI connection closed: {}", e);
            }
        });

        Ok(sender.send_request(request).await?)
    }

    async fn check(response: Response<Incoming>) -> Result<Response<Incoming>, OverlayError> {
        let status = response.status();
        if status.is_success() || status == StatusCode::SWITCHING_PROTOCOLS {
            return Ok(response);
        }

        let body = response.into_body().collect().await?.to_bytes();
        Err(OverlayError::LocalApi {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&body).trim().to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, OverlayError> {
        let request = Self::builder(Method::GET, path).body(Full::new(Bytes::new()))?;
        let response = Self::check(self.send(request).await?).await?;
        let body = response.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), OverlayError> {
        let request = Self::builder(Method::POST, path)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(body)?)))?;
        let response = Self::check(self.send(request).await?).await?;
        // Drain so the node sees the exchange complete
        response.into_body().collect().await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<NodeStatus, OverlayError> {
        self.get_json("/localapi/v0/status").await
    }

    pub async fn start(&self, options: &StartOptions) -> Result<(), OverlayError> {
        self.post_json("/localapi/v0/start", options).await
    }

    /// Open a TCP connection to `host:port` through the overlay
    pub async fn dial(&self, host: &str, port: u16) -> Result<TokioIo<Upgraded>, OverlayError> {
        let target = format!("{}:{}", host, port);
        let request = Self::builder(Method::POST, "/localapi/v0/dial")
            .header(CONNECTION, "upgrade")
            .header(UPGRADE, "ts-dial")
            .header("Dial-Host", host)
            .header("Dial-Port", port.to_string())
            .body(Full::new(Bytes::new()))?;

        let response = self.send(request).await?;
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            return Err(OverlayError::DialRejected {
                target,
                message: format!("{}: {}", status, String::from_utf8_lossy(&body).trim()),
            });
        }

        debug!("Dialed {} through the overlay", target);
        let upgraded = hyper::upgrade::on(response).await?;
        Ok(TokioIo::new(upgraded))
    }

    /// Subscribe to the node's notification bus
    pub async fn watch_ipn_bus(
        &self,
        mask: u64,
    ) -> Result<BoxStream<'static, Result<Notify, OverlayError>>, OverlayError> {
        let path = format!("/localapi/v0/watch-ipn-bus?mask={}", mask);
        let request = Self::builder(Method::GET, &path).body(Full::new(Bytes::new()))?;
        let response = Self::check(self.send(request).await?).await?;

        let body = BodyStream::new(response.into_body())
            .try_filter_map(|frame| futures::future::ready(Ok(frame.into_data().ok())))
            .map_err(std::io::Error::other);

        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_NOTIFY_LINE),
        );

        Ok(lines
            .filter_map(|line| {
                let notify = match line {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(serde_json::from_str(&line).map_err(OverlayError::from)),
                    Err(e) => Some(Err(OverlayError::Io(std::io::Error::other(e)))),
                };
                futures::future::ready(notify)
            })
            .boxed())
    }
}
