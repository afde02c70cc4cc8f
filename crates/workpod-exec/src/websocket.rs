//! WebSocket message tunnel using tokio-tungstenite
//!
//! The socket is split in two. A writer task owns the sink and serializes
//! everything the session sends (data, pings, the closing frame); the
//! [`WebSocketReceiver`] owns the source.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::tunnel::{TunnelError, TunnelReceiver, TunnelResult, TunnelSender};

/// Time allowed for the WebSocket handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);

struct Outbound {
    message: Message,
    ack: oneshot::Sender<Result<(), String>>,
}

/// Sending half of a WebSocket tunnel
#[derive(Debug, Clone)]
pub struct WebSocketSender {
    connection_id: String,
    frame_tx: mpsc::Sender<Outbound>,
    max_message_size: usize,
}

/// Receiving half of a WebSocket tunnel
pub struct WebSocketReceiver<S> {
    connection_id: String,
    source: SplitStream<WebSocketStream<S>>,
}

/// Split an established WebSocket into tunnel halves
pub fn split<S>(
    ws_stream: WebSocketStream<S>,
    max_message_size: usize,
) -> (WebSocketSender, WebSocketReceiver<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = format!("ws-{}", uuid::Uuid::new_v4());
    let (sink, source) = ws_stream.split();
    let (frame_tx, frame_rx) = mpsc::channel::<Outbound>(64);

    let conn_id = connection_id.clone();
    tokio::spawn(async move {
        writer_task(sink, frame_rx, conn_id).await;
    });

    (
        WebSocketSender {
            connection_id: connection_id.clone(),
            frame_tx,
            max_message_size,
        },
        WebSocketReceiver {
            connection_id,
            source,
        },
    )
}

/// Open a WebSocket tunnel to `url`, authenticating with a bearer token
pub async fn connect(
    url: &str,
    token: Option<&str>,
    max_message_size: usize,
) -> TunnelResult<(
    WebSocketSender,
    WebSocketReceiver<MaybeTlsStream<TcpStream>>,
)> {
    let mut request = url.into_client_request()?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TunnelError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
    }

    debug!("Opening WebSocket tunnel to {}", url);

    let (ws_stream, response) =
        tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| TunnelError::HandshakeTimeout)??;

    debug!(
        "WebSocket handshake complete (status {})",
        response.status()
    );

    Ok(split(ws_stream, max_message_size))
}

/// Writer task - sends queued messages to the WebSocket
async fn writer_task<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let closing = matches!(outbound.message, Message::Close(_));
        let result = sink.send(outbound.message).await.map_err(|e| e.to_string());

        if let Err(e) = &result {
            error!("[{}] WebSocket send error: {}", conn_id, e);
        }

        let failed = result.is_err();
        let _ = outbound.ack.send(result);
        if failed || closing {
            break;
        }
    }

    debug!("[{}] WebSocket writer task ended", conn_id);
    let _ = sink.close().await;
}

impl WebSocketSender {
    async fn submit(&self, message: Message) -> TunnelResult<()> {
        let (ack, done) = oneshot::channel();
        self.frame_tx
            .send(Outbound { message, ack })
            .await
            .map_err(|_| TunnelError::Closed)?;

        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TunnelError::SendFailed(e)),
            Err(_) => Err(TunnelError::Closed),
        }
    }
}

#[async_trait]
impl TunnelSender for WebSocketSender {
    async fn send(&self, message: Bytes) -> TunnelResult<()> {
        if message.len() > self.max_message_size {
            return Err(TunnelError::MessageTooLarge {
                size: message.len(),
                max: self.max_message_size,
            });
        }
        trace!("[{}] Sending {} bytes", self.connection_id, message.len());
        self.submit(Message::Binary(message.to_vec())).await
    }

    async fn ping(&self) -> TunnelResult<()> {
        self.submit(Message::Ping(Vec::new())).await
    }

    async fn close(&self) -> TunnelResult<()> {
        debug!("[{}] Closing tunnel", self.connection_id);
        self.submit(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
        .await
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

#[async_trait]
impl<S> TunnelReceiver for WebSocketReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> TunnelResult<Option<Bytes>> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pong replies are handled by tungstenite
                    trace!("[{}] Control frame received", self.connection_id);
                }
                Some(Ok(Message::Text(text))) => {
                    warn!(
                        "[{}] Ignoring unexpected text message ({} bytes)",
                        self.connection_id,
                        text.len()
                    );
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("[{}] WebSocket close received: {:?}", self.connection_id, frame);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
