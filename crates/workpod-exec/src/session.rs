//! Client side of a remote exec session
//!
//! Three routines share one cancellation scope: the stdin pump, the inbound
//! demultiplexer and a keep-alive pinger. The first of them to finish decides
//! the session outcome; the tunnel is then closed with a normal-closure frame.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use workpod_proto::StreamKind;

use crate::pump::{pump_inbound, pump_outbound, Sinks};
use crate::tunnel::{TunnelReceiver, TunnelSender};
use crate::ExecError;

/// Interval between keep-alive pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Deadline for a single keep-alive ping
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Exec session timing
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub keepalive_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: KEEPALIVE_INTERVAL,
            ping_timeout: PING_TIMEOUT,
        }
    }
}

/// Run a remote command over an open tunnel
///
/// Local `stdin` (if any) is streamed to the remote side while remote output is
/// copied into `stdout` and `stderr`. Returns the remote exit code; a non-zero
/// code is a successful session outcome. A tunnel that closes without ever
/// delivering an exit code yields [`ExecError::MissingExitCode`].
pub async fn exec<S, R, I, O, E>(
    sender: &S,
    receiver: &mut R,
    stdin: Option<I>,
    stdout: &mut O,
    stderr: &mut E,
    options: &ExecOptions,
    cancel: &CancellationToken,
) -> Result<i64, ExecError>
where
    S: TunnelSender + ?Sized,
    R: TunnelReceiver + ?Sized,
    I: AsyncRead + Unpin + Send,
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    let scope = cancel.child_token();

    let outbound = async {
        match pump_outbound(stdin, sender, StreamKind::Stdin).await {
            Ok(_) => {}
            // The remote may have sent its exit code and closed; inbound decides
            Err(ExecError::Tunnel(e)) => debug!("Stdin pump stopped: {}", e),
            Err(e) => return Err(e),
        }
        // Stdin is done; the session continues until the exit code arrives
        std::future::pending::<Result<i64, ExecError>>().await
    };

    let mut sinks = Sinks {
        stdin: None,
        stdout: Some(Box::new(stdout)),
        stderr: Some(Box::new(stderr)),
    };

    let inbound = async {
        match pump_inbound(receiver, &mut sinks).await? {
            Some(code) => Ok(code),
            None => Err(ExecError::MissingExitCode),
        }
    };

    let result = tokio::select! {
        biased;
        result = inbound => result,
        result = outbound => result,
        err = keepalive(sender, options) => Err(err),
        _ = scope.cancelled() => Err(ExecError::Cancelled),
    };
    scope.cancel();

    match &result {
        Ok(code) => debug!("Exec session finished with exit code {}", code),
        Err(e) => debug!("Exec session ended: {}", e),
    }

    if let Err(e) = sender.close().await {
        warn!("Failed to close exec tunnel: {}", e);
    }

    result
}

/// Ping the peer on a fixed cadence; only returns once a ping fails
async fn keepalive<S>(sender: &S, options: &ExecOptions) -> ExecError
where
    S: TunnelSender + ?Sized,
{
    let start = tokio::time::Instant::now() + options.keepalive_interval;
    let mut interval = tokio::time::interval_at(start, options.keepalive_interval);

    loop {
        interval.tick().await;
        match tokio::time::timeout(options.ping_timeout, sender.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return ExecError::TransportDead(e.to_string()),
            Err(_) => {
                return ExecError::TransportDead(format!(
                    "ping timed out after {:?}",
                    options.ping_timeout
                ))
            }
        }
    }
}
