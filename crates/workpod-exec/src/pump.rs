//! Outbound and inbound pumps
//!
//! The outbound pump turns a local byte source into Data messages followed by
//! exactly one Close. The inbound pump demultiplexes tunnel messages onto local
//! sinks until an exit code arrives or the tunnel ends.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};
use workpod_proto::{ExecMessage, StreamKind};

use crate::tunnel::{TunnelReceiver, TunnelSender};
use crate::ExecError;

/// A local destination for one demultiplexed stream
pub type Sink<'a> = Box<dyn AsyncWrite + Unpin + Send + 'a>;

/// Local destinations for inbound data
///
/// A `None` entry discards data for that stream. A sink is shut down and
/// dropped when its Close message arrives, which closes pipes it owns.
#[derive(Default)]
pub struct Sinks<'a> {
    pub stdin: Option<Sink<'a>>,
    pub stdout: Option<Sink<'a>>,
    pub stderr: Option<Sink<'a>>,
}

impl<'a> Sinks<'a> {
    fn slot(&mut self, kind: StreamKind) -> &mut Option<Sink<'a>> {
        match kind {
            StreamKind::Stdin => &mut self.stdin,
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    /// Write to the sink for `kind`
    ///
    /// A sink that fails is dropped and later data for it is discarded. Only
    /// the tunnel can end a session, never a local pipe.
    async fn write(&mut self, kind: StreamKind, data: &[u8]) {
        let slot = self.slot(kind);
        let Some(sink) = slot.as_mut() else {
            trace!("Discarding {} bytes for closed {:?}", data.len(), kind);
            return;
        };

        let result = match sink.write_all(data).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            sink_failed(kind, &e);
            *slot = None;
        }
    }

    async fn close(&mut self, kind: StreamKind) {
        if let Some(mut sink) = self.slot(kind).take() {
            if let Err(e) = sink.shutdown().await {
                sink_failed(kind, &e);
            }
        }
    }
}

fn sink_failed(kind: StreamKind, error: &std::io::Error) {
    if error.kind() == std::io::ErrorKind::BrokenPipe {
        debug!("{:?} reader went away, dropping further data", kind);
    } else {
        warn!("Writing {:?} failed, dropping further data: {}", kind, error);
    }
}

/// Read `source` in chunks and send each chunk as a Data message for `kind`
///
/// Chunks are sized to leave room for the tag byte. Exactly one Close message
/// is sent once the source is exhausted; with no source, only the Close is
/// sent. Returns the number of payload bytes sent.
pub async fn pump_outbound<R, S>(
    source: Option<R>,
    sender: &S,
    kind: StreamKind,
) -> Result<u64, ExecError>
where
    R: AsyncRead + Unpin,
    S: TunnelSender + ?Sized,
{
    let mut total_bytes = 0u64;

    if let Some(mut source) = source {
        let chunk_size = sender.max_message_size().saturating_sub(1).max(1);
        let mut buffer = vec![0u8; chunk_size];

        loop {
            let n = source.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            let message = ExecMessage::data(kind, Bytes::copy_from_slice(&buffer[..n]));
            sender.send(message.encode()).await?;
            total_bytes += n as u64;
        }
    }

    debug!("{:?} exhausted after {} bytes, sending close", kind, total_bytes);
    sender.send(ExecMessage::close(kind).encode()).await?;

    Ok(total_bytes)
}

/// Demultiplex tunnel messages onto `sinks`
///
/// Returns `Some(code)` when an exit code arrives and `None` when the tunnel
/// ends without one. Messages that fail to decode are logged and skipped.
pub async fn pump_inbound<R>(
    receiver: &mut R,
    sinks: &mut Sinks<'_>,
) -> Result<Option<i64>, ExecError>
where
    R: TunnelReceiver + ?Sized,
{
    while let Some(raw) = receiver.recv().await? {
        let message = match ExecMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping unparsable exec message: {}", e);
                continue;
            }
        };

        match message {
            ExecMessage::StdoutData(data) => sinks.write(StreamKind::Stdout, &data).await,
            ExecMessage::StderrData(data) => sinks.write(StreamKind::Stderr, &data).await,
            ExecMessage::StdinData(data) => sinks.write(StreamKind::Stdin, &data).await,
            ExecMessage::StdoutClose => sinks.close(StreamKind::Stdout).await,
            ExecMessage::StderrClose => sinks.close(StreamKind::Stderr).await,
            ExecMessage::StdinClose => sinks.close(StreamKind::Stdin).await,
            ExecMessage::ExitCode(code) => {
                debug!("Received exit code {}", code);
                return Ok(Some(code));
            }
        }
    }

    Ok(None)
}
