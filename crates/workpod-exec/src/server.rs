//! Remote end of an exec session
//!
//! Runs a local child process and speaks the exec protocol to the peer that
//! requested it: StdinData feeds the child's stdin, child stdout and stderr
//! become Data/Close messages and the exit status is sent as ExitCode.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};
use workpod_proto::{ExecMessage, StreamKind};

use crate::pump::{pump_inbound, pump_outbound, Sink, Sinks};
use crate::tunnel::{TunnelReceiver, TunnelSender};
use crate::ExecError;

/// Spawn `command` and serve it over the tunnel until it exits
///
/// Returns the exit code that was sent to the peer. If the peer goes away
/// before the process finishes, the process is killed.
pub async fn serve_process<S, R>(
    sender: &S,
    receiver: &mut R,
    mut command: Command,
) -> Result<i64, ExecError>
where
    S: TunnelSender + ?Sized,
    R: TunnelReceiver + ?Sized,
{
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    info!(pid = ?child.id(), "Serving exec session");

    let mut sinks = Sinks {
        stdin: child_stdin.map(|stdin| Box::new(stdin) as Sink<'static>),
        stdout: None,
        stderr: None,
    };

    let inbound = async {
        loop {
            match pump_inbound(receiver, &mut sinks).await? {
                Some(code) => warn!("Ignoring exit code {} sent by the client", code),
                None => {
                    return Err::<std::process::ExitStatus, ExecError>(ExecError::TunnelClosed)
                }
            }
        }
    };

    let process = async {
        tokio::try_join!(
            pump_outbound(child_stdout, sender, StreamKind::Stdout),
            pump_outbound(child_stderr, sender, StreamKind::Stderr),
        )?;
        Ok::<_, ExecError>(child.wait().await?)
    };

    let status = tokio::select! {
        status = process => status?,
        err = inbound => {
            // kill_on_drop takes care of the child
            return err.map(|_| -1);
        }
    };

    let code = exit_code(status);
    debug!("Process exited with code {}", code);

    sender.send(ExecMessage::ExitCode(code).encode()).await?;
    if let Err(e) = sender.close().await {
        warn!("Failed to close exec tunnel: {}", e);
    }

    Ok(code)
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code as i64,
        (None, Some(signal)) => 128 + signal as i64,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i64 {
    status.code().map(i64::from).unwrap_or(-1)
}
