//! Exec session tests over an in-memory tunnel

use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workpod_exec::memory;
use workpod_exec::{exec, ExecError, ExecOptions, TunnelReceiver, TunnelSender};
use workpod_proto::ExecMessage;

fn fast_options() -> ExecOptions {
    ExecOptions {
        keepalive_interval: Duration::from_millis(20),
        ping_timeout: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_stdout_then_exit_code_zero() {
    let ((client_tx, mut client_rx), (remote_tx, mut remote_rx)) = memory::pair(1024);

    remote_tx
        .send(ExecMessage::StdoutData(Bytes::from_static(b"hello")).encode())
        .await
        .unwrap();
    remote_tx.send(ExecMessage::StdoutClose.encode()).await.unwrap();
    remote_tx.send(ExecMessage::ExitCode(0).encode()).await.unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = exec(
        &client_tx,
        &mut client_rx,
        None::<&[u8]>,
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(code, 0);
    assert_eq!(stdout, b"hello");
    assert!(stderr.is_empty());

    // Without local stdin the remote side sees at most a bare close before the closing frame
    while let Some(raw) = remote_rx.recv().await.unwrap() {
        assert_eq!(ExecMessage::decode(raw).unwrap(), ExecMessage::StdinClose);
    }
}

#[tokio::test]
async fn test_non_zero_exit_code_is_not_an_error() {
    let ((client_tx, mut client_rx), (remote_tx, _remote_rx)) = memory::pair(1024);

    remote_tx
        .send(ExecMessage::StderrData(Bytes::from_static(b"boom")).encode())
        .await
        .unwrap();
    remote_tx.send(ExecMessage::ExitCode(42).encode()).await.unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = exec(
        &client_tx,
        &mut client_rx,
        None::<&[u8]>,
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(code, 42);
    assert_eq!(stderr, b"boom");
}

#[tokio::test]
async fn test_stdin_is_forwarded_in_chunks() {
    let ((client_tx, mut client_rx), (remote_tx, mut remote_rx)) = memory::pair(5);

    let remote = tokio::spawn(async move {
        let mut received = Vec::new();
        loop {
            let raw = remote_rx.recv().await.unwrap().unwrap();
            match ExecMessage::decode(raw).unwrap() {
                ExecMessage::StdinData(data) => {
                    assert!(data.len() <= 4);
                    received.extend_from_slice(&data);
                }
                ExecMessage::StdinClose => break,
                other => panic!("unexpected message {:?}", other),
            }
        }
        remote_tx.send(ExecMessage::ExitCode(0).encode()).await.unwrap();
        received
    });

    let stdin: &[u8] = b"0123456789";
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = exec(
        &client_tx,
        &mut client_rx,
        Some(stdin),
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(code, 0);
    assert_eq!(remote.await.unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_tunnel_close_without_exit_code_is_an_error() {
    let ((client_tx, mut client_rx), (remote_tx, _remote_rx)) = memory::pair(1024);

    remote_tx
        .send(ExecMessage::StdoutData(Bytes::from_static(b"partial")).encode())
        .await
        .unwrap();
    remote_tx.send(ExecMessage::StdoutClose.encode()).await.unwrap();
    remote_tx.close().await.unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = exec(
        &client_tx,
        &mut client_rx,
        None::<&[u8]>,
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(ExecError::MissingExitCode)));
    assert_eq!(stdout, b"partial");
}

#[tokio::test]
async fn test_failed_keepalive_ends_session() {
    let ((client_tx, mut client_rx), (remote_tx, remote_rx)) = memory::pair(1024);

    // Keep stdin open and idle so the outbound pump stays blocked
    let (stdin, _stdin_writer) = tokio::io::duplex(64);

    // The remote stops reading; the remote sender stays alive so reads block
    drop(remote_rx);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        exec(
            &client_tx,
            &mut client_rx,
            Some(stdin),
            &mut stdout,
            &mut stderr,
            &fast_options(),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("session should end once pings fail");

    assert!(matches!(result, Err(ExecError::TransportDead(_))));
    drop(remote_tx);
}

#[tokio::test]
async fn test_cancellation_aborts_session() {
    let ((client_tx, mut client_rx), (_remote_tx, _remote_rx)) = memory::pair(1024);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = exec(
        &client_tx,
        &mut client_rx,
        None::<&[u8]>,
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &cancel,
    )
    .await;

    assert!(matches!(result, Err(ExecError::Cancelled)));
}

#[tokio::test]
async fn test_exit_code_wins_over_failed_stdin() {
    for _ in 0..50 {
        let ((client_tx, mut client_rx), (remote_tx, remote_rx)) = memory::pair(1024);

        // The remote answers immediately and stops listening
        remote_tx.send(ExecMessage::ExitCode(0).encode()).await.unwrap();
        remote_tx.close().await.unwrap();
        drop(remote_rx);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = exec(
            &client_tx,
            &mut client_rx,
            Some(tokio::io::repeat(b'y')),
            &mut stdout,
            &mut stderr,
            &ExecOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_serve_process_ignoring_stdin_still_reports_exit_code() {
    use tokio::io::AsyncWriteExt;
    use tokio::process::Command;
    use workpod_exec::serve_process;

    let ((client_tx, mut client_rx), (remote_tx, mut remote_rx)) = memory::pair(1024);

    let remote = tokio::spawn(async move {
        let mut command = Command::new("sh");
        command.args(["-c", "exec 0<&-; sleep 0.5; echo done; exit 3"]);
        serve_process(&remote_tx, &mut remote_rx, command).await
    });

    let (stdin, mut typing) = tokio::io::duplex(64);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        typing.write_all(b"typed ahead\n").await.unwrap();
        // Keep stdin open until the session ends
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = exec(
        &client_tx,
        &mut client_rx,
        Some(stdin),
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(code, 3);
    assert_eq!(stdout, b"done\n");
    assert_eq!(remote.await.unwrap().unwrap(), 3);
}

#[cfg(unix)]
#[tokio::test]
async fn test_serve_process_end_to_end() {
    use tokio::process::Command;
    use workpod_exec::serve_process;

    let ((client_tx, mut client_rx), (remote_tx, mut remote_rx)) = memory::pair(1024);

    let remote = tokio::spawn(async move {
        let mut command = Command::new("sh");
        command.args(["-c", "cat; echo oops >&2; exit 3"]);
        serve_process(&remote_tx, &mut remote_rx, command).await
    });

    let stdin: &[u8] = b"ping\n";
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = exec(
        &client_tx,
        &mut client_rx,
        Some(stdin),
        &mut stdout,
        &mut stderr,
        &ExecOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(code, 3);
    assert_eq!(stdout, b"ping\n");
    assert_eq!(stderr, b"oops\n");
    assert_eq!(remote.await.unwrap().unwrap(), 3);
}
