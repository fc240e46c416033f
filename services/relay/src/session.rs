//! Per-connection session handling.
//!
//! One task per accepted transport drives both directions: frames from the
//! router's writer channel go out, socket bytes come in through a
//! password-verifying [`FrameReader`]. The session owns the connection state
//! machine:
//!
//! ```text
//! HANDSHAKE --(HELLO accepted)--> ALIVE --> DEAD
//!      \--(bad password / bad header / bad command / error)--> KILLED
//! ```
//!
//! A KILLED session is aborted on the spot; the failure never propagates
//! beyond this task, so one misbehaving peer cannot take the relay down.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use rr_protocol::{Command, FrameReader, PeerEnvelope, RelayEnvelope, decode_groups, relay_frame, wire};

use crate::router::{RouterMsg, WriterCmd};

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

/// Immutable per-relay parameters shared by every session.
#[derive(Debug)]
pub(crate) struct SessionContext {
    pub password: String,
    pub header_size: usize,
    pub max_frame_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Handshake,
    Alive,
}

/// Why the session ended; KILLED aborts, everything else closes cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Relay shutdown or router-initiated close.
    Closed,
    /// Transport EOF or I/O error.
    Dead,
    /// Protocol violation; connection aborted.
    Killed,
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

/// Drive one connection until it dies, killing it on protocol violations.
pub(crate) async fn run_session<S>(
    conn: u64,
    mut stream: S,
    ctx: Arc<SessionContext>,
    router: mpsc::Sender<RouterMsg>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
    if router
        .send(RouterMsg::Connected {
            conn,
            writer: writer_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let mut state = SessionState::Handshake;
    let mut reader =
        FrameReader::with_password(ctx.header_size, ctx.max_frame_len, &ctx.password);
    let mut buf = vec![0u8; 4096];

    let end = loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break SessionEnd::Closed;
                }
            }
            cmd = writer_rx.recv() => match cmd {
                Some(WriterCmd::Frame(bytes)) => {
                    if stream.write_all(&bytes).await.is_err() {
                        break SessionEnd::Dead;
                    }
                }
                Some(WriterCmd::Close) | None => break SessionEnd::Closed,
            },
            read = stream.read(&mut buf) => match read {
                Ok(0) => break SessionEnd::Dead,
                Ok(n) => {
                    reader.push(&buf[..n]);
                    match process_frames(conn, &mut stream, &mut reader, &mut state, &ctx, &router)
                        .await
                    {
                        None => {}
                        Some(end) => break end,
                    }
                }
                Err(e) => {
                    debug!(conn, error = %e, "read failed");
                    break SessionEnd::Dead;
                }
            },
        }
    };

    match end {
        SessionEnd::Killed => warn!(conn, "connection killed"),
        SessionEnd::Dead => info!(conn, "connection lost"),
        SessionEnd::Closed => info!(conn, "connection closed"),
    }
    let _ = router.send(RouterMsg::Disconnected { conn }).await;
}

/// Drain every complete frame out of the reader. Returns `Some(end)` when the
/// connection must terminate.
async fn process_frames<S>(
    conn: u64,
    stream: &mut S,
    reader: &mut FrameReader,
    state: &mut SessionState,
    ctx: &SessionContext,
    router: &mpsc::Sender<RouterMsg>,
) -> Option<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let body = match reader.next_frame() {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                warn!(conn, error = %e, "invalid frame, killing connection");
                return Some(SessionEnd::Killed);
            }
        };
        let envelope: PeerEnvelope = match wire::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(conn, error = %e, "undecodable envelope, killing connection");
                return Some(SessionEnd::Killed);
            }
        };

        if envelope.cmd == Command::Ack {
            let _ = router
                .send(RouterMsg::Ack {
                    stamp: envelope.stamp,
                })
                .await;
            continue;
        }

        // Acknowledge every other command before it is processed.
        let ack = match relay_frame(&RelayEnvelope::ack(envelope.stamp), ctx.header_size) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(conn, error = %e, "failed to frame ACK");
                return Some(SessionEnd::Killed);
            }
        };
        if stream.write_all(&ack).await.is_err() {
            return Some(SessionEnd::Dead);
        }

        match (envelope.cmd, *state) {
            (Command::Hello, SessionState::Handshake) => {
                let groups = match envelope.payload_bytes() {
                    Some(bytes) => match decode_groups(bytes) {
                        Ok(groups) => groups,
                        Err(e) => {
                            warn!(conn, error = %e, "undecodable group list, killing connection");
                            return Some(SessionEnd::Killed);
                        }
                    },
                    None => Vec::new(),
                };
                let (accepted_tx, accepted_rx) = oneshot::channel();
                if router
                    .send(RouterMsg::Hello {
                        conn,
                        groups,
                        accepted: accepted_tx,
                    })
                    .await
                    .is_err()
                {
                    return Some(SessionEnd::Closed);
                }
                match accepted_rx.await {
                    Ok(true) => *state = SessionState::Alive,
                    Ok(false) | Err(_) => {
                        info!(conn, "handshake rejected");
                        return Some(SessionEnd::Closed);
                    }
                }
            }
            (Command::Obj, SessionState::Alive) => {
                let (Some(dest), Some(payload)) = (envelope.dest, envelope.payload) else {
                    warn!(conn, "OBJ without destination or payload, killing connection");
                    return Some(SessionEnd::Killed);
                };
                let _ = router
                    .send(RouterMsg::Obj {
                        conn,
                        dest,
                        payload: payload.into_vec(),
                    })
                    .await;
            }
            (Command::Ntf, SessionState::Alive) => {
                let Some(origins) = envelope.dest else {
                    warn!(conn, "NTF without origins, killing connection");
                    return Some(SessionEnd::Killed);
                };
                let _ = router.send(RouterMsg::Ntf { conn, origins }).await;
            }
            // Any other command while alive is a protocol violation.
            (cmd, SessionState::Alive) => {
                warn!(conn, cmd = cmd.as_str(), "invalid command, killing connection");
                return Some(SessionEnd::Killed);
            }
            // Commands before the handshake completes are logged and dropped.
            (cmd, SessionState::Handshake) => {
                warn!(conn, cmd = cmd.as_str(), "command in bad state, closing");
                return Some(SessionEnd::Closed);
            }
        }
    }
}
