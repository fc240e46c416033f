//! One relay connection lifetime.
//!
//! # Protocol
//! 1. Connect (TCP or TLS) and wait for the relay's `HELLO`
//! 2. ACK it, reply `HELLO` with the declared group list
//! 3. Replay every still-unacknowledged frame, in stamp order
//! 4. Flush commands stored while disconnected
//! 5. ALIVE loop: user commands go out stamped and tracked; inbound `OBJ`
//!    frames are ACK-ed and delivered; inbound `ACK` frames clear the registry
//!
//! `run_session` returning `Ok(())` means a graceful stop completed inside
//! the session; `Err` means the connection was lost and the caller should
//! reconnect with backoff.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rr_protocol::{
    AckRegistry, Codec, Command, FrameReader, PeerEnvelope, RelayEnvelope, peer_frame, wire,
};

use crate::backoff::Backoff;
use crate::config::{DeserializerMode, EndpointConfig};
use crate::queue::{Delivery, ReceiveQueue};
use crate::worker::{MAX_STOP_ATTEMPTS, StoredCommand, WorkerCommand, WorkerState};

#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionError {
    #[error("I/O: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] rr_protocol::FrameError),
    #[error("protocol: {0}")]
    Protocol(String),
}

/// Drive one connection: handshake, replay, store flush, then the ALIVE loop.
pub(crate) async fn run_session<S, C>(
    mut stream: S,
    cfg: &EndpointConfig,
    state: &mut WorkerState,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    queue: &ReceiveQueue<Delivery<C::Item>>,
    codec: &C,
    backoff: &mut Backoff,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Codec,
{
    let mut reader = FrameReader::new(cfg.header_size, cfg.max_frame_len);
    let mut buf = vec![0u8; cfg.max_buf_len];

    // Wait for the relay's greeting.
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        reader.push(&buf[..n]);
        if wait_hello(&mut stream, &mut reader, cfg, state).await? {
            break;
        }
    }

    // Snapshot the frames needing replay before tracking the fresh HELLO.
    let replay: Vec<Vec<u8>> = state.registry.replay_frames().map(<[u8]>::to_vec).collect();

    let stamp = state.registry.next_stamp();
    let hello = PeerEnvelope::hello(stamp, &cfg.groups)?;
    let frame = peer_frame(&hello, &cfg.password, cfg.header_size)?;
    state.registry.track(stamp, frame.clone());
    stream.write_all(&frame).await?;
    debug!(groups = ?cfg.groups, "handshake complete");
    backoff.reset();

    if !replay.is_empty() {
        info!(frames = replay.len(), "replaying unacknowledged frames");
        for frame in &replay {
            stream.write_all(frame).await?;
        }
    }
    while let Some(stored) = state.store.pop_front() {
        send_command(&mut stream, cfg, &mut state.registry, stored).await?;
    }

    // Frames may already be queued up behind the relay's HELLO.
    process_incoming(&mut stream, &mut reader, cfg, state, queue, codec).await?;

    loop {
        if let Some(attempts) = state.stopping {
            if state.registry.is_empty() {
                info!("all messages acknowledged, closing");
                return Ok(());
            }
            if attempts > MAX_STOP_ATTEMPTS {
                warn!(
                    pending = state.registry.len(),
                    "closing with unacknowledged messages"
                );
                return Ok(());
            }
        }
        tokio::select! {
            biased;
            cmd = commands.recv(), if state.stopping.is_none() => match cmd {
                Some(WorkerCommand::Send { dest, payload }) => {
                    send_command(
                        &mut stream,
                        cfg,
                        &mut state.registry,
                        StoredCommand::Obj { dest, payload },
                    )
                    .await?;
                }
                Some(WorkerCommand::Notify { origins }) => {
                    send_command(
                        &mut stream,
                        cfg,
                        &mut state.registry,
                        StoredCommand::Ntf { origins },
                    )
                    .await?;
                }
                Some(WorkerCommand::Stop) | None => {
                    debug!("stop requested");
                    state.stopping = Some(0);
                }
            },
            () = tokio::time::sleep(Duration::from_secs(1)), if state.stopping.is_some() => {
                if let Some(attempts) = &mut state.stopping {
                    *attempts += 1;
                }
            }
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                reader.push(&buf[..n]);
                process_incoming(&mut stream, &mut reader, cfg, state, queue, codec).await?;
            }
        }
    }
}

/// Drain frames until the relay's HELLO shows up; ACK it and report `true`.
/// Later frames stay buffered in the reader.
async fn wait_hello<S>(
    stream: &mut S,
    reader: &mut FrameReader,
    cfg: &EndpointConfig,
    state: &mut WorkerState,
) -> Result<bool, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(body) = reader.next_frame()? {
        let envelope: RelayEnvelope = wire::from_slice(&body)?;
        match envelope.cmd {
            Command::Hello => {
                let ack = peer_frame(
                    &PeerEnvelope::ack(envelope.stamp),
                    &cfg.password,
                    cfg.header_size,
                )?;
                stream.write_all(&ack).await?;
                return Ok(true);
            }
            Command::Ack => acknowledge(state, envelope.stamp),
            // Commands before the greeting are logged and the connection
            // dropped; the reconnect loop takes it from there.
            cmd => {
                warn!(cmd = cmd.as_str(), "command received during handshake, closing");
                return Err(SessionError::Protocol(format!(
                    "unexpected {} before HELLO",
                    cmd.as_str()
                )));
            }
        }
    }
    Ok(false)
}

/// Handle every complete inbound frame: ACKs clear the registry, OBJ frames
/// are ACK-ed then delivered to the receive queue.
async fn process_incoming<S, C>(
    stream: &mut S,
    reader: &mut FrameReader,
    cfg: &EndpointConfig,
    state: &mut WorkerState,
    queue: &ReceiveQueue<Delivery<C::Item>>,
    codec: &C,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Codec,
{
    while let Some(body) = reader.next_frame()? {
        let envelope: RelayEnvelope = wire::from_slice(&body)?;
        match envelope.cmd {
            Command::Ack => acknowledge(state, envelope.stamp),
            Command::Obj => {
                let ack = peer_frame(
                    &PeerEnvelope::ack(envelope.stamp),
                    &cfg.password,
                    cfg.header_size,
                )?;
                stream.write_all(&ack).await?;
                match envelope.payload {
                    Some(payload) => {
                        deliver(queue, codec, cfg.deserializer_mode, payload.into_vec());
                    }
                    None => warn!("OBJ without payload"),
                }
            }
            cmd => warn!(cmd = cmd.as_str(), "unexpected command from relay"),
        }
    }
    Ok(())
}

fn acknowledge(state: &mut WorkerState, stamp: u64) {
    match state.registry.acknowledge(stamp) {
        Some(pending) => debug!(
            stamp,
            elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
            "ACK received"
        ),
        None => warn!(stamp, "ACK for stamp not in pending ACKs"),
    }
}

/// Stamp, track and write an outbound command.
async fn send_command<S>(
    stream: &mut S,
    cfg: &EndpointConfig,
    registry: &mut AckRegistry,
    command: StoredCommand,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stamp = registry.next_stamp();
    let envelope = match command {
        StoredCommand::Obj { dest, payload } => PeerEnvelope::obj(stamp, dest, payload),
        StoredCommand::Ntf { origins } => PeerEnvelope::ntf(stamp, origins),
    };
    let frame = peer_frame(&envelope, &cfg.password, cfg.header_size)?;
    registry.track(stamp, frame.clone());
    stream.write_all(&frame).await?;
    Ok(())
}

fn deliver<C: Codec>(
    queue: &ReceiveQueue<Delivery<C::Item>>,
    codec: &C,
    mode: DeserializerMode,
    payload: Vec<u8>,
) {
    match mode {
        DeserializerMode::Asynchronous => match codec.decode(&payload) {
            Ok(item) => queue.push(Delivery::Decoded(item)),
            Err(e) => warn!(error = %e, "failed to decode payload, dropping"),
        },
        DeserializerMode::Synchronous => queue.push(Delivery::Raw(payload)),
    }
}
