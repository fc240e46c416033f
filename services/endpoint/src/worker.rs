//! The endpoint network worker.
//!
//! One task owns the relay connection for the whole endpoint lifetime:
//! it reconnects forever with jittered exponential backoff, carries the
//! acknowledgement registry and the offline store across connection
//! lifetimes, and honors the bounded graceful stop (unacknowledged frames
//! get [`MAX_STOP_ATTEMPTS`] one-second grace periods, then the connection
//! closes regardless).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use rr_protocol::{AckRegistry, Codec};

use crate::backoff::Backoff;
use crate::config::EndpointConfig;
use crate::queue::{Delivery, ReceiveQueue};
use crate::uplink::{SessionError, run_session};

/// Grace periods of ~1 s granted to in-flight acknowledgements on stop.
pub(crate) const MAX_STOP_ATTEMPTS: u32 = 10;

/// Commands from the embedder API to the worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Send {
        dest: BTreeMap<String, i64>,
        payload: Vec<u8>,
    },
    Notify {
        origins: BTreeMap<String, i64>,
    },
    Stop,
}

/// An outbound command buffered while disconnected, replayed after the
/// pending-ACK replay once a connection is back.
#[derive(Debug)]
pub(crate) enum StoredCommand {
    Obj {
        dest: BTreeMap<String, i64>,
        payload: Vec<u8>,
    },
    Ntf {
        origins: BTreeMap<String, i64>,
    },
}

/// State that survives connection lifetimes.
pub(crate) struct WorkerState {
    pub registry: AckRegistry,
    pub store: VecDeque<StoredCommand>,
    /// `Some(attempts)` once a stop has been requested.
    pub stopping: Option<u32>,
}

impl WorkerState {
    fn new() -> Self {
        WorkerState {
            registry: AckRegistry::new(),
            store: VecDeque::new(),
            stopping: None,
        }
    }

    fn stop_satisfied(&self) -> bool {
        matches!(
            self.stopping,
            Some(attempts) if self.registry.is_empty() || attempts > MAX_STOP_ATTEMPTS
        )
    }
}

/// The worker main loop. Exits only on a completed stop.
pub(crate) async fn run_worker<C: Codec>(
    cfg: EndpointConfig,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    queue: Arc<ReceiveQueue<Delivery<C::Item>>>,
    codec: Arc<C>,
) {
    let mut state = WorkerState::new();
    let mut backoff = Backoff::new(cfg.reconnect);
    loop {
        if state.stop_satisfied() {
            if !state.registry.is_empty() {
                warn!(
                    pending = state.registry.len(),
                    "closing with unacknowledged messages"
                );
            }
            break;
        }
        match connect_and_run(
            &cfg,
            &tls,
            &mut state,
            &mut commands,
            &queue,
            codec.as_ref(),
            &mut backoff,
        )
        .await
        {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, "relay connection failed");
                let delay = if state.stopping.is_some() {
                    Duration::from_secs(1)
                } else {
                    backoff.next_delay()
                };
                debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
                wait_reconnect(delay, &mut commands, &mut state).await;
                if let Some(attempts) = &mut state.stopping {
                    *attempts += 1;
                }
            }
        }
    }
    queue.close();
    info!("endpoint network worker stopped");
}

async fn connect_and_run<C: Codec>(
    cfg: &EndpointConfig,
    tls: &Option<(TlsConnector, ServerName<'static>)>,
    state: &mut WorkerState,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    queue: &ReceiveQueue<Delivery<C::Item>>,
    codec: &C,
    backoff: &mut Backoff,
) -> Result<(), SessionError> {
    let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
    match tls {
        None => {
            info!(host = %cfg.host, port = cfg.port, "connected to relay");
            run_session(tcp, cfg, state, commands, queue, codec, backoff).await
        }
        Some((connector, name)) => {
            let stream = connector.connect(name.clone(), tcp).await?;
            info!(host = %cfg.host, port = cfg.port, "connected to relay over TLS");
            run_session(stream, cfg, state, commands, queue, codec, backoff).await
        }
    }
}

/// Sleep out the backoff delay while still collecting user commands into the
/// offline store (and noticing a stop request).
async fn wait_reconnect(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    state: &mut WorkerState,
) {
    if state.stopping.is_some() {
        tokio::time::sleep(delay).await;
        return;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return,
            cmd = commands.recv() => match cmd {
                Some(WorkerCommand::Send { dest, payload }) => {
                    warn!("not connected to the relay, storing message");
                    state.store.push_back(StoredCommand::Obj { dest, payload });
                }
                Some(WorkerCommand::Notify { origins }) => {
                    warn!("not connected to the relay, storing message");
                    state.store.push_back(StoredCommand::Ntf { origins });
                }
                Some(WorkerCommand::Stop) | None => {
                    state.stopping = Some(0);
                    return;
                }
            },
        }
    }
}
