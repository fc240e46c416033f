//! relay: the central routing process.
//!
//! [`Relay::start`] binds the listener and spins up a background tokio
//! runtime: one router task owning all group state, one session task per
//! accepted connection. The embedder keeps a handle for [`Relay::port`] and
//! [`Relay::stop`]; everything else happens over the wire.
//!
//! ```no_run
//! use relay::{Relay, RelayConfig};
//! use rr_protocol::Security;
//!
//! let mut config = RelayConfig::new(2098, "changeme");
//! config.security = Security::Tcp;
//! let relay = Relay::start(config).unwrap();
//! // ... endpoints connect, exchange payloads ...
//! relay.stop();
//! ```

pub mod config;
pub mod router;
mod session;
mod tls;

pub use config::{GroupLimits, GroupPolicy, RelayConfig, default_keys_dir};
pub use rr_protocol::Security;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::router::{Router, RouterMsg, run_router};
use crate::session::{SessionContext, run_session};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS credentials at {path}: {message}")]
    Credentials { path: PathBuf, message: String },
    #[error("TLS: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("relay task exited before startup completed")]
    Startup,
}

// ---------------------------------------------------------------------------
// Relay handle
// ---------------------------------------------------------------------------

/// Handle to a running relay.
///
/// [`Relay::stop`] (and `Drop`) request a graceful shutdown: the runtime
/// thread grants in-flight deliveries a bounded window to be acknowledged,
/// then drops every client connection and exits.
pub struct Relay {
    stop_requested: watch::Sender<bool>,
    port: u16,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Relay {
    /// Bind, start the background runtime, and return once listening.
    pub fn start(config: RelayConfig) -> Result<Relay, RelayError> {
        config.validate()?;
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u16, RelayError>>();
        let (stop_tx, stop_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("relay".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(RelayError::Io(e)));
                        return;
                    }
                };
                runtime.block_on(run_relay(config, stop_rx, ready_tx));
            })?;

        match ready_rx.recv() {
            Ok(Ok(port)) => Ok(Relay {
                stop_requested: stop_tx,
                port,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(RelayError::Startup)
            }
        }
    }

    /// The actual bound port (differs from the configured one when 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request a graceful shutdown and wait for the relay to exit.
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        let _ = self.stop_requested.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown_now();
        }
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

async fn run_relay(
    config: RelayConfig,
    mut stop_requested: watch::Receiver<bool>,
    ready_tx: std::sync::mpsc::Sender<Result<u16, RelayError>>,
) {
    let listener = match TcpListener::bind((config.bind, config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = ready_tx.send(Err(RelayError::Io(e)));
            return;
        }
    };
    let acceptor = match config.security {
        Security::Tcp => {
            info!(port = config.port, "listening on TCP");
            None
        }
        Security::Tls => {
            let keys_dir = match config.keys_dir.clone().or_else(config::default_keys_dir) {
                Some(dir) => dir,
                None => {
                    let _ = ready_tx.send(Err(RelayError::Config(
                        "no keys_dir configured and no platform default".to_owned(),
                    )));
                    return;
                }
            };
            match tls::build_acceptor(&keys_dir) {
                Ok(acceptor) => {
                    info!(port = config.port, keys_dir = %keys_dir.display(), "listening on TLS");
                    Some(acceptor)
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            }
        }
    };

    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            let _ = ready_tx.send(Err(RelayError::Io(e)));
            return;
        }
    };
    let _ = ready_tx.send(Ok(port));

    let (router_tx, router_rx) = mpsc::channel(256);
    let router = Router::new(config.policy.clone(), config.header_size);
    let router_task = tokio::spawn(run_router(router_rx, router));

    // Sessions watch this one; it flips only after the ACK drain.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = Arc::new(SessionContext {
        password: config.password.clone(),
        header_size: config.header_size,
        max_frame_len: config.max_frame_len,
    });

    let mut sessions = JoinSet::new();
    let mut next_conn: u64 = 0;
    loop {
        tokio::select! {
            biased;
            changed = stop_requested.changed() => {
                if changed.is_err() || *stop_requested.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "connected");
                    let conn = next_conn;
                    next_conn += 1;
                    let ctx = ctx.clone();
                    let router_tx = router_tx.clone();
                    let shutdown = shutdown_rx.clone();
                    match &acceptor {
                        Some(acceptor) => {
                            let acceptor = acceptor.clone();
                            sessions.spawn(async move {
                                match acceptor.accept(stream).await {
                                    Ok(stream) => {
                                        run_session(conn, stream, ctx, router_tx, shutdown).await;
                                    }
                                    Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                                }
                            });
                        }
                        None => {
                            sessions.spawn(run_session(conn, stream, ctx, router_tx, shutdown));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }

    drop(listener);
    drain_acks(&router_tx).await;
    let _ = shutdown_tx.send(true);
    while sessions.join_next().await.is_some() {}
    drop(router_tx);
    let _ = router_task.await;
    info!("relay stopped");
}

/// Grant in-flight deliveries a bounded window to be acknowledged before the
/// connections get dropped.
async fn drain_acks(router_tx: &mpsc::Sender<RouterMsg>) {
    for attempt in 1..=10u32 {
        let (reply_tx, reply_rx) = oneshot::channel();
        if router_tx
            .send(RouterMsg::PendingAcks { reply: reply_tx })
            .await
            .is_err()
        {
            return;
        }
        match reply_rx.await {
            Ok(0) | Err(_) => return,
            Ok(pending) => {
                info!(attempt, pending, "waiting for acknowledgements before stopping");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    warn!("closing with unacknowledged deliveries");
}
