//! endpoint: the peer-side client of the relay.
//!
//! [`Endpoint::connect`] spawns a background tokio runtime running the
//! reconnecting network worker and returns a synchronous, thread-safe handle.
//! Payloads go out through a pluggable [`Codec`]; received payloads land in a
//! receive queue drained with [`Endpoint::receive_all`], [`Endpoint::pop`]
//! and [`Endpoint::get_last`].
//!
//! ```no_run
//! use endpoint::{Endpoint, EndpointConfig};
//! use rr_protocol::{JsonCodec, Security};
//!
//! let mut config = EndpointConfig::new("127.0.0.1", 2098, "changeme");
//! config.groups = vec!["workers".to_owned()];
//! config.security = Security::Tcp;
//! let ep: Endpoint<JsonCodec<String>> =
//!     Endpoint::connect(config, JsonCodec::new()).unwrap();
//! ep.produce(&"job".to_owned(), "workers").unwrap();
//! ep.notify("workers").unwrap();
//! let jobs = ep.pop(1, true).unwrap();
//! ep.stop();
//! # drop(jobs);
//! ```

mod backoff;
pub mod config;
mod destination;
mod queue;
mod tls;
mod uplink;
mod worker;

pub use config::{DeserializerMode, EndpointConfig, ReconnectConfig, default_keys_dir};
pub use destination::Destination;
pub use rr_protocol::{BytesCodec, Codec, CodecError, JsonCodec, Security};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::queue::{Delivery, QueueClosed, ReceiveQueue};
use crate::worker::{WorkerCommand, run_worker};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Rejected synchronously at the API boundary, before any I/O.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The endpoint has stopped and nothing is left to drain.
    #[error("endpoint is stopped")]
    Stopped,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS credentials at {path}: {message}")]
    Credentials { path: PathBuf, message: String },
    #[error("TLS: {0}")]
    Tls(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl From<QueueClosed> for EndpointError {
    fn from(_: QueueClosed) -> Self {
        EndpointError::Stopped
    }
}

// ---------------------------------------------------------------------------
// Endpoint handle
// ---------------------------------------------------------------------------

/// Handle to a running endpoint. All methods may be called from arbitrary
/// threads; they are serialized by the command channel and the receive
/// queue's own synchronization.
pub struct Endpoint<C: Codec> {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    queue: Arc<ReceiveQueue<Delivery<C::Item>>>,
    codec: Arc<C>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl<C: Codec> Endpoint<C> {
    /// Validate the config, set up TLS, and spawn the network worker.
    ///
    /// Returns as soon as the worker is running; the first connection attempt
    /// happens in the background, and commands issued before it completes are
    /// buffered and replayed.
    pub fn connect(config: EndpointConfig, codec: C) -> Result<Self, EndpointError> {
        config.validate()?;
        let tls = match config.security {
            Security::Tcp => None,
            Security::Tls => {
                let keys_dir = config
                    .keys_dir
                    .clone()
                    .or_else(config::default_keys_dir)
                    .ok_or_else(|| {
                        EndpointError::Config(
                            "no keys_dir configured and no platform default".to_owned(),
                        )
                    })?;
                Some(tls::build_connector(&keys_dir, &config.hostname)?)
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(ReceiveQueue::new());
        let codec = Arc::new(codec);
        let worker_queue = queue.clone();
        let worker_codec = codec.clone();
        let thread = std::thread::Builder::new()
            .name("endpoint".to_owned())
            .spawn(move || {
                match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(run_worker(
                        config,
                        tls,
                        command_rx,
                        worker_queue,
                        worker_codec,
                    )),
                    Err(e) => {
                        error!(error = %e, "failed to build endpoint runtime");
                        worker_queue.close();
                    }
                }
            })?;

        Ok(Endpoint {
            commands: command_tx,
            queue,
            codec,
            thread: Some(thread),
        })
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Route a payload per `destination`: bare group names broadcast; in a
    /// counts map, negative counts broadcast and positive counts enqueue that
    /// many consumables.
    pub fn send_object(
        &self,
        object: &C::Item,
        destination: impl Into<Destination>,
    ) -> Result<(), EndpointError> {
        let dest = destination.into().into_counts(-1)?;
        let payload = self.codec.encode(object)?;
        self.commands
            .send(WorkerCommand::Send { dest, payload })
            .map_err(|_| EndpointError::Stopped)
    }

    /// Queue one consumable in `group`: `send_object` with `{group: 1}`.
    pub fn produce(&self, object: &C::Item, group: &str) -> Result<(), EndpointError> {
        self.send_object(object, BTreeMap::from([(group.to_owned(), 1)]))
    }

    /// Broadcast to `group`: `send_object` with `{group: -1}`.
    pub fn broadcast(&self, object: &C::Item, group: &str) -> Result<(), EndpointError> {
        self.send_object(object, BTreeMap::from([(group.to_owned(), -1)]))
    }

    /// Declare readiness to consume. Bare group names ask for one consumable
    /// each; in a counts map, a negative count drains the whole queue.
    pub fn notify(&self, origins: impl Into<Destination>) -> Result<(), EndpointError> {
        let origins = origins.into().into_counts(1)?;
        self.commands
            .send(WorkerCommand::Notify { origins })
            .map_err(|_| EndpointError::Stopped)
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// All received payloads, oldest to newest. `blocking` waits until at
    /// least one is available.
    pub fn receive_all(&self, blocking: bool) -> Result<Vec<C::Item>, EndpointError> {
        let deliveries = self.queue.receive_all(blocking)?;
        self.decode_batch(deliveries)
    }

    /// Up to `max_items` oldest payloads. `blocking` waits until exactly
    /// `max_items` have been received.
    pub fn pop(&self, max_items: usize, blocking: bool) -> Result<Vec<C::Item>, EndpointError> {
        let deliveries = self.queue.pop(max_items, blocking)?;
        self.decode_batch(deliveries)
    }

    /// Up to `max_items` newest payloads, leaving older ones buffered.
    /// `blocking` waits until at least one is available.
    pub fn get_last(
        &self,
        max_items: usize,
        blocking: bool,
    ) -> Result<Vec<C::Item>, EndpointError> {
        let deliveries = self.queue.take_last(max_items, blocking)?;
        self.decode_batch(deliveries)
    }

    fn decode_batch(&self, deliveries: Vec<Delivery<C::Item>>) -> Result<Vec<C::Item>, EndpointError> {
        let mut items = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            match delivery {
                Delivery::Decoded(item) => items.push(item),
                Delivery::Raw(bytes) => items.push(self.codec.decode(&bytes)?),
            }
        }
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Graceful stop: in-flight deliveries get a bounded window to be
    /// acknowledged (about ten seconds), then the connection closes
    /// regardless. Blocks until the worker has exited.
    pub fn stop(mut self) {
        let _ = self.commands.send(WorkerCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
