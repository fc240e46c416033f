//! A raw wire-protocol client for poking a relay directly from tests.
//!
//! Speaks the peer side of the protocol over plain TCP: completes the HELLO
//! handshake on connect, tracks its own stamps, and acknowledges received
//! objects. All methods panic on protocol surprises; this is test tooling.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rr_protocol::{
    AckRegistry, Command, DEFAULT_MAX_FRAME_LEN, FrameReader, PeerEnvelope, RelayEnvelope,
    peer_frame, wire,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WireClient {
    stream: TcpStream,
    reader: FrameReader,
    registry: AckRegistry,
    password: String,
    header_size: usize,
    /// Envelopes read while looking for something else.
    inbox: VecDeque<RelayEnvelope>,
}

impl WireClient {
    /// Connect and complete the handshake: receive the relay's HELLO, ACK
    /// it, and declare `groups`. Does not wait for admission; a rejected
    /// client observes the closure via [`WireClient::expect_closed`].
    pub async fn connect(addr: SocketAddr, password: &str, groups: &[&str]) -> Self {
        let mut client = WireClient::connect_raw(addr, password).await;
        let envelope = client.recv().await;
        assert_eq!(envelope.cmd, Command::Hello, "expected relay HELLO first");
        client.send_ack(envelope.stamp).await;

        let declared: Vec<String> = groups.iter().map(|g| (*g).to_owned()).collect();
        let stamp = client.registry.next_stamp();
        let hello = PeerEnvelope::hello(stamp, &declared).expect("encode HELLO");
        let frame =
            peer_frame(&hello, &client.password, client.header_size).expect("frame HELLO");
        client.registry.track(stamp, frame.clone());
        let _ = client.stream.write_all(&frame).await;
        client
    }

    /// Connect without performing any handshake.
    pub async fn connect_raw(addr: SocketAddr, password: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to relay");
        WireClient {
            stream,
            reader: FrameReader::new(rr_protocol::DEFAULT_HEADER_SIZE, DEFAULT_MAX_FRAME_LEN),
            registry: AckRegistry::new(),
            password: password.to_owned(),
            header_size: rr_protocol::DEFAULT_HEADER_SIZE,
            inbox: VecDeque::new(),
        }
    }

    /// The next envelope from the relay, inbox first.
    pub async fn recv(&mut self) -> RelayEnvelope {
        if let Some(envelope) = self.inbox.pop_front() {
            return envelope;
        }
        self.recv_from_socket()
            .await
            .expect("connection closed while waiting for a frame")
    }

    async fn recv_from_socket(&mut self) -> Option<RelayEnvelope> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(body) = self.reader.next_frame().expect("valid frame") {
                return Some(wire::from_slice(&body).expect("valid envelope"));
            }
            let read = tokio::time::timeout(RECV_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a frame");
            match read {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.reader.push(&buf[..n]),
            }
        }
    }

    /// The next OBJ payload; interleaved ACKs clear the local registry, and
    /// the object is acknowledged before being returned.
    pub async fn next_obj(&mut self) -> Vec<u8> {
        loop {
            let envelope = self.recv().await;
            match envelope.cmd {
                Command::Ack => {
                    let _ = self.registry.acknowledge(envelope.stamp);
                }
                Command::Obj => {
                    self.send_ack(envelope.stamp).await;
                    return envelope.payload.expect("OBJ payload").into_vec();
                }
                other => panic!("unexpected {other:?} while waiting for OBJ"),
            }
        }
    }

    /// Read for `window`, clearing ACKs; panics if an OBJ shows up.
    pub async fn expect_no_obj(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            let mut buf = [0u8; 4096];
            if let Some(body) = self.reader.next_frame().expect("valid frame") {
                let envelope: RelayEnvelope = wire::from_slice(&body).expect("valid envelope");
                match envelope.cmd {
                    Command::Ack => {
                        let _ = self.registry.acknowledge(envelope.stamp);
                    }
                    other => panic!("expected silence, got {other:?}"),
                }
                continue;
            }
            match tokio::time::timeout(remaining, self.stream.read(&mut buf)).await {
                Err(_) => return,
                Ok(Ok(0)) | Ok(Err(_)) => return,
                Ok(Ok(n)) => self.reader.push(&buf[..n]),
            }
        }
    }

    /// Read until the relay closes the connection, clearing ACKs on the way.
    pub async fn expect_closed(&mut self) {
        while let Some(envelope) = self.recv_from_socket().await {
            if envelope.cmd == Command::Ack {
                let _ = self.registry.acknowledge(envelope.stamp);
            }
        }
    }

    /// Keep reading until the line goes quiet, clearing ACKs; OBJ frames are
    /// parked in the inbox for a later [`WireClient::next_obj`].
    pub async fn drain_acks(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(body) = self.reader.next_frame().expect("valid frame") {
                let envelope: RelayEnvelope = wire::from_slice(&body).expect("valid envelope");
                if envelope.cmd == Command::Ack {
                    let _ = self.registry.acknowledge(envelope.stamp);
                } else {
                    self.inbox.push_back(envelope);
                }
                continue;
            }
            match tokio::time::timeout(Duration::from_millis(200), self.stream.read(&mut buf))
                .await
            {
                Err(_) => return,
                Ok(Ok(0)) | Ok(Err(_)) => return,
                Ok(Ok(n)) => self.reader.push(&buf[..n]),
            }
        }
    }

    /// Send an OBJ with the given destination counts; returns its stamp.
    pub async fn send_obj(&mut self, dest: &[(&str, i64)], payload: Vec<u8>) -> u64 {
        let dest: BTreeMap<String, i64> = dest
            .iter()
            .map(|(group, count)| ((*group).to_owned(), *count))
            .collect();
        let stamp = self.registry.next_stamp();
        let envelope = PeerEnvelope::obj(stamp, dest, payload);
        self.send_envelope(&envelope).await;
        stamp
    }

    /// Send an NTF with the given origin counts; returns its stamp.
    pub async fn send_ntf(&mut self, origins: &[(&str, i64)]) -> u64 {
        let origins: BTreeMap<String, i64> = origins
            .iter()
            .map(|(group, count)| ((*group).to_owned(), *count))
            .collect();
        let stamp = self.registry.next_stamp();
        let envelope = PeerEnvelope::ntf(stamp, origins);
        self.send_envelope(&envelope).await;
        stamp
    }

    pub async fn send_ack(&mut self, stamp: u64) {
        let frame = peer_frame(&PeerEnvelope::ack(stamp), &self.password, self.header_size)
            .expect("frame ACK");
        let _ = self.stream.write_all(&frame).await;
    }

    /// Write arbitrary bytes, for malformed-input tests.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes).await;
    }

    pub fn pending_acks(&self) -> usize {
        self.registry.len()
    }

    async fn send_envelope(&mut self, envelope: &PeerEnvelope) {
        let frame =
            peer_frame(envelope, &self.password, self.header_size).expect("frame envelope");
        self.registry.track(envelope.stamp, frame.clone());
        let _ = self.stream.write_all(&frame).await;
    }
}
