//! A scriptable mock relay for endpoint tests.
//!
//! Accepts plain TCP connections, performs the relay side of the HELLO
//! handshake, and then lets the test drive everything by hand: receive the
//! peer's frames, acknowledge them (or deliberately not, for replay tests),
//! and push objects down. Panics on protocol surprises; this is test
//! tooling.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rr_protocol::{
    Command, DEFAULT_MAX_FRAME_LEN, FrameReader, PeerEnvelope, RelayEnvelope, decode_groups,
    relay_frame, wire,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockRelay {
    listener: TcpListener,
    password: String,
    header_size: usize,
}

impl MockRelay {
    /// Bind on an ephemeral loopback port.
    pub async fn bind(password: &str, header_size: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock relay");
        MockRelay {
            listener,
            password: password.to_owned(),
            header_size,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("local_addr")
    }

    /// Accept one connection and complete the handshake: greet with HELLO,
    /// collect the peer's ACK and HELLO, acknowledge the latter.
    pub async fn accept(&self) -> MockRelaySession {
        let (stream, _peer) = self.listener.accept().await.expect("accept");
        let mut session = MockRelaySession {
            stream,
            reader: FrameReader::with_password(
                self.header_size,
                DEFAULT_MAX_FRAME_LEN,
                &self.password,
            ),
            header_size: self.header_size,
            next_stamp: 0,
            groups: Vec::new(),
        };

        let greeting = session.next_stamp();
        session.send(&RelayEnvelope::hello(greeting)).await;
        loop {
            let envelope = session.recv().await;
            match envelope.cmd {
                Command::Ack => {
                    assert_eq!(envelope.stamp, greeting, "ACK for an unexpected stamp");
                }
                Command::Hello => {
                    let bytes = envelope.payload_bytes().unwrap_or_default();
                    session.groups = decode_groups(bytes).expect("decode group list");
                    session.ack(envelope.stamp).await;
                    return session;
                }
                other => panic!("unexpected {other:?} during handshake"),
            }
        }
    }
}

pub struct MockRelaySession {
    stream: TcpStream,
    reader: FrameReader,
    header_size: usize,
    next_stamp: u64,
    /// Groups the peer declared at handshake.
    pub groups: Vec<String>,
}

impl MockRelaySession {
    fn next_stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    /// The next peer envelope; panics on timeout or closure.
    pub async fn recv(&mut self) -> PeerEnvelope {
        self.try_recv()
            .await
            .expect("connection closed while waiting for a frame")
    }

    /// The next peer envelope, or `None` once the peer disconnects.
    pub async fn try_recv(&mut self) -> Option<PeerEnvelope> {
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

    /// The next non-ACK envelope, skipping interleaved acknowledgements.
    pub async fn recv_command(&mut self) -> PeerEnvelope {
        loop {
            let envelope = self.recv().await;
            if envelope.cmd != Command::Ack {
                return envelope;
            }
        }
    }

    /// Expect the next envelope to be an ACK for `stamp`.
    pub async fn expect_ack(&mut self, stamp: u64) {
        let envelope = self.recv().await;
        assert_eq!(envelope.cmd, Command::Ack, "expected an ACK");
        assert_eq!(envelope.stamp, stamp, "ACK for an unexpected stamp");
    }

    /// Acknowledge a peer frame.
    pub async fn ack(&mut self, stamp: u64) {
        let envelope = RelayEnvelope::ack(stamp);
        self.send(&envelope).await;
    }

    /// Push an object to the peer; returns the stamp it was sent under.
    pub async fn send_obj(&mut self, payload: Vec<u8>) -> u64 {
        let stamp = self.next_stamp();
        let envelope = RelayEnvelope::obj(stamp, payload);
        self.send(&envelope).await;
        stamp
    }

    async fn send(&mut self, envelope: &RelayEnvelope) {
        let frame = relay_frame(envelope, self.header_size).expect("frame envelope");
        self.stream.write_all(&frame).await.expect("write frame");
    }
}
