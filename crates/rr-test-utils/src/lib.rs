// rr-test-utils: Shared test utilities for the relay suite.
//
// Provides a scriptable mock relay and a raw wire client for integration
// testing of the relay and endpoint services, plus throwaway TLS credentials
// and tracing initialization.

pub mod mock_relay;
pub mod wire_client;

pub use mock_relay::{MockRelay, MockRelaySession};
pub use wire_client::WireClient;

use std::net::TcpListener;
use std::path::Path;

/// Initialize test logging; honors `RUST_LOG`, defaults to `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// An ephemeral port that was free a moment ago.
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local_addr").port()
}

// ---------------------------------------------------------------------------
// Throwaway TLS credentials
// ---------------------------------------------------------------------------

/// A self-signed certificate + key pair in a tempdir, in the layout the
/// relay and endpoint expect (`certificate.pem` / `key.pem`).
pub struct TestTlsCredentials {
    dir: tempfile::TempDir,
    pub hostname: String,
}

impl TestTlsCredentials {
    /// Mint credentials valid for `hostname`.
    pub fn generate(hostname: &str) -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![hostname.to_owned()])
                .expect("generate self-signed certificate");
        let dir = tempfile::tempdir().expect("create tempdir");
        std::fs::write(dir.path().join("certificate.pem"), cert.pem())
            .expect("write certificate.pem");
        std::fs::write(dir.path().join("key.pem"), key_pair.serialize_pem())
            .expect("write key.pem");
        TestTlsCredentials {
            dir,
            hostname: hostname.to_owned(),
        }
    }

    pub fn keys_dir(&self) -> &Path {
        self.dir.path()
    }
}
