//! TLS mode end to end: self-signed server certificate as the endpoint's
//! trust anchor, hostname verification, and password-over-TLS.
//!
//! Harness helpers are duplicated across the integration files to keep each
//! one self-contained and independently runnable.

use std::time::Duration;

use rr_test_utils::TestTlsCredentials;
use rusty_relay::{Endpoint, EndpointConfig, JsonCodec, Relay, RelayConfig};

fn start_tls_relay(creds: &TestTlsCredentials) -> Relay {
    rr_test_utils::init_tracing();
    let mut config = RelayConfig::new(0, "it-pw");
    config.bind = std::net::IpAddr::from([127, 0, 0, 1]);
    config.keys_dir = Some(creds.keys_dir().to_path_buf());
    Relay::start(config).expect("start TLS relay")
}

fn connect_tls(
    port: u16,
    creds: &TestTlsCredentials,
    hostname: &str,
    groups: &[&str],
) -> Endpoint<JsonCodec<String>> {
    let mut config = EndpointConfig::new("127.0.0.1", port, "it-pw");
    config.groups = groups.iter().map(|g| (*g).to_owned()).collect();
    config.keys_dir = Some(creds.keys_dir().to_path_buf());
    config.hostname = hostname.to_owned();
    config.reconnect.initial_delay = Duration::from_millis(50);
    config.reconnect.max_delay = Duration::from_millis(500);
    config.reconnect.jitter = 0.0;
    Endpoint::connect(config, JsonCodec::new()).expect("connect endpoint")
}

fn settle() {
    std::thread::sleep(Duration::from_millis(300));
}

/// Test: broadcast and produce/consume work over TLS with a self-signed
/// certificate as the sole trust anchor.
#[test]
fn payloads_flow_over_tls() {
    let creds = TestTlsCredentials::generate("localhost");
    let relay = start_tls_relay(&creds);
    let a = connect_tls(relay.port(), &creds, "localhost", &["g1"]);
    let b = connect_tls(relay.port(), &creds, "localhost", &["g1"]);
    settle();

    a.broadcast(&"secure".to_owned(), "g1").expect("broadcast");
    assert_eq!(b.pop(1, true).expect("pop"), vec!["secure".to_owned()]);

    a.produce(&"job".to_owned(), "g1").expect("produce");
    b.notify("g1").expect("notify");
    assert_eq!(b.pop(1, true).expect("pop"), vec!["job".to_owned()]);

    a.stop();
    b.stop();
    relay.stop();
}

/// Test: a hostname mismatch fails the TLS handshake, so nothing is ever
/// delivered through that endpoint; a correctly configured peer still works.
#[test]
fn wrong_hostname_never_connects() {
    let creds = TestTlsCredentials::generate("localhost");
    let relay = start_tls_relay(&creds);
    let good = connect_tls(relay.port(), &creds, "localhost", &["g1"]);
    let bad = connect_tls(relay.port(), &creds, "wrong.example", &["g1"]);
    settle();

    bad.broadcast(&"mitm".to_owned(), "g1").expect("queued locally");
    settle();
    assert!(good.pop(1, false).expect("pop").is_empty());

    good.broadcast(&"ok".to_owned(), "g1").expect("broadcast");
    assert_eq!(good.pop(1, true).expect("pop"), vec!["ok".to_owned()]);

    drop(bad);
    good.stop();
    relay.stop();
}

/// Test: an endpoint trusting a different certificate than the relay
/// presents cannot establish a session.
#[test]
fn untrusted_certificate_never_connects() {
    let server_creds = TestTlsCredentials::generate("localhost");
    let other_creds = TestTlsCredentials::generate("localhost");
    let relay = start_tls_relay(&server_creds);
    let good = connect_tls(relay.port(), &server_creds, "localhost", &["g1"]);
    let bad = connect_tls(relay.port(), &other_creds, "localhost", &["g1"]);
    settle();

    bad.produce(&"spoof".to_owned(), "g1").expect("queued locally");
    good.notify("g1").expect("notify");
    settle();
    assert!(good.pop(1, false).expect("pop").is_empty());

    drop(bad);
    good.stop();
    relay.stop();
}
