//! Relay restart: endpoints reconnect with backoff, replay unacknowledged
//! frames, and flush commands stored while the relay was down.
//!
//! Harness helpers are duplicated across the integration files to keep each
//! one self-contained and independently runnable.

use std::collections::BTreeMap;
use std::time::Duration;

use rusty_relay::{Endpoint, EndpointConfig, JsonCodec, Relay, RelayConfig, Security};

fn start_relay_on(port: u16) -> Relay {
    rr_test_utils::init_tracing();
    let mut config = RelayConfig::new(port, "it-pw");
    config.bind = std::net::IpAddr::from([127, 0, 0, 1]);
    config.security = Security::Tcp;
    Relay::start(config).expect("start relay")
}

fn connect(port: u16, groups: &[&str]) -> Endpoint<JsonCodec<String>> {
    let mut config = EndpointConfig::new("127.0.0.1", port, "it-pw");
    config.groups = groups.iter().map(|g| (*g).to_owned()).collect();
    config.security = Security::Tcp;
    config.reconnect.initial_delay = Duration::from_millis(50);
    config.reconnect.max_delay = Duration::from_millis(500);
    config.reconnect.jitter = 0.0;
    Endpoint::connect(config, JsonCodec::new()).expect("connect endpoint")
}

fn settle() {
    std::thread::sleep(Duration::from_millis(300));
}

/// Test: a produce issued while the relay is down is stored, replayed after
/// the restart, and consumed by a peer that also reconnected.
#[test]
fn produce_while_down_survives_restart() {
    let port = rr_test_utils::unused_port();
    let relay = start_relay_on(port);
    let a = connect(port, &["g1"]);
    let b = connect(port, &["g1"]);
    settle();

    relay.stop();

    // Issued into the void: lands in the offline store.
    a.produce(&"q".to_owned(), "g1").expect("produce offline");
    settle();

    let relay = start_relay_on(port);
    // Both endpoints reconnect and re-handshake on their own.
    b.notify(BTreeMap::from([("g1".to_owned(), 1i64)]))
        .expect("notify");

    assert_eq!(b.pop(1, true).expect("pop"), vec!["q".to_owned()]);

    a.stop();
    b.stop();
    relay.stop();
}

/// Test: after a restart both endpoints re-handshake on their own and a
/// fresh broadcast flows end to end again.
#[test]
fn endpoints_recover_after_restart() {
    let port = rr_test_utils::unused_port();
    let relay = start_relay_on(port);
    let a = connect(port, &["g1"]);
    let b = connect(port, &["g1"]);
    settle();

    a.broadcast(&"before".to_owned(), "g1").expect("broadcast");
    assert_eq!(b.pop(1, true).expect("pop"), vec!["before".to_owned()]);

    relay.stop();
    settle();
    let relay = start_relay_on(port);
    // Give the backoff a chance to land the reconnects.
    settle();
    settle();

    a.broadcast(&"after".to_owned(), "g1").expect("broadcast");
    assert_eq!(b.pop(1, true).expect("pop"), vec!["after".to_owned()]);

    a.stop();
    b.stop();
    relay.stop();
}
