//! End-to-end tests with an open group policy: broadcast fan-out, FIFO
//! produce/consume, mixed destinations, and the broadcast-overwrite law.
//!
//! Harness helpers are duplicated across the integration files to keep each
//! one self-contained and independently runnable.

use std::collections::BTreeMap;
use std::time::Duration;

use rusty_relay::{Endpoint, EndpointConfig, JsonCodec, Relay, RelayConfig, Security};

fn start_relay() -> Relay {
    rr_test_utils::init_tracing();
    let mut config = RelayConfig::new(0, "it-pw");
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

/// Let in-flight handshakes and deliveries land.
fn settle() {
    std::thread::sleep(Duration::from_millis(300));
}

fn counts(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
    entries
        .iter()
        .map(|(group, count)| ((*group).to_owned(), *count))
        .collect()
}

/// Collect with `receive_all(blocking)` until `n` items have arrived.
fn collect_n(ep: &Endpoint<JsonCodec<String>>, n: usize) -> Vec<String> {
    let mut items = Vec::new();
    while items.len() < n {
        items.extend(ep.receive_all(true).expect("receive_all"));
    }
    items
}

// ---------------------------------------------------------------------------
// Scenario: broadcast reaches members, and only members
// ---------------------------------------------------------------------------

/// Test: A broadcasts into g1; B (in g1) sees it, C (in g3) does not.
#[test]
fn broadcast_reaches_members_only() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1", "g2"]);
    let c = connect(relay.port(), &["g3"]);
    settle();

    a.broadcast(&"x".to_owned(), "g1").expect("broadcast");

    assert_eq!(b.pop(1, true).expect("pop"), vec!["x".to_owned()]);
    settle();
    assert!(c.pop(1, false).expect("pop").is_empty());

    a.stop();
    b.stop();
    c.stop();
    relay.stop();
}

// ---------------------------------------------------------------------------
// Scenario: single-producer FIFO
// ---------------------------------------------------------------------------

/// Test: ten produces from one producer come out of one consumer in order.
#[test]
fn produce_consume_is_fifo() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1"]);
    settle();

    for i in 0..10 {
        a.produce(&i.to_string(), "g1").expect("produce");
    }
    b.notify(counts(&[("g1", 10)])).expect("notify");

    let items = b.pop(10, true).expect("pop");
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(items, expected);

    a.stop();
    b.stop();
    relay.stop();
}

// ---------------------------------------------------------------------------
// Scenario: mixed produce + broadcast across two groups
// ---------------------------------------------------------------------------

/// Test: one produce and one broadcast into each of two groups yield the
/// multiset {y, y, z, z} at a member of both.
#[test]
fn mixed_produce_and_broadcast() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1", "g2"]);
    settle();

    a.send_object(&"y".to_owned(), counts(&[("g1", 1), ("g2", 1)]))
        .expect("produce both");
    a.send_object(&"z".to_owned(), counts(&[("g1", -1), ("g2", -1)]))
        .expect("broadcast both");

    // A notify can race the produces, so re-notify until everything arrives.
    let mut items = Vec::new();
    while items.len() < 4 {
        b.notify(counts(&[("g1", -1), ("g2", -1)])).expect("notify");
        items.extend(b.receive_all(true).expect("receive_all"));
    }
    items.sort();
    assert_eq!(
        items,
        vec!["y".to_owned(), "y".to_owned(), "z".to_owned(), "z".to_owned()]
    );

    a.stop();
    b.stop();
    relay.stop();
}

// ---------------------------------------------------------------------------
// Laws
// ---------------------------------------------------------------------------

/// Test: two successive broadcasts followed by a fresh join deliver only the
/// second to the joiner, exactly once.
#[test]
fn broadcast_overwrite_for_late_joiner() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    settle();

    a.broadcast(&"p1".to_owned(), "g1").expect("broadcast p1");
    a.broadcast(&"p2".to_owned(), "g1").expect("broadcast p2");
    settle();

    let d = connect(relay.port(), &["g1"]);
    assert_eq!(d.pop(1, true).expect("pop"), vec!["p2".to_owned()]);
    settle();
    assert!(d.receive_all(false).expect("receive_all").is_empty());

    a.stop();
    d.stop();
    relay.stop();
}

/// Test: bare-name notify asks for one consumable; the rest stay queued.
#[test]
fn bare_name_notify_takes_one() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1"]);
    settle();

    for text in ["first", "second", "third"] {
        a.produce(&text.to_owned(), "g1").expect("produce");
    }
    b.notify("g1").expect("notify one");
    assert_eq!(b.pop(1, true).expect("pop"), vec!["first".to_owned()]);

    // The remaining two are still queued for whoever asks.
    b.notify(counts(&[("g1", -1)])).expect("notify all");
    let rest = collect_n(&b, 2);
    assert_eq!(rest, vec!["second".to_owned(), "third".to_owned()]);

    a.stop();
    b.stop();
    relay.stop();
}

/// Test: `get_last` returns the newest payloads and leaves older ones.
#[test]
fn get_last_returns_newest() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1"]);
    settle();

    a.broadcast(&"old".to_owned(), "g1").expect("broadcast");
    a.broadcast(&"new".to_owned(), "g1").expect("broadcast");
    // Both travel the same ordered connection; give them time to land.
    settle();

    assert_eq!(b.get_last(1, false).expect("get_last"), vec!["new".to_owned()]);
    // The older broadcast stays buffered.
    assert_eq!(
        b.receive_all(false).expect("receive_all"),
        vec!["old".to_owned()]
    );

    a.stop();
    b.stop();
    relay.stop();
}
