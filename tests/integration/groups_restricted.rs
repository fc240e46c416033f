//! End-to-end tests with a restricted group policy: member caps, rejected
//! handshakes, and the consumable queue cap.
//!
//! Harness helpers are duplicated across the integration files to keep each
//! one self-contained and independently runnable.

use std::collections::BTreeMap;
use std::time::Duration;

use rusty_relay::{
    Endpoint, EndpointConfig, GroupLimits, GroupPolicy, JsonCodec, Relay, RelayConfig, Security,
};

fn start_relay(policy: GroupPolicy) -> Relay {
    rr_test_utils::init_tracing();
    let mut config = RelayConfig::new(0, "it-pw");
    config.bind = std::net::IpAddr::from([127, 0, 0, 1]);
    config.security = Security::Tcp;
    config.policy = policy;
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

fn counts(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
    entries
        .iter()
        .map(|(group, count)| ((*group).to_owned(), *count))
        .collect()
}

/// Test: with `max_count = 2`, the third joiner is rejected and its sends
/// reach nobody; the two admitted members keep working.
#[test]
fn third_member_is_rejected() {
    let policy = GroupPolicy::restricted().accept(
        "g1",
        GroupLimits {
            max_count: Some(2),
            max_consumables: Some(2),
        },
    );
    let relay = start_relay(policy);
    let first = connect(relay.port(), &["g1"]);
    let second = connect(relay.port(), &["g1"]);
    settle();
    let third = connect(relay.port(), &["g1"]);
    settle();

    // The rejected endpoint's broadcast must be observed by nobody.
    third.broadcast(&"intruder".to_owned(), "g1").expect("queued locally");
    settle();
    assert!(first.pop(1, false).expect("pop").is_empty());
    assert!(second.pop(1, false).expect("pop").is_empty());

    // The admitted pair still exchanges payloads.
    first.broadcast(&"fine".to_owned(), "g1").expect("broadcast");
    assert_eq!(second.pop(1, true).expect("pop"), vec!["fine".to_owned()]);

    drop(third);
    first.stop();
    second.stop();
    relay.stop();
}

/// Test: an endpoint declaring an unlisted group never gets admitted, so its
/// produces are not routed.
#[test]
fn unlisted_group_is_rejected_at_handshake() {
    let policy = GroupPolicy::restricted().accept("g1", GroupLimits::default());
    let relay = start_relay(policy);
    let member = connect(relay.port(), &["g1"]);
    settle();
    let outsider = connect(relay.port(), &["g1", "g9"]);
    settle();

    outsider.produce(&"nope".to_owned(), "g1").expect("queued locally");
    member.notify(counts(&[("g1", 1)])).expect("notify");
    settle();
    assert!(member.pop(1, false).expect("pop").is_empty());

    drop(outsider);
    member.stop();
    relay.stop();
}

/// Test: with `max_consumables = 2`, overproduction keeps only the newest
/// two (oldest dropped).
#[test]
fn consumable_cap_drops_oldest() {
    let policy = GroupPolicy::restricted().accept(
        "g1",
        GroupLimits {
            max_count: None,
            max_consumables: Some(2),
        },
    );
    let relay = start_relay(policy);
    let producer = connect(relay.port(), &["g1"]);
    let consumer = connect(relay.port(), &["g1"]);
    settle();

    for text in ["a", "b", "c", "d"] {
        producer.produce(&text.to_owned(), "g1").expect("produce");
    }
    settle();
    consumer.notify(counts(&[("g1", -1)])).expect("notify");

    let mut items = Vec::new();
    while items.len() < 2 {
        items.extend(consumer.receive_all(true).expect("receive_all"));
    }
    assert_eq!(items, vec!["c".to_owned(), "d".to_owned()]);
    settle();
    assert!(consumer.receive_all(false).expect("receive_all").is_empty());

    producer.stop();
    consumer.stop();
    relay.stop();
}

/// Test: restricted mode also polices destinations at send time; an
/// unlisted destination group is skipped, a listed one still delivers.
#[test]
fn send_to_unlisted_group_is_skipped() {
    let policy = GroupPolicy::restricted().accept("g1", GroupLimits::default());
    let relay = start_relay(policy);
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1"]);
    settle();

    a.send_object(&"w".to_owned(), counts(&[("g1", -1), ("rogue", -1)]))
        .expect("send");
    assert_eq!(b.pop(1, true).expect("pop"), vec!["w".to_owned()]);

    a.stop();
    b.stop();
    relay.stop();
}
