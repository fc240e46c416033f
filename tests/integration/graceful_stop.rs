//! Graceful shutdown: the bounded acknowledgement drain on both the
//! endpoint and the relay.
//!
//! Harness helpers are duplicated across the integration files to keep each
//! one self-contained and independently runnable.

use std::time::{Duration, Instant};

use rr_test_utils::MockRelay;
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

fn settle() {
    std::thread::sleep(Duration::from_millis(300));
}

/// Test: with the relay up, a produce-then-stop exits cleanly well inside
/// the bounded window (the ACK arrives almost immediately).
#[test]
fn stop_with_relay_up_is_fast() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    settle();

    a.produce(&"r".to_owned(), "g1").expect("produce");
    let started = Instant::now();
    a.stop();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop should return once the ACK is in: {:?}",
        started.elapsed()
    );

    relay.stop();
}

/// Test: commands that were only ever stored (never sent) do not hold up a
/// stop; the bounded window applies to unacknowledged sends only.
#[test]
fn stop_with_only_stored_commands_is_fast() {
    rr_test_utils::init_tracing();
    let a = connect(rr_test_utils::unused_port(), &["g1"]);
    a.produce(&"r".to_owned(), "g1").expect("produce offline");
    settle();

    let started = Instant::now();
    a.stop();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "nothing was sent, so nothing to wait for: {:?}",
        started.elapsed()
    );
}

/// Test: a frame that was sent but never acknowledged makes stop exhaust
/// the bounded retry window (~10 x 1 s) before closing anyway.
#[tokio::test]
async fn stop_with_unacked_frame_exhausts_window() {
    rr_test_utils::init_tracing();
    let relay = MockRelay::bind("it-pw", 10).await;
    let ep = connect(relay.addr().port(), &["g1"]);
    let mut session = relay.accept().await;

    ep.produce(&"r".to_owned(), "g1").expect("produce");
    let envelope = session.recv_command().await;
    // Deliberately never acknowledged.

    let started = Instant::now();
    tokio::task::spawn_blocking(move || ep.stop())
        .await
        .expect("stop");
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(8),
        "stop must grant the bounded window: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(30),
        "stop must not wait forever: {elapsed:?}"
    );
    drop((session, envelope));
}

/// Test: the relay's own stop drains pending deliveries before closing, so
/// a payload handed over right before the stop still reaches its consumer.
#[test]
fn relay_stop_lets_inflight_delivery_finish() {
    let relay = start_relay();
    let a = connect(relay.port(), &["g1"]);
    let b = connect(relay.port(), &["g1"]);
    settle();

    a.broadcast(&"last words".to_owned(), "g1").expect("broadcast");
    // Stop right away; the drain keeps sessions alive until B has acked.
    std::thread::sleep(Duration::from_millis(50));
    relay.stop();

    assert_eq!(b.pop(1, true).expect("pop"), vec!["last words".to_owned()]);

    a.stop();
    b.stop();
}
