/// API-boundary tests: destination shapes, synchronous validation, and
/// config checks. No relay is involved; invalid input must fail before I/O.
use std::collections::BTreeMap;
use std::time::Duration;

use endpoint::{
    Destination, Endpoint, EndpointConfig, EndpointError, JsonCodec, ReconnectConfig, Security,
};
use rr_test_utils::{init_tracing, unused_port};

fn offline_endpoint() -> Endpoint<JsonCodec<String>> {
    init_tracing();
    let mut config = EndpointConfig::new("127.0.0.1", unused_port(), "pw");
    config.security = Security::Tcp;
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        factor: 1.5,
        jitter: 0.0,
    };
    Endpoint::connect(config, JsonCodec::new()).expect("connect endpoint")
}

// ---------------------------------------------------------------------------
// Destination shapes
// ---------------------------------------------------------------------------

/// Test: the three accepted shapes convert into the expected variants.
#[test]
fn destination_shapes_convert() {
    assert!(matches!(Destination::from("g1"), Destination::Group(g) if g == "g1"));
    assert!(matches!(
        Destination::from(vec!["g1", "g2"]),
        Destination::Groups(gs) if gs == vec!["g1".to_owned(), "g2".to_owned()]
    ));
    let counts = BTreeMap::from([("g1".to_owned(), 3i64)]);
    assert!(matches!(
        Destination::from(counts.clone()),
        Destination::Counts(c) if c == counts
    ));
}

/// Test: an empty destination is rejected synchronously, before any I/O.
#[test]
fn empty_destination_is_rejected() {
    let ep = offline_endpoint();
    let err = ep
        .send_object(&"x".to_owned(), BTreeMap::new())
        .expect_err("empty map must be rejected");
    assert!(matches!(err, EndpointError::InvalidDestination(_)));

    let err = ep
        .notify(Vec::<String>::new())
        .expect_err("empty group list must be rejected");
    assert!(matches!(err, EndpointError::InvalidDestination(_)));

    ep.stop();
}

/// Test: a zero count inside a non-empty map is accepted (no-op downstream).
#[test]
fn zero_count_in_map_is_accepted() {
    let ep = offline_endpoint();
    ep.notify(BTreeMap::from([("g1".to_owned(), 0i64)]))
        .expect("zero count is a valid no-op");
    ep.stop();
}

// ---------------------------------------------------------------------------
// Config validation
// ---------------------------------------------------------------------------

/// Test: an empty password is refused at construction.
#[test]
fn empty_password_is_refused() {
    let mut config = EndpointConfig::new("127.0.0.1", 1, "");
    config.security = Security::Tcp;
    let err = Endpoint::<JsonCodec<String>>::connect(config, JsonCodec::new())
        .expect_err("empty password");
    assert!(matches!(err, EndpointError::Config(_)));
}

/// Test: an out-of-range jitter is refused at construction.
#[test]
fn invalid_jitter_is_refused() {
    let mut config = EndpointConfig::new("127.0.0.1", 1, "pw");
    config.security = Security::Tcp;
    config.reconnect.jitter = 1.5;
    let err = Endpoint::<JsonCodec<String>>::connect(config, JsonCodec::new())
        .expect_err("bad jitter");
    assert!(matches!(err, EndpointError::Config(_)));
}

/// Test: TLS mode with a missing credentials directory fails synchronously.
#[test]
fn missing_credentials_fail_synchronously() {
    let mut config = EndpointConfig::new("127.0.0.1", 1, "pw");
    config.keys_dir = Some(std::path::PathBuf::from("/nonexistent/credentials"));
    let err = Endpoint::<JsonCodec<String>>::connect(config, JsonCodec::new())
        .expect_err("missing credentials");
    assert!(matches!(err, EndpointError::Credentials { .. }));
}

/// Test: non-blocking reads with nothing delivered come back empty.
#[test]
fn non_blocking_reads_are_empty() {
    let ep = offline_endpoint();
    assert!(ep.pop(1, false).expect("pop").is_empty());
    assert!(ep.receive_all(false).expect("receive_all").is_empty());
    assert!(ep.get_last(1, false).expect("get_last").is_empty());
    ep.stop();
}
