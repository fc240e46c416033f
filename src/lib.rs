// rusty-relay: TLS-secured relay for opaque serialized payloads.
//
// A central `Relay` routes payloads between `Endpoint` peers organized into
// named, overlapping groups, with two delivery disciplines: broadcast (every
// member sees the most recent payload) and consume (queued payloads drained
// on demand by ready consumers). Connections are password-authenticated,
// TLS-wrapped, acknowledged frame by frame, and survive disconnects with
// in-flight replay.
//
// This crate just re-exports the public surface of the service crates.

pub use endpoint::{
    Destination, DeserializerMode, Endpoint, EndpointConfig, EndpointError, ReconnectConfig,
};
pub use relay::{GroupLimits, GroupPolicy, Relay, RelayConfig, RelayError};
pub use rr_protocol::{BytesCodec, Codec, CodecError, JsonCodec, Security};
