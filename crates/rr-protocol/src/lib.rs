// rr-protocol: Relay wire protocol types, framing and acknowledgement tracking.
//
// Used symmetrically by the relay and the endpoint. A frame on the wire is
//
//   header || [password] || body
//
// where `header` is a fixed-width ASCII decimal giving the body length,
// `password` is present on peer->relay frames only, and `body` is the CBOR
// encoding of the direction's envelope. Payloads inside envelopes are opaque
// byte strings; the relay never inspects them.

pub mod ack;
pub mod codec;
pub mod frame;
pub mod security;
pub mod wire;

pub use ack::{AckRegistry, PendingAck};
pub use codec::{BytesCodec, Codec, CodecError, JsonCodec};
pub use frame::{FrameError, FrameReader, encode_header, peer_frame, relay_frame};
pub use security::Security;
pub use wire::{
    Command, DEFAULT_HEADER_SIZE, DEFAULT_MAX_FRAME_LEN, PeerEnvelope, RelayEnvelope,
    decode_groups, encode_groups,
};
