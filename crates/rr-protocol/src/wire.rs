//! Wire envelope types and their CBOR encoding.
//!
//! Two envelope shapes, one per direction:
//!
//! ```text
//! PeerEnvelope  { stamp, cmd, dest, payload }   // peer -> relay
//! RelayEnvelope { stamp, cmd, payload }         // relay -> peer
//! ```
//!
//! `stamp` is a monotonic, sender-scoped sequence number used for
//! acknowledgement matching and replay ordering. `dest` maps group names to
//! signed counts: negative means broadcast, positive means produce-N /
//! notify-for-N, zero is a no-op. The peer's HELLO reply carries its group
//! list CBOR-encoded inside `payload`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_bytes::ByteBuf;

use crate::frame::FrameError;

/// Default width of the ASCII decimal length header, in bytes.
pub const DEFAULT_HEADER_SIZE: usize = 10;

/// Default upper bound on a single frame body, applied before allocation.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// All command tags in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Handshake: relay greets first, peer replies with its group list.
    Hello,
    /// Payload carrying a user object.
    Obj,
    /// Consumer readiness declaration (peer -> relay only).
    Ntf,
    /// Acknowledges the frame whose stamp this envelope echoes.
    Ack,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Hello => "HELLO",
            Command::Obj => "OBJ",
            Command::Ntf => "NTF",
            Command::Ack => "ACK",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// A peer-origin message body: `(stamp, cmd, dest, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub stamp: u64,
    pub cmd: Command,
    /// Group name -> signed count. `None` for HELLO and ACK.
    pub dest: Option<BTreeMap<String, i64>>,
    /// Opaque payload bytes. For HELLO this is the CBOR group list.
    pub payload: Option<ByteBuf>,
}

impl PeerEnvelope {
    /// The peer's HELLO reply, carrying its declared group list.
    pub fn hello(stamp: u64, groups: &[String]) -> Result<Self, FrameError> {
        Ok(PeerEnvelope {
            stamp,
            cmd: Command::Hello,
            dest: None,
            payload: Some(ByteBuf::from(encode_groups(groups)?)),
        })
    }

    pub fn obj(stamp: u64, dest: BTreeMap<String, i64>, payload: Vec<u8>) -> Self {
        PeerEnvelope {
            stamp,
            cmd: Command::Obj,
            dest: Some(dest),
            payload: Some(ByteBuf::from(payload)),
        }
    }

    pub fn ntf(stamp: u64, origins: BTreeMap<String, i64>) -> Self {
        PeerEnvelope {
            stamp,
            cmd: Command::Ntf,
            dest: Some(origins),
            payload: None,
        }
    }

    /// Acknowledgement of a relay frame. Echoes the relay's stamp; never
    /// stamped or tracked itself.
    pub fn ack(stamp: u64) -> Self {
        PeerEnvelope {
            stamp,
            cmd: Command::Ack,
            dest: None,
            payload: None,
        }
    }

    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|bytes| bytes.as_ref())
    }
}

/// A relay-origin message body: `(stamp, cmd, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub stamp: u64,
    pub cmd: Command,
    pub payload: Option<ByteBuf>,
}

impl RelayEnvelope {
    /// The relay's greeting, sent immediately on accept.
    pub fn hello(stamp: u64) -> Self {
        RelayEnvelope {
            stamp,
            cmd: Command::Hello,
            payload: None,
        }
    }

    pub fn obj(stamp: u64, payload: Vec<u8>) -> Self {
        RelayEnvelope {
            stamp,
            cmd: Command::Obj,
            payload: Some(ByteBuf::from(payload)),
        }
    }

    pub fn ack(stamp: u64) -> Self {
        RelayEnvelope {
            stamp,
            cmd: Command::Ack,
            payload: None,
        }
    }

    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|bytes| bytes.as_ref())
    }
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

/// Serialize a value to CBOR bytes.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FrameError> {
    ciborium::from_reader(data).map_err(|e| FrameError::Decode(e.to_string()))
}

/// Encode a group list for transport inside a HELLO payload.
pub fn encode_groups(groups: &[String]) -> Result<Vec<u8>, FrameError> {
    to_vec(&groups)
}

/// Decode a group list from a HELLO payload.
pub fn decode_groups(data: &[u8]) -> Result<Vec<String>, FrameError> {
    from_slice(data)
}
