//! Length-prefixed framing with the optional per-frame password field.
//!
//! The header is exactly `header_size` bytes of ASCII decimal, left-justified
//! and space-padded, giving the byte length of the body that follows. On
//! peer->relay frames the header is followed by the password bytes, compared
//! byte-for-byte on every frame before the body is even looked at. Both ends
//! must agree on `header_size` and on the password.

use serde::Serialize;

use crate::wire::{PeerEnvelope, RelayEnvelope, to_vec};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The fixed-width header did not parse as a decimal length.
    #[error("frame header is not a decimal length")]
    BadHeader,
    /// The password bytes following the header did not match.
    #[error("frame password mismatch")]
    BadPassword,
    /// A header announced a body larger than the configured limit.
    #[error("frame body of {got} bytes exceeds the {limit} byte limit")]
    FrameTooLong { got: usize, limit: usize },
    /// A body too large to describe in `header_size` decimal digits.
    #[error("frame body of {len} bytes does not fit a {width}-byte header")]
    BodyTooLarge { len: usize, width: usize },
    #[error("envelope encode: {0}")]
    Encode(String),
    #[error("envelope decode: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Render the fixed-width length header for a body of `len` bytes.
pub fn encode_header(len: usize, header_size: usize) -> Result<Vec<u8>, FrameError> {
    let header = format!("{len:<header_size$}");
    if header.len() != header_size {
        return Err(FrameError::BodyTooLarge {
            len,
            width: header_size,
        });
    }
    Ok(header.into_bytes())
}

fn frame_body<T: Serialize>(
    envelope: &T,
    password: Option<&str>,
    header_size: usize,
) -> Result<Vec<u8>, FrameError> {
    let body = to_vec(envelope)?;
    let header = encode_header(body.len(), header_size)?;
    let password = password.map_or(&[][..], str::as_bytes);
    let mut frame = Vec::with_capacity(header.len() + password.len() + body.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(password);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Frame a peer-origin envelope: `header || password || body`.
pub fn peer_frame(
    envelope: &PeerEnvelope,
    password: &str,
    header_size: usize,
) -> Result<Vec<u8>, FrameError> {
    frame_body(envelope, Some(password), header_size)
}

/// Frame a relay-origin envelope: `header || body` (no password field).
pub fn relay_frame(envelope: &RelayEnvelope, header_size: usize) -> Result<Vec<u8>, FrameError> {
    frame_body(envelope, None, header_size)
}

// ---------------------------------------------------------------------------
// Incremental decoding
// ---------------------------------------------------------------------------

/// Accumulates socket bytes and yields complete frame bodies.
///
/// Relay-side readers are built with [`FrameReader::with_password`] and verify
/// the password field of every frame; peer-side readers expect no password
/// field at all. Errors are terminal for the connection: the caller is
/// expected to kill it.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    header_size: usize,
    /// Expected password bytes, or `None` when frames carry no password field.
    password: Option<Vec<u8>>,
    max_frame_len: usize,
}

impl FrameReader {
    /// A reader for relay-origin frames (no password field).
    pub fn new(header_size: usize, max_frame_len: usize) -> Self {
        FrameReader {
            buf: Vec::new(),
            header_size,
            password: None,
            max_frame_len,
        }
    }

    /// A reader for peer-origin frames, verifying `password` on every frame.
    pub fn with_password(header_size: usize, max_frame_len: usize, password: &str) -> Self {
        FrameReader {
            buf: Vec::new(),
            header_size,
            password: Some(password.as_bytes().to_vec()),
            max_frame_len,
        }
    }

    /// Append freshly read socket bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to extract the next complete frame body.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Call in a loop after
    /// every [`push`](Self::push) until it returns `Ok(None)`.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let password_len = self.password.as_ref().map_or(0, Vec::len);
        let prefix = self.header_size + password_len;
        if self.buf.len() < prefix {
            return Ok(None);
        }
        let body_len = std::str::from_utf8(&self.buf[..self.header_size])
            .ok()
            .and_then(|h| h.trim().parse::<usize>().ok())
            .ok_or(FrameError::BadHeader)?;
        if body_len > self.max_frame_len {
            return Err(FrameError::FrameTooLong {
                got: body_len,
                limit: self.max_frame_len,
            });
        }
        if let Some(expected) = &self.password {
            if self.buf[self.header_size..prefix] != expected[..] {
                return Err(FrameError::BadPassword);
            }
        }
        let total = prefix + body_len;
        if self.buf.len() < total {
            return Ok(None);
        }
        let body = self.buf[prefix..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(body))
    }
}
