//! # Frame Codec
//!
//! Every frame travels on its own bidirectional stream.
//!
//! ## Wire Format
//!
//! ```text
//! [kind(1)] [message_id(16)] [length(4, LE)] [payload(length)]
//! ```
//!
//! The receiver answers on the same stream with a one-byte acknowledgement,
//! optionally followed by a response body (query answers only).

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

/// Header length: kind + message id + payload length.
pub const FRAME_HEADER_LEN: usize = 1 + 16 + 4;

/// Frame kind tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Signed registration plus address hint.
    Announcement = 0x01,
    /// Opaque application payload.
    Application = 0x02,
    /// Rediscovery query for one account key.
    Query = 0x03,
}

impl FrameKind {
    /// Decode a kind tag.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0x01 => Ok(Self::Announcement),
            0x02 => Ok(Self::Application),
            0x03 => Ok(Self::Query),
            other => Err(FrameError::UnknownKind(other)),
        }
    }

    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Announcement => "announcement",
            Self::Application => "application",
            Self::Query => "query",
        }
    }
}

/// Frame decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Unknown kind tag.
    #[error("unknown frame kind 0x{0:02x}")]
    UnknownKind(u8),

    /// Declared payload exceeds the configured maximum.
    #[error("frame payload of {len} bytes exceeds maximum of {max}")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Fewer bytes than the header declares.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes present.
        actual: usize,
    },

    /// Bytes after the declared payload.
    #[error("{0} trailing bytes after frame payload")]
    TrailingBytes(usize),

    /// Payload of a control frame did not parse.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Frame kind label.
        kind: &'static str,
        /// What is wrong.
        reason: String,
    },
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Kind tag.
    pub kind: FrameKind,
    /// Random id; retransmits reuse it.
    pub id: Uuid,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with a fresh message id.
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id: Uuid::new_v4(),
            payload: payload.into(),
        }
    }

    /// Application frame with a fresh message id.
    pub fn application(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Application, payload)
    }

    /// Encode header and payload into one buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_slice(self.id.as_bytes());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a complete frame, enforcing `max_payload`.
    pub fn decode(bytes: &[u8], max_payload: usize) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let kind = FrameKind::from_byte(bytes[0])?;
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[1..17]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[17..FRAME_HEADER_LEN]);
        let len = u32::from_le_bytes(len) as usize;

        if len > max_payload {
            return Err(FrameError::TooLarge {
                len,
                max: max_payload,
            });
        }

        let body = &bytes[FRAME_HEADER_LEN..];
        if body.len() < len {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_LEN + len,
                actual: bytes.len(),
            });
        }
        if body.len() > len {
            return Err(FrameError::TrailingBytes(body.len() - len));
        }

        Ok(Self {
            kind,
            id: Uuid::from_bytes(id),
            payload: Bytes::copy_from_slice(body),
        })
    }
}

/// One-byte acknowledgement written back on every frame stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Frame accepted (including suppressed duplicates).
    Accepted = 0x00,
    /// Frame malformed or refused.
    Rejected = 0x01,
}

impl Ack {
    /// Decode an acknowledgement byte. Unknown values count as rejection.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Accepted,
            _ => Self::Rejected,
        }
    }
}
