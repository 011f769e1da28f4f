//! Message envelope exchanged between two gateways.
//!
//! # Wire Format
//!
//! ```text
//!  0               1               2               3
//! +---------------+---------------+---------------+---------------+
//! |     Type      |    Status     |  Cipher tag (cipher types)    |
//! +---------------+---------------+---------------+---------------+
//! |                       Payload / ciphertext ...                |
//! +---------------------------------------------------------------+
//! ```
//!
//! `SIGN`, `CONFIRM_OLD` and `DATA` carry a big-endian cipher tag that
//! addresses the packet used to encrypt their payload. All other types go
//! straight from the status byte to the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope header size for plain messages.
pub const HEADER_SIZE: usize = 2;

/// Envelope header size for cipher-bearing messages.
pub const TAGGED_HEADER_SIZE: usize = 4;

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Identity announcement: group, node, timestamp, public modulus.
    Initial = 0,
    /// Ephemeral stream seed sealed under the receiver's public key.
    ExchangeStream = 1,
    /// Signature over the session binding, under the current key.
    Sign = 2,
    /// Keep-alive with no handshake content.
    Ping = 3,
    /// Application payload (also used for forwarded traffic).
    Data = 4,
    /// Signature over the session binding, under the previous key.
    ConfirmOld = 5,
    /// The sender's stream or signature check failed.
    CryptoError = 253,
    /// Acknowledges a peer `ERROR`; both sides restart.
    ErrorConfirm = 254,
    /// The sender is in an error state and asks for a mutual restart.
    Error = 255,
}

impl MessageType {
    /// Whether messages of this type carry a cipher tag.
    pub fn carries_tag(self) -> bool {
        matches!(self, Self::Sign | Self::ConfirmOld | Self::Data)
    }

    /// Error-family messages are processed even while a session is degraded.
    pub fn is_error_family(self) -> bool {
        matches!(self, Self::CryptoError | Self::ErrorConfirm | Self::Error)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Initial),
            1 => Ok(Self::ExchangeStream),
            2 => Ok(Self::Sign),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Data),
            5 => Ok(Self::ConfirmOld),
            253 => Ok(Self::CryptoError),
            254 => Ok(Self::ErrorConfirm),
            255 => Ok(Self::Error),
            _ => Err(WireError::UnknownMessageType(value)),
        }
    }
}

/// Wire decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("{0:?} message requires a cipher tag")]
    MissingTag(MessageType),

    #[error("name too long: {0} bytes, maximum {1}")]
    NameTooLong(usize, usize),

    #[error("name must not be empty")]
    EmptyName,

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageType,
    status: u8,
    tag: Option<u16>,
    payload: Bytes,
}

impl Message {
    /// Create a plain (untagged) message.
    pub fn new(kind: MessageType, status: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            status,
            tag: None,
            payload: payload.into(),
        }
    }

    /// Create a message with no payload.
    pub fn control(kind: MessageType, status: u8) -> Self {
        Self::new(kind, status, Bytes::new())
    }

    /// Create a cipher-bearing message.
    pub fn with_tag(kind: MessageType, status: u8, tag: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            status,
            tag: Some(tag),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Status byte of the sender at the time the message was built.
    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn tag(&self) -> Option<u16> {
        self.tag
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encode to wire bytes.
    ///
    /// Fails only when a cipher-bearing type was built without a tag.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(TAGGED_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.status);

        if self.kind.carries_tag() {
            let tag = self.tag.ok_or(WireError::MissingTag(self.kind))?;
            buf.put_u16(tag);
        }

        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode from wire bytes.
    pub fn decode(mut bytes: Bytes) -> Result<Self, WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::TooShort(bytes.len(), HEADER_SIZE));
        }

        let kind = MessageType::try_from(bytes[0])?;
        let status = bytes[1];

        if kind.carries_tag() {
            if bytes.len() < TAGGED_HEADER_SIZE {
                return Err(WireError::TooShort(bytes.len(), TAGGED_HEADER_SIZE));
            }
            bytes.advance(HEADER_SIZE);
            let tag = bytes.get_u16();
            Ok(Self::with_tag(kind, status, tag, bytes))
        } else {
            bytes.advance(HEADER_SIZE);
            Ok(Self::new(kind, status, bytes))
        }
    }
}
