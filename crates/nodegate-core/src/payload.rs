//! Handshake payload codecs.
//!
//! ```text
//! INITIAL          [group: 16][node: 16][timestamp: u64 BE][modulus ...]
//! EXCHANGE_STREAM  [cipher id: u8][sealed seed ...]
//! signed block     [sender ts: u64 BE][receiver ts: u64 BE][signature ...]
//! ```
//!
//! The signed block is the plaintext of `SIGN` and `CONFIRM_OLD`; it travels
//! encrypted under the sender's stream cipher.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::WireError;
use crate::name::{NodeName, NAME_LEN};

const TIMESTAMP_LEN: usize = 8;

/// Payload of an `INITIAL` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialPayload {
    pub group: NodeName,
    pub node: NodeName,
    /// Seconds since the UNIX epoch when the sender's handshake started.
    pub timestamp: u64,
    /// Big-endian public modulus of the sender.
    pub modulus: Bytes,
}

impl InitialPayload {
    pub const FIXED_LEN: usize = 2 * NAME_LEN + TIMESTAMP_LEN;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::FIXED_LEN + self.modulus.len());
        buf.put_slice(self.group.as_bytes());
        buf.put_slice(self.node.as_bytes());
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.modulus);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, WireError> {
        if bytes.len() <= Self::FIXED_LEN {
            return Err(WireError::TooShort(bytes.len(), Self::FIXED_LEN + 1));
        }

        let group = NodeName::from_field(take_name(&mut bytes));
        let node = NodeName::from_field(take_name(&mut bytes));
        let timestamp = bytes.get_u64();

        Ok(Self {
            group,
            node,
            timestamp,
            modulus: bytes,
        })
    }
}

fn take_name(bytes: &mut Bytes) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    bytes.copy_to_slice(&mut field);
    field
}

/// Payload of an `EXCHANGE_STREAM` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamExchange {
    /// Cipher algorithm id the seed is meant for.
    pub cipher: u8,
    /// Seed encrypted under the receiver's public key.
    pub sealed: Bytes,
}

impl StreamExchange {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.sealed.len());
        buf.put_u8(self.cipher);
        buf.put_slice(&self.sealed);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, WireError> {
        if bytes.len() < 2 {
            return Err(WireError::TooShort(bytes.len(), 2));
        }
        let cipher = bytes.get_u8();
        Ok(Self {
            cipher,
            sealed: bytes,
        })
    }
}

/// Signed session binding carried by `SIGN` and `CONFIRM_OLD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    /// The signer's `INITIAL` timestamp.
    pub sender_timestamp: u64,
    /// The verifier's `INITIAL` timestamp, as seen by the signer.
    pub receiver_timestamp: u64,
    pub signature: Bytes,
}

impl SignedBlock {
    pub const FIXED_LEN: usize = 2 * TIMESTAMP_LEN;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::FIXED_LEN + self.signature.len());
        buf.put_u64(self.sender_timestamp);
        buf.put_u64(self.receiver_timestamp);
        buf.put_slice(&self.signature);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, WireError> {
        if bytes.len() <= Self::FIXED_LEN {
            return Err(WireError::TooShort(bytes.len(), Self::FIXED_LEN + 1));
        }
        let sender_timestamp = bytes.get_u64();
        let receiver_timestamp = bytes.get_u64();
        Ok(Self {
            sender_timestamp,
            receiver_timestamp,
            signature: bytes,
        })
    }

    /// Bytes covered by the signature: both timestamps and both node names,
    /// signer first.
    pub fn binding(
        sender_timestamp: u64,
        receiver_timestamp: u64,
        sender: &NodeName,
        receiver: &NodeName,
    ) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::FIXED_LEN + 2 * NAME_LEN);
        buf.put_u64(sender_timestamp);
        buf.put_u64(receiver_timestamp);
        buf.put_slice(sender.as_bytes());
        buf.put_slice(receiver.as_bytes());
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_layout() {
        let initial = InitialPayload {
            group: NodeName::new("g").unwrap(),
            node: NodeName::new("A").unwrap(),
            timestamp: 0x0102030405060708,
            modulus: Bytes::from_static(&[0xC3, 0x55]),
        };
        let encoded = initial.encode();
        assert_eq!(encoded.len(), InitialPayload::FIXED_LEN + 2);
        assert_eq!(encoded[0], b'g');
        assert_eq!(encoded[NAME_LEN], b'A');
        assert_eq!(&encoded[32..40], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(InitialPayload::decode(encoded).unwrap(), initial);
    }

    #[test]
    fn initial_without_modulus_is_rejected() {
        let bytes = Bytes::from(vec![0u8; InitialPayload::FIXED_LEN]);
        assert!(matches!(
            InitialPayload::decode(bytes),
            Err(WireError::TooShort(40, 41))
        ));
    }

    #[test]
    fn stream_exchange_needs_sealed_bytes() {
        assert!(StreamExchange::decode(Bytes::from_static(&[1])).is_err());
        let exchange = StreamExchange::decode(Bytes::from_static(&[1, 9, 9])).unwrap();
        assert_eq!(exchange.cipher, 1);
        assert_eq!(exchange.sealed.as_ref(), &[9, 9]);
    }

    #[test]
    fn binding_orders_signer_first() {
        let a = NodeName::new("A").unwrap();
        let b = NodeName::new("B").unwrap();
        let ab = SignedBlock::binding(1, 2, &a, &b);
        let ba = SignedBlock::binding(1, 2, &b, &a);
        assert_ne!(ab, ba);
        assert_eq!(ab.len(), 16 + 2 * NAME_LEN);
    }

    #[test]
    fn signed_block_requires_signature() {
        let block = SignedBlock {
            sender_timestamp: 5,
            receiver_timestamp: 6,
            signature: Bytes::from_static(&[0xAA; 4]),
        };
        assert_eq!(SignedBlock::decode(block.encode()).unwrap(), block);
        assert!(SignedBlock::decode(Bytes::from(vec![0u8; 16])).is_err());
    }
}
