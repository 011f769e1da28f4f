//! Cryptographic building blocks for nodegate.
//!
//! This crate provides:
//! - Seeded keystreams (RC4 and an insecure null stream)
//! - The packet-windowed stream cipher (`Encrypter` / `Decrypter`)
//! - Long-term identities (textbook RSA over `num-bigint`, and a null identity)
//! - The digest used to bind handshake transcripts
//!
//! # Design
//!
//! Ciphertexts are addressed by pseudorandom 16-bit tags instead of sequence
//! numbers. The receiver keeps a window of pre-drawn packets, so messages
//! that arrive slightly out of order or after a short loss still decrypt
//! without acknowledgements.

#![forbid(unsafe_code)]

pub mod digest;
pub mod identity;
pub mod keystream;
pub mod packet;
pub mod suite;

pub use digest::{Digest, Sha256Digest};
pub use identity::{Identity, IdentityError, Modulus, NullIdentity, RsaIdentity};
pub use keystream::{CipherKind, Keystream, NullKeystream, Rc4Keystream};
pub use packet::{
    CipherError, CodePacket, Decrypter, Encrypter, PacketSource, BACKCHECK, DECRYPT_WINDOW,
    LAG_CATCH, PACKET_SIZE,
};
pub use suite::{AlgorithmSuite, SEED_LEN};
