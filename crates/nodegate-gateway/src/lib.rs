//! nodegate handshake state machine.
//!
//! A [`Gateway`] is one end of a secure channel between two nodes that share
//! a group name. Each node holds a long-term identity key; the handshake
//! exchanges identities, seals a fresh stream seed to each side, signs the
//! session binding with both identities and, after a key rotation,
//! re-proves the previous key. Afterwards opaque payloads travel encrypted
//! with the packet-windowed stream cipher.
//!
//! The gateway performs no I/O. The embedding transport polls
//! [`Gateway::get_message`], sends the encoded result, and feeds every
//! received message to [`Gateway::process_message`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use nodegate_crypto::NullIdentity;
//! use nodegate_gateway::{Gateway, GatewayConfig, LocalIdentity};
//!
//! let a = Gateway::new(
//!     GatewayConfig::default(),
//!     LocalIdentity::named("group", "A", Arc::new(NullIdentity::new(b"a"))).unwrap(),
//! );
//! let b = Gateway::new(
//!     GatewayConfig::default(),
//!     LocalIdentity::named("group", "B", Arc::new(NullIdentity::new(b"b"))).unwrap(),
//! );
//!
//! while !(a.connected() && b.connected()) {
//!     let _ = b.process_message(&a.get_message());
//!     let _ = a.process_message(&b.get_message());
//! }
//!
//! let data = a.data_message(b"hello").unwrap();
//! assert_eq!(b.process_message(&data).unwrap().unwrap().as_ref(), b"hello");
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use identity::LocalIdentity;
