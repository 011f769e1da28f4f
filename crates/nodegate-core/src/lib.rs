//! Core nodegate protocol types, framing, and status codes.
//!
//! This crate provides:
//! - The message envelope exchanged between two gateways
//! - Session status codes carried in every message
//! - Fixed-width group/node name fields
//! - Handshake payload codecs (`INITIAL`, `EXCHANGE_STREAM`, signed blocks)
//!
//! Nothing here performs I/O; callers move encoded messages over whatever
//! transport they own.

#![forbid(unsafe_code)]

pub mod message;
pub mod name;
pub mod payload;
pub mod status;

pub use message::{Message, MessageType, WireError};
pub use name::{NodeName, NAME_LEN};
pub use payload::{InitialPayload, SignedBlock, StreamExchange};
