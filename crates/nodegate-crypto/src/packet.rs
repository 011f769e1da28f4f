//! Packet-windowed stream cipher.
//!
//! The keystream is cut into *code packets*: two bytes that form a 16-bit
//! tag, followed by [`PACKET_SIZE`] bytes of block material. A message is
//! XORed against one packet and sent with that packet's tag, so the wire
//! carries no counter and the receiver finds the packet by tag.
//!
//! # Tag acceptance
//!
//! A drawn packet is discarded (keystream bytes included) when its tag is
//! zero or equals one of the last [`BACKCHECK`] accepted tags. Sender and
//! receiver both draw through [`PacketSource`], so they discard the same
//! packets and stay aligned.
//!
//! # Receive window
//!
//! The [`Decrypter`] keeps [`DECRYPT_WINDOW`] packets ahead of time. Packets
//! are numbered by draw order; packet `k` lives in slot `k % DECRYPT_WINDOW`.
//! The window always holds packets `mid - LAG_CATCH + 1 ..= mid - LAG_CATCH +
//! DECRYPT_WINDOW`. Once the last matched packet is more than [`LAG_CATCH`]
//! past `mid`, the slots behind the window are refilled and `mid` moves up to
//! the last match.
//!
//! ```text
//!            lower                mid    last                  upper
//!              |<--- LAG_CATCH --->|       |                      |
//! slots:  [ retired | late arrivals | in order | ahead (loss) ...  ]
//! ```
//!
//! A packet is consumed by its first match and never matches again.
//! [`BACKCHECK`] spans two windows, so no two packets in the window share a
//! tag, and a packet retired less than a window ago matches no live slot.
//! Lookups walk outward from the last match.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::keystream::{CipherKind, Keystream};

/// Block size of one code packet; also the largest message it can carry.
pub const PACKET_SIZE: usize = 512;

/// Number of packets the receiver keeps ready.
pub const DECRYPT_WINDOW: usize = 64;

/// Number of accepted tags a new tag must not collide with.
pub const BACKCHECK: usize = 2 * DECRYPT_WINDOW;

/// Slots kept behind the last refill point for late packets.
pub const LAG_CATCH: usize = DECRYPT_WINDOW / 4;

/// Packet cipher errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("payload of {0} bytes exceeds the packet size")]
    PayloadTooLarge(usize),

    #[error("no packet in the receive window carries tag 0x{0:04x}")]
    StreamBroken(u16),

    #[error("invalid seed length: {0}")]
    InvalidSeedLength(usize),

    #[error("unknown cipher id: {0}")]
    UnknownCipher(u8),
}

/// One tag plus one block of keystream.
pub struct CodePacket {
    identifier: u16,
    block: Vec<u8>,
}

impl CodePacket {
    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// XOR `input` against the block, cycling the block if needed.
    fn apply(&self, input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .zip(self.block.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}

impl Drop for CodePacket {
    fn drop(&mut self) {
        self.block.zeroize();
    }
}

/// Draws code packets from a keystream under the tag acceptance rule.
pub struct PacketSource {
    keystream: Box<dyn Keystream>,
    accepted: VecDeque<u16>,
    drawn: u64,
    discarded: u64,
}

impl PacketSource {
    pub fn new(keystream: Box<dyn Keystream>) -> Self {
        Self {
            keystream,
            accepted: VecDeque::with_capacity(BACKCHECK),
            drawn: 0,
            discarded: 0,
        }
    }

    /// Next acceptable packet.
    pub fn draw(&mut self) -> CodePacket {
        loop {
            let mut tag = [0u8; 2];
            self.keystream.fill(&mut tag);
            let identifier = u16::from_be_bytes(tag);

            let mut block = vec![0u8; PACKET_SIZE];
            self.keystream.fill(&mut block);
            let packet = CodePacket { identifier, block };

            if identifier == 0 || self.accepted.contains(&identifier) {
                self.discarded += 1;
                trace!(tag = identifier, "discarding colliding packet");
                continue;
            }

            if self.accepted.len() == BACKCHECK {
                self.accepted.pop_front();
            }
            self.accepted.push_back(identifier);
            self.drawn += 1;
            return packet;
        }
    }

    /// Number of packets accepted so far.
    pub fn drawn(&self) -> u64 {
        self.drawn
    }

    /// Number of packets discarded by the acceptance rule.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// Sending half: one fresh packet per message.
pub struct Encrypter {
    source: PacketSource,
}

impl Encrypter {
    pub fn new(keystream: Box<dyn Keystream>) -> Self {
        Self {
            source: PacketSource::new(keystream),
        }
    }

    /// Build an encrypter for `kind` seeded with `seed`.
    pub fn from_seed(kind: CipherKind, seed: &[u8]) -> Result<Self, CipherError> {
        Ok(Self::new(kind.keystream(seed)?))
    }

    /// Encrypt `plaintext`, returning the ciphertext and the tag to send with it.
    pub fn send_data(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, u16), CipherError> {
        if plaintext.len() > PACKET_SIZE {
            return Err(CipherError::PayloadTooLarge(plaintext.len()));
        }

        let packet = self.source.draw();
        Ok((packet.apply(plaintext), packet.identifier))
    }

    /// Number of packets used so far.
    pub fn packets_sent(&self) -> u64 {
        self.source.drawn()
    }
}

struct Slot {
    packet: CodePacket,
    consumed: bool,
}

/// Receiving half: resolves tags against a window of pre-drawn packets.
pub struct Decrypter {
    source: PacketSource,
    slots: Vec<Slot>,
    /// Draw index of the most recently matched packet.
    last: u64,
    /// Draw index up to which the window was last refilled.
    mid: u64,
    /// Draw index of the next packet to generate.
    generated: u64,
    matched_any: bool,
}

impl Decrypter {
    pub fn new(keystream: Box<dyn Keystream>) -> Self {
        let mut source = PacketSource::new(keystream);
        let slots = (0..DECRYPT_WINDOW)
            .map(|_| Slot {
                packet: source.draw(),
                consumed: false,
            })
            .collect();

        Self {
            source,
            slots,
            last: 0,
            mid: LAG_CATCH as u64 - 1,
            generated: DECRYPT_WINDOW as u64,
            matched_any: false,
        }
    }

    /// Build a decrypter for `kind` seeded with `seed`.
    pub fn from_seed(kind: CipherKind, seed: &[u8]) -> Result<Self, CipherError> {
        Ok(Self::new(kind.keystream(seed)?))
    }

    /// Decrypt `ciphertext` with the packet carrying `tag`.
    pub fn receive_data(&mut self, ciphertext: &[u8], tag: u16) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() > PACKET_SIZE {
            return Err(CipherError::PayloadTooLarge(ciphertext.len()));
        }

        let index = self
            .locate(tag)
            .ok_or(CipherError::StreamBroken(tag))?;

        let slot = &mut self.slots[Self::slot_of(index)];
        slot.consumed = true;
        let plaintext = slot.packet.apply(ciphertext);

        self.last = index;
        self.matched_any = true;

        if self.last > self.mid + LAG_CATCH as u64 {
            self.refill();
        }

        Ok(plaintext)
    }

    /// Lowest draw index still held in the window.
    fn lower(&self) -> u64 {
        self.generated - DECRYPT_WINDOW as u64
    }

    fn slot_of(index: u64) -> usize {
        (index % DECRYPT_WINDOW as u64) as usize
    }

    fn matches(&self, index: u64, tag: u16) -> bool {
        let slot = &self.slots[Self::slot_of(index)];
        !slot.consumed && slot.packet.identifier == tag
    }

    /// Walk outward from the last match (or the window start before any
    /// match), nearest candidates first.
    fn locate(&self, tag: u16) -> Option<u64> {
        let lower = self.lower();
        let anchor = if self.matched_any { self.last } else { lower };

        if self.matches(anchor, tag) {
            return Some(anchor);
        }

        for distance in 1..DECRYPT_WINDOW as u64 {
            let ahead = anchor + distance;
            if ahead < self.generated && self.matches(ahead, tag) {
                return Some(ahead);
            }
            if let Some(behind) = anchor.checked_sub(distance) {
                if behind >= lower && self.matches(behind, tag) {
                    return Some(behind);
                }
            }
        }

        None
    }

    /// Replace the retired slots behind the window with fresh packets.
    fn refill(&mut self) {
        let count = self.last - self.mid;
        for _ in 0..count {
            let index = self.generated;
            self.slots[Self::slot_of(index)] = Slot {
                packet: self.source.draw(),
                consumed: false,
            };
            self.generated += 1;
        }

        debug!(
            refilled = count,
            last = self.last,
            previous_mid = self.mid,
            "receive window advanced"
        );
        self.mid = self.last;
    }

    /// Number of packets drawn into the window so far.
    pub fn packets_generated(&self) -> u64 {
        self.generated
    }
}
