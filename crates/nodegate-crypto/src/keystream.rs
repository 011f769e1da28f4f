//! Seeded keystream sources.
//!
//! A keystream is a deterministic byte generator: two instances built from
//! the same seed yield the same bytes forever. The packet cipher draws both
//! packet tags and block material from it.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::packet::CipherError;

/// Deterministic pseudorandom byte source.
pub trait Keystream: Send {
    /// Next byte of the stream.
    fn next_byte(&mut self) -> u8;

    /// Fill `out` with the next `out.len()` bytes.
    fn fill(&mut self, out: &mut [u8]) {
        for byte in out.iter_mut() {
            *byte = self.next_byte();
        }
    }
}

/// Cipher algorithms a gateway can be configured with.
///
/// The numeric id travels in `EXCHANGE_STREAM` so both sides can check they
/// agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CipherKind {
    /// Insecure xorshift stream, for tests and debugging.
    Null = 0,
    /// RC4 byte generator.
    #[default]
    Rc4 = 1,
}

impl CipherKind {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Build a keystream of this kind from `seed`.
    pub fn keystream(self, seed: &[u8]) -> Result<Box<dyn Keystream>, CipherError> {
        match self {
            Self::Null => Ok(Box::new(NullKeystream::new(seed))),
            Self::Rc4 => Ok(Box::new(Rc4Keystream::new(seed)?)),
        }
    }
}

impl TryFrom<u8> for CipherKind {
    type Error = CipherError;

    fn try_from(value: u8) -> Result<Self, CipherError> {
        match value {
            0 => Ok(Self::Null),
            1 => Ok(Self::Rc4),
            _ => Err(CipherError::UnknownCipher(value)),
        }
    }
}

/// RC4 keystream.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Rc4Keystream {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4Keystream {
    /// Key schedule over a 1 to 256 byte seed.
    pub fn new(seed: &[u8]) -> Result<Self, CipherError> {
        if seed.is_empty() || seed.len() > 256 {
            return Err(CipherError::InvalidSeedLength(seed.len()));
        }

        let mut state = [0u8; 256];
        for (slot, value) in state.iter_mut().zip(0u8..=255) {
            *slot = value;
        }

        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(seed[i % seed.len()]);
            state.swap(i, j as usize);
        }

        Ok(Self { state, i: 0, j: 0 })
    }
}

impl Keystream for Rc4Keystream {
    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);
        let index = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
        self.state[index as usize]
    }
}

/// Non-cryptographic keystream (xorshift64*).
///
/// Keeps the packet machinery exercised without pretending to hide anything.
pub struct NullKeystream {
    state: u64,
}

impl NullKeystream {
    pub fn new(seed: &[u8]) -> Self {
        // FNV-1a fold of the seed; xorshift must never start at zero.
        let mut state = 0xcbf2_9ce4_8422_2325u64;
        for byte in seed {
            state ^= u64::from(*byte);
            state = state.wrapping_mul(0x0100_0000_01b3);
        }
        if state == 0 {
            state = 0x9e37_79b9_7f4a_7c15;
        }
        Self { state }
    }
}

impl Keystream for NullKeystream {
    fn next_byte(&mut self) -> u8 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        (self.state.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 56) as u8
    }
}
