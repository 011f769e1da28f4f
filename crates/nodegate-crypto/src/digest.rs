//! Digest capability used to bind handshake transcripts.

use sha2::{Digest as _, Sha256};

/// Hash function used for handshake signatures.
pub trait Digest: Send + Sync {
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// Output size in bytes.
    fn output_len(&self) -> usize;
}

/// SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl Digest for Sha256Digest {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn output_len(&self) -> usize {
        32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_answer() {
        let digest = Sha256Digest.hash(b"abc");
        assert_eq!(digest.len(), Sha256Digest.output_len());
        assert_eq!(
            digest[..8],
            [0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea]
        );
    }
}
