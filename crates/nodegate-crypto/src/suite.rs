//! Algorithm selection shared by every gateway built from one configuration.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::digest::{Digest, Sha256Digest};
use crate::keystream::CipherKind;
use crate::packet::{CipherError, Decrypter, Encrypter};

/// Length of the ephemeral stream seed exchanged in `EXCHANGE_STREAM`.
pub const SEED_LEN: usize = 32;

/// Cipher kind plus digest implementation.
#[derive(Clone)]
pub struct AlgorithmSuite {
    cipher: CipherKind,
    digest: Arc<dyn Digest>,
}

impl AlgorithmSuite {
    /// `cipher` with SHA-256.
    pub fn new(cipher: CipherKind) -> Self {
        Self::with_digest(cipher, Arc::new(Sha256Digest))
    }

    pub fn with_digest(cipher: CipherKind, digest: Arc<dyn Digest>) -> Self {
        Self { cipher, digest }
    }

    pub fn cipher(&self) -> CipherKind {
        self.cipher
    }

    pub fn digest(&self) -> &dyn Digest {
        self.digest.as_ref()
    }

    /// Fresh random stream seed.
    pub fn generate_seed(&self) -> Zeroizing<Vec<u8>> {
        let mut seed = Zeroizing::new(vec![0u8; SEED_LEN]);
        rand::thread_rng().fill_bytes(&mut seed);
        seed
    }

    pub fn encrypter(&self, seed: &[u8]) -> Result<Encrypter, CipherError> {
        Encrypter::from_seed(self.cipher, seed)
    }

    pub fn decrypter(&self, seed: &[u8]) -> Result<Decrypter, CipherError> {
        Decrypter::from_seed(self.cipher, seed)
    }
}

impl Default for AlgorithmSuite {
    fn default() -> Self {
        Self::new(CipherKind::default())
    }
}

impl fmt::Debug for AlgorithmSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmSuite")
            .field("cipher", &self.cipher)
            .field("digest_len", &self.digest.output_len())
            .finish()
    }
}
