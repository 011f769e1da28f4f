//! Long-term identity keys.
//!
//! An identity signs handshake digests, verifies a peer's signatures given
//! only the peer's public modulus, and opens seeds sealed to it. The public
//! exponent is fixed at 65537, so a [`Modulus`] is the whole public key.
//!
//! # Example
//!
//! ```
//! use nodegate_crypto::identity::{Identity, RsaIdentity};
//!
//! let identity = RsaIdentity::generate(512, &mut rand::thread_rng()).unwrap();
//! let digest = [7u8; 16];
//!
//! let signature = identity.sign(&digest).unwrap();
//! assert!(identity.verify(&digest, &signature, identity.modulus()));
//! ```

use std::fmt;

use nodegate_common::constant_time_eq;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::suite::SEED_LEN;

/// Public exponent shared by every [`RsaIdentity`].
pub const PUBLIC_EXPONENT: u32 = 65_537;

/// Smallest modulus an [`RsaIdentity`] may have: a sealed seed, prefix byte
/// included, must fit under it. A SHA-256 digest then fits as well.
pub const MIN_MODULUS_BITS: u64 = ((SEED_LEN + 1) * 8) as u64;

const MILLER_RABIN_ROUNDS: usize = 32;

const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Identity errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("input of {0} bytes does not fit under the modulus")]
    MessageTooLarge(usize),

    #[error("ciphertext could not be opened")]
    Decryption,

    #[error("modulus of {0} bits is too small")]
    ModulusTooSmall(u64),
}

/// Public modulus as big-endian bytes without leading zeros.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Modulus(Vec<u8>);

impl Modulus {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self(bytes[start..].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }
}

impl From<&BigUint> for Modulus {
    fn from(value: &BigUint) -> Self {
        Self::from_bytes(&value.to_bytes_be())
    }
}

impl fmt::Debug for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modulus({} bytes)", self.0.len())
    }
}

impl fmt::LowerHex for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Asymmetric identity capability.
pub trait Identity: Send + Sync {
    /// This identity's public modulus.
    fn modulus(&self) -> &Modulus;

    /// Sign `digest` with the private key.
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, IdentityError>;

    /// Check `signature` over `digest` against the public key `modulus`.
    fn verify(&self, digest: &[u8], signature: &[u8], modulus: &Modulus) -> bool;

    /// Seal `plaintext` to the holder of `modulus`.
    fn encrypt_for(&self, plaintext: &[u8], modulus: &Modulus) -> Result<Vec<u8>, IdentityError>;

    /// Open a ciphertext sealed to this identity.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, IdentityError>;
}

/// Textbook RSA over `num-bigint`.
///
/// Sealed plaintexts are prefixed with a single `0x01` byte so leading zeros
/// survive the round trip. There is no padding scheme; inputs must be fixed
/// size and high entropy (digests and seeds).
pub struct RsaIdentity {
    modulus: Modulus,
    n: BigUint,
    d: BigUint,
}

impl RsaIdentity {
    /// Build a key from two distinct primes.
    pub fn from_primes(p: &BigUint, q: &BigUint) -> Result<Self, IdentityError> {
        let three = BigUint::from(3u32);
        if p < &three || q < &three {
            return Err(IdentityError::InvalidKey("primes must be odd and > 2".into()));
        }
        if p == q {
            return Err(IdentityError::InvalidKey("primes must differ".into()));
        }

        let n = p * q;
        if n.bits() < MIN_MODULUS_BITS {
            return Err(IdentityError::ModulusTooSmall(n.bits()));
        }

        let phi = (p - 1u32) * (q - 1u32);
        let d = BigUint::from(PUBLIC_EXPONENT)
            .modinv(&phi)
            .ok_or_else(|| IdentityError::InvalidKey("public exponent not invertible".into()))?;

        Ok(Self {
            modulus: Modulus::from(&n),
            n,
            d,
        })
    }

    /// Generate a fresh key with a modulus of exactly `bits` bits.
    pub fn generate<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> Result<Self, IdentityError> {
        if bits < MIN_MODULUS_BITS {
            return Err(IdentityError::ModulusTooSmall(bits));
        }

        let p = random_prime(bits / 2, rng);
        let q = loop {
            let q = random_prime(bits - bits / 2, rng);
            if q != p {
                break q;
            }
        };

        let identity = Self::from_primes(&p, &q)?;
        debug!(bits = identity.n.bits(), "generated identity key");
        Ok(identity)
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }
}

impl Identity for RsaIdentity {
    fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let m = BigUint::from_bytes_be(digest);
        if m >= self.n {
            return Err(IdentityError::MessageTooLarge(digest.len()));
        }
        let s = m.modpow(&self.d, &self.n);
        left_pad(&s, self.modulus.len()).ok_or(IdentityError::MessageTooLarge(digest.len()))
    }

    fn verify(&self, digest: &[u8], signature: &[u8], modulus: &Modulus) -> bool {
        let n = modulus.to_biguint();
        let s = BigUint::from_bytes_be(signature);
        if n.is_zero() || s >= n {
            return false;
        }

        let recovered = s.modpow(&BigUint::from(PUBLIC_EXPONENT), &n);
        match left_pad(&recovered, digest.len()) {
            Some(recovered) => constant_time_eq(&recovered, digest),
            None => false,
        }
    }

    fn encrypt_for(&self, plaintext: &[u8], modulus: &Modulus) -> Result<Vec<u8>, IdentityError> {
        let n = modulus.to_biguint();

        let mut framed = Vec::with_capacity(plaintext.len() + 1);
        framed.push(0x01);
        framed.extend_from_slice(plaintext);
        let m = BigUint::from_bytes_be(&framed);
        if m >= n {
            return Err(IdentityError::MessageTooLarge(plaintext.len()));
        }

        let c = m.modpow(&BigUint::from(PUBLIC_EXPONENT), &n);
        left_pad(&c, modulus.len()).ok_or(IdentityError::MessageTooLarge(plaintext.len()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let c = BigUint::from_bytes_be(ciphertext);
        if c >= self.n {
            return Err(IdentityError::Decryption);
        }

        let framed = c.modpow(&self.d, &self.n).to_bytes_be();
        match framed.split_first() {
            Some((&0x01, plaintext)) => Ok(plaintext.to_vec()),
            _ => Err(IdentityError::Decryption),
        }
    }
}

/// Insecure identity for tests and debugging.
///
/// Signatures are the digest itself and sealing is the identity function.
pub struct NullIdentity {
    modulus: Modulus,
}

impl NullIdentity {
    /// `modulus` is only an identifier; it carries no key material.
    pub fn new(modulus: &[u8]) -> Self {
        Self {
            modulus: Modulus::from_bytes(modulus),
        }
    }
}

impl Identity for NullIdentity {
    fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, IdentityError> {
        Ok(digest.to_vec())
    }

    fn verify(&self, digest: &[u8], signature: &[u8], _modulus: &Modulus) -> bool {
        constant_time_eq(digest, signature)
    }

    fn encrypt_for(&self, plaintext: &[u8], _modulus: &Modulus) -> Result<Vec<u8>, IdentityError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, IdentityError> {
        Ok(ciphertext.to_vec())
    }
}

fn left_pad(value: &BigUint, len: usize) -> Option<Vec<u8>> {
    let bytes = value.to_bytes_be();
    if bytes.len() > len {
        return None;
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    Some(out)
}

fn random_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    let one = BigUint::one();
    // Top two bits set so the product has exactly the requested size.
    let mask = (&one << (bits - 1)) | (&one << (bits - 2)) | &one;
    let exponent = BigUint::from(PUBLIC_EXPONENT);

    loop {
        let candidate = rng.gen_biguint(bits) | &mask;
        if (&candidate - 1u32) % &exponent == BigUint::zero() {
            continue;
        }
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
            return candidate;
        }
    }
}

/// Miller-Rabin with random witnesses, after trial division.
fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    if *n < BigUint::from(2u32) {
        return false;
    }
    for small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pow2(bits: u32) -> BigUint {
        BigUint::one() << bits
    }

    /// (2^255 - 19) * (2^256 - 2^32 - 977)
    fn key_a() -> RsaIdentity {
        let p = pow2(255) - 19u32;
        let q = pow2(256) - pow2(32) - 977u32;
        RsaIdentity::from_primes(&p, &q).unwrap()
    }

    /// (2^61 - 1) * (2^448 - 2^224 - 1)
    fn key_b() -> RsaIdentity {
        let p = pow2(61) - 1u32;
        let q = pow2(448) - pow2(224) - 1u32;
        RsaIdentity::from_primes(&p, &q).unwrap()
    }

    #[test]
    fn known_primes_build_keys() {
        assert_eq!(key_a().bits(), 511);
        assert_eq!(key_b().bits(), 509);
    }

    #[test]
    fn sign_and_verify() {
        let a = key_a();
        let b = key_b();
        let digest = [0x42u8; 32];

        let signature = a.sign(&digest).unwrap();
        assert_eq!(signature.len(), a.modulus().len());
        assert!(b.verify(&digest, &signature, a.modulus()));
        assert!(!b.verify(&digest, &signature, b.modulus()));

        let mut other = digest;
        other[0] ^= 1;
        assert!(!b.verify(&other, &signature, a.modulus()));
    }

    #[test]
    fn digest_with_leading_zero_verifies() {
        let a = key_a();
        let mut digest = [0x11u8; 32];
        digest[0] = 0;
        digest[1] = 0;
        let signature = a.sign(&digest).unwrap();
        assert!(a.verify(&digest, &signature, a.modulus()));
    }

    #[test]
    fn seal_and_open() {
        let a = key_a();
        let b = key_b();
        let mut seed = [0u8; 32];
        seed[..4].copy_from_slice(&[0, 0, 9, 9]);

        let sealed = a.encrypt_for(&seed, b.modulus()).unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), seed);
        assert!(a.decrypt(&sealed).map_or(true, |opened| opened != seed));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let a = key_a();
        let too_big = vec![0xFFu8; 64];
        assert!(matches!(
            a.encrypt_for(&too_big, a.modulus()),
            Err(IdentityError::MessageTooLarge(64))
        ));
        assert!(a.sign(&too_big).is_err());
    }

    #[test]
    fn bad_primes_are_rejected() {
        let p = pow2(61) - 1u32;
        assert!(RsaIdentity::from_primes(&p, &p).is_err());

        // p - 1 = 2 * 65537, so e has no inverse.
        let e_multiple_plus_one = BigUint::from(131_075u32);
        assert!(matches!(
            RsaIdentity::from_primes(&e_multiple_plus_one, &(pow2(255) - 19u32)),
            Err(IdentityError::InvalidKey(_))
        ));
    }

    #[test]
    fn generated_key_has_requested_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = RsaIdentity::generate(320, &mut rng).unwrap();
        assert_eq!(identity.bits(), 320);

        let digest = [3u8; 8];
        let signature = identity.sign(&digest).unwrap();
        assert!(identity.verify(&digest, &signature, identity.modulus()));
    }

    #[test]
    fn keys_too_small_for_a_seed_are_rejected() {
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(MIN_MODULUS_BITS, 264);
        assert!(matches!(
            RsaIdentity::generate(128, &mut rng),
            Err(IdentityError::ModulusTooSmall(128))
        ));
        assert!(matches!(
            RsaIdentity::generate(MIN_MODULUS_BITS - 1, &mut rng),
            Err(IdentityError::ModulusTooSmall(263))
        ));

        // 61 + 127 bits
        let small = RsaIdentity::from_primes(&(pow2(61) - 1u32), &(pow2(127) - 1u32));
        assert!(matches!(small, Err(IdentityError::ModulusTooSmall(188))));
    }

    #[test]
    fn smallest_key_seals_any_seed_and_signs_any_digest() {
        let mut rng = StdRng::seed_from_u64(3);
        let smallest = RsaIdentity::generate(MIN_MODULUS_BITS, &mut rng).unwrap();
        let sender = key_a();

        let seed = [0xFFu8; SEED_LEN];
        let sealed = sender.encrypt_for(&seed, smallest.modulus()).unwrap();
        assert_eq!(smallest.decrypt(&sealed).unwrap(), seed);

        let digest = [0xFFu8; 32];
        let signature = smallest.sign(&digest).unwrap();
        assert!(sender.verify(&digest, &signature, smallest.modulus()));
    }

    #[test]
    fn primality_test_agrees_with_known_values() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(is_probable_prime(&(pow2(127) - 1u32), 16, &mut rng));
        assert!(!is_probable_prime(&(pow2(128) - 1u32), 16, &mut rng));
        // Carmichael number.
        assert!(!is_probable_prime(&BigUint::from(561u32), 16, &mut rng));
    }

    #[test]
    fn null_identity_round_trips() {
        let null = NullIdentity::new(b"\0\0null-node");
        assert_eq!(null.modulus().as_bytes(), b"null-node");

        let signature = null.sign(b"digest").unwrap();
        assert!(null.verify(b"digest", &signature, null.modulus()));
        assert!(!null.verify(b"digesT", &signature, null.modulus()));
        assert_eq!(null.decrypt(&null.encrypt_for(b"seed", null.modulus()).unwrap()).unwrap(), b"seed");
    }

    #[test]
    fn modulus_strips_leading_zeros() {
        let modulus = Modulus::from_bytes(&[0, 0, 0xAB, 0x01]);
        assert_eq!(modulus.as_bytes(), &[0xAB, 0x01]);
        assert_eq!(format!("{modulus:x}"), "ab01");
    }
}
