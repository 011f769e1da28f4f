//! Shared fixtures: deterministic keys and lockstep drivers.

#![allow(dead_code)]

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;

use nodegate_crypto::{Identity, RsaIdentity};
use nodegate_gateway::{Gateway, GatewayConfig, LocalIdentity};

fn pow2(bits: u32) -> BigUint {
    BigUint::one() << bits
}

fn rsa(p: BigUint, q: BigUint) -> Arc<RsaIdentity> {
    Arc::new(RsaIdentity::from_primes(&p, &q).unwrap())
}

/// (2^221 - 3) * (2^251 - 9), 472 bits.
pub fn key_a() -> Arc<RsaIdentity> {
    rsa(pow2(221) - 3u32, pow2(251) - 9u32)
}

/// (2^89 - 1) * (2^383 - 187), 472 bits.
pub fn key_b() -> Arc<RsaIdentity> {
    rsa(pow2(89) - 1u32, pow2(383) - 187u32)
}

/// B's key before rotation: (2^127 - 1) * (2^521 - 1).
pub fn key_b_old() -> Arc<RsaIdentity> {
    rsa(pow2(127) - 1u32, pow2(521) - 1u32)
}

/// An unrelated key: (2^61 - 1) * (2^607 - 1).
pub fn key_c() -> Arc<RsaIdentity> {
    rsa(pow2(61) - 1u32, pow2(607) - 1u32)
}

pub fn local(node: &str, identity: Arc<dyn Identity>) -> LocalIdentity {
    LocalIdentity::named("g", node, identity).unwrap()
}

pub fn gateway(local: LocalIdentity) -> Gateway {
    Gateway::new(GatewayConfig::default(), local)
}

/// Node A and node B with the default configuration.
pub fn pair() -> (Gateway, Gateway) {
    (
        gateway(local("A", key_a())),
        gateway(local("B", key_b())),
    )
}

/// One message A -> B, then one message B -> A. Rejections are expected
/// while errors converge, so results are ignored.
pub fn round_trip(a: &Gateway, b: &Gateway) {
    let _ = b.process_message(&a.get_message());
    let _ = a.process_message(&b.get_message());
}

/// Round trips until both sides report `connected()`; the count used.
pub fn drive_until_connected(a: &Gateway, b: &Gateway, max_rounds: usize) -> Option<usize> {
    for round in 1..=max_rounds {
        round_trip(a, b);
        if a.connected() && b.connected() {
            return Some(round);
        }
    }
    None
}
