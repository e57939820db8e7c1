//! Deterministic feature hashing for the reference learner.
//!
//! Not cryptographic. The only requirement is that the same (namespace,
//! feature) pair and the same interaction always land on the same weight
//! block, across platforms and across checkpoint/restore.

use crate::Namespace;

const FNV_PRIME: u64 = 1099511628211u64;

/// Hash of feature `index` inside namespace `ns`.
#[must_use]
pub fn feature_hash(ns: Namespace, index: u64) -> u64 {
    splitmix64(((ns.0 as u64) << 56) ^ index)
}

/// Combine an accumulated interaction hash with the next term's hash.
///
/// Order-sensitive: `(a, b)` and `(b, a)` are different cross features.
#[must_use]
pub fn interaction_hash(acc: u64, next: u64) -> u64 {
    acc.wrapping_mul(FNV_PRIME) ^ next
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
