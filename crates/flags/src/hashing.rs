//! The stable rollout hash.
//!
//! Percentage and A/B bucketing hash `flag ":" user` with SHA-256 and take
//! the first 16 bytes as a big-endian u128. The function is part of the
//! rollout contract: changing it reshuffles every user's buckets.

use sha2::{Digest, Sha256};

/// 128-bit stable hash over the flag/user pair.
pub fn bucket_hash(flag: &str, user_id: &str) -> u128 {
    let mut hasher = Sha256::new();
    hasher.update(flag.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(bytes)
}

/// Bucket in [0, 100) for percentage rollouts.
pub fn percent_bucket(flag: &str, user_id: &str) -> f64 {
    (bucket_hash(flag, user_id) % 100) as f64
}

/// Variant index for A/B assignment.
pub fn variant_index(flag: &str, user_id: &str, variants: usize) -> usize {
    debug_assert!(variants > 0);
    (bucket_hash(flag, user_id) % variants as u128) as usize
}
