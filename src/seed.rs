//! Seed factory (C12): deterministic per-loadout RNG seeding.

use sha2::{Digest, Sha256};

/// Derives a deterministic 32-bit seed from a base seed and a count vector.
///
/// `seed(base, counts) = low32(u64) XOR high32(u64)` where `u64` is the first
/// 8 bytes of `sha256("{base}:{counts joined by ,}")`, big-endian.
pub fn seed(base: u64, counts: &[u32]) -> u32 {
    let joined = counts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let input = format!("{base}:{joined}");

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    let value = u64::from_be_bytes(bytes);

    let low = (value & 0xFFFF_FFFF) as u32;
    let high = (value >> 32) as u32;
    low ^ high
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = seed(42, &[1, 2, 3]);
        let b = seed(42, &[1, 2, 3]);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_across_bases() {
        let a = seed(1, &[1, 2, 3]);
        let b = seed(2, &[1, 2, 3]);
        assert_ne!(a, b);
    }

    #[test]
    fn differs_across_counts() {
        let a = seed(1, &[1, 2, 3]);
        let b = seed(1, &[3, 2, 1]);
        assert_ne!(a, b);
    }
}
