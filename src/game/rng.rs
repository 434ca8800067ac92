//! Deterministic match RNG and provable-fairness commitments
//!
//! Every random decision inside a match draws from a single seeded stream.
//! The seed's hash commitment is published before the match starts and the
//! raw seed is revealed in the post-match audit trail, so clients can verify
//! no mid-match re-seeding occurred.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Domain separator for seed commitments
const COMMITMENT_DOMAIN: &[u8] = b"RUNNER_MATCH_SEED_V1";

/// Seeded PRNG over 32-bit integer arithmetic (mulberry32 mixing).
///
/// Given the same seed, produces the exact same sequence of draws on any
/// platform and in any conforming implementation regardless of language:
/// only wrapping integer ops, no floating-point transcendentals.
#[derive(Clone, Debug)]
pub struct GameRng {
    state: u32,
}

impl GameRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next draw in [0, 1)
    pub fn next(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6D2B79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        ((t ^ (t >> 14)) as f64) / 4294967296.0
    }

    /// Random boolean, true with probability `p`
    pub fn next_bool(&mut self, p: f64) -> bool {
        self.next() < p
    }

    /// Uniform draw in [min, max)
    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next() * (max - min)
    }

    /// Uniform index in [0, len)
    pub fn next_index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let idx = (self.next() * len as f64) as usize;
        idx.min(len - 1)
    }
}

/// Generate a fresh match seed from OS entropy
pub fn generate_seed() -> u32 {
    rand::rngs::OsRng.next_u32()
}

/// One-way commitment to a seed, published before the match starts
pub fn seed_commitment(seed: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update(seed.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Check a revealed seed against its published commitment
pub fn verify_commitment(seed: u32, commitment: &str) -> bool {
    seed_commitment(seed) == commitment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        for seed in [0u32, 1, 42, 0xDEAD_BEEF, u32::MAX, generate_seed()] {
            let mut a = GameRng::new(seed);
            let mut b = GameRng::new(seed);
            for _ in 0..10_000 {
                assert_eq!(a.next().to_bits(), b.next().to_bits());
            }
        }
    }

    #[test]
    fn known_values_never_change() {
        // Regression anchors; a change here breaks replay verification of
        // every settled match.
        let mut rng = GameRng::new(42);
        assert_eq!(rng.next(), 2581720956.0 / 4294967296.0);
        assert_eq!(rng.next(), 1925393290.0 / 4294967296.0);
        assert_eq!(rng.next(), 3661312704.0 / 4294967296.0);

        let mut rng = GameRng::new(12345);
        assert_eq!(rng.next(), 4207900869.0 / 4294967296.0);

        let mut rng = GameRng::new(0);
        assert_eq!(rng.next(), 1144304738.0 / 4294967296.0);
    }

    #[test]
    fn draws_stay_in_unit_interval() {
        let mut rng = GameRng::new(777);
        for _ in 0..10_000 {
            let v = rng.next();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn next_bool_extremes() {
        let mut rng = GameRng::new(9);
        for _ in 0..100 {
            assert!(!rng.next_bool(0.0));
            assert!(rng.next_bool(1.0));
        }
    }

    #[test]
    fn next_index_bounds() {
        let mut rng = GameRng::new(31);
        for _ in 0..1_000 {
            assert!(rng.next_index(7) < 7);
        }
        assert_eq!(rng.next_index(0), 0);
        assert_eq!(rng.next_index(1), 0);
    }

    #[test]
    fn commitment_round_trip() {
        let commitment = seed_commitment(0xC0FF_EE42);
        assert_eq!(
            commitment,
            "036db3c1e72093feb30167e4599f0a6e381111d491ead8a9a75ada760bf33040"
        );
        assert!(verify_commitment(0xC0FF_EE42, &commitment));
        assert!(!verify_commitment(0xC0FF_EE43, &commitment));
    }

    #[test]
    fn generated_seeds_vary() {
        // OS entropy; a collision across a handful of draws would be a bug.
        let seeds: Vec<u32> = (0..8).map(|_| generate_seed()).collect();
        let first = seeds[0];
        assert!(seeds.iter().any(|&s| s != first) || first != 0);
    }
}
