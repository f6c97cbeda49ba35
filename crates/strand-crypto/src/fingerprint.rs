//! Polynomial fingerprinting by Horner's rule
//!
//! A byte sequence is read as the coefficients of a polynomial and evaluated
//! at the secret seed over wrapping 64-bit arithmetic:
//!
//! `eval(data, r) = ((…((data[0]·r + data[1])·r + data[2])·r …)·r + data[L−1])`
//!
//! The family is additively homomorphic on equal-length inputs under
//! carry-free byte-wise addition, which lets a verifier check linear
//! combinations of fragments without seeing the fragments themselves.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Seeded polynomial fingerprint function
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    seed: u64,
}

impl Fingerprint {
    /// Create a fingerprint function at a fixed evaluation point
    ///
    /// A zero seed degenerates to evaluating only the last byte, so it is
    /// remapped to 1.
    pub fn new_seeded(seed: u64) -> Self {
        Self {
            seed: if seed == 0 { 1 } else { seed },
        }
    }

    /// Create a fingerprint function at a fresh random evaluation point
    pub fn new_random() -> Self {
        Self::new_seeded(rand::thread_rng().gen())
    }

    /// The evaluation point
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Evaluate the fingerprint of a byte sequence
    pub fn eval(&self, data: &[u8]) -> u64 {
        let mut acc = 0u64;
        for &byte in data {
            acc = acc.wrapping_mul(self.seed).wrapping_add(byte as u64);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_deterministic() {
        let fp = Fingerprint::new_seeded(0x9e3779b97f4a7c15);
        let data = b"The quick brown fox jumps over the lazy dog";

        assert_eq!(fp.eval(data), fp.eval(data));
        assert_eq!(fp.eval(data), Fingerprint::new_seeded(fp.seed()).eval(data));
    }

    #[test]
    fn test_zero_seed_remapped() {
        let fp = Fingerprint::new_seeded(0);
        assert_eq!(fp.seed(), 1);
    }

    #[test]
    fn test_horner_matches_direct_evaluation() {
        // eval([a, b, c], r) = a·r² + b·r + c
        let fp = Fingerprint::new_seeded(7);
        assert_eq!(fp.eval(&[2, 3, 4]), 2 * 49 + 3 * 7 + 4);
        assert_eq!(fp.eval(&[]), 0);
        assert_eq!(fp.eval(&[9]), 9);
    }

    #[test]
    fn test_seed_separates_inputs() {
        let a = Fingerprint::new_seeded(1234567);
        let b = Fingerprint::new_seeded(7654321);
        let data = b"same bytes, different evaluation point";

        assert_ne!(a.eval(data), b.eval(data));
    }

    #[test]
    fn test_additive_homomorphism() {
        // Byte-wise sums stay below 256, so no carries are lost and
        // eval(a) + eval(b) == eval(a + b) over wrapping u64 arithmetic.
        let fp = Fingerprint::new_random();
        let a: Vec<u8> = (0..64).map(|i| i as u8).collect();
        let b: Vec<u8> = (0..64).map(|i| (127 - i) as u8).collect();
        let sum: Vec<u8> = a.iter().zip(&b).map(|(x, y)| x.wrapping_add(*y)).collect();

        assert_eq!(fp.eval(&a).wrapping_add(fp.eval(&b)), fp.eval(&sum));
    }

    proptest! {
        #[test]
        fn prop_homomorphism_carry_free(
            seed in any::<u64>(),
            pairs in proptest::collection::vec((0u8..128, 0u8..128), 1..256),
        ) {
            let fp = Fingerprint::new_seeded(seed);
            let a: Vec<u8> = pairs.iter().map(|(x, _)| *x).collect();
            let b: Vec<u8> = pairs.iter().map(|(_, y)| *y).collect();
            let sum: Vec<u8> = pairs.iter().map(|(x, y)| x + y).collect();

            prop_assert_eq!(fp.eval(&a).wrapping_add(fp.eval(&b)), fp.eval(&sum));
        }
    }
}
