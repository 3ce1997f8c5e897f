//! Deterministic random number generation.
//!
//! RULE: Nothing in the engine may call any platform RNG.
//! All randomness flows through ModelRng instances derived from the
//! seed carried on the run's OutlierConfig.
//!
//! Each isolation tree gets its own stream, seeded from
//! (seed XOR stream_index * golden ratio). This means:
//!   - Changing the tree count never changes earlier trees' streams.
//!   - Each tree is reproducible in isolation.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

const STREAM_MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

/// A deterministic RNG stream for one model component.
pub struct ModelRng {
    inner: Pcg64Mcg,
}

impl ModelRng {
    /// Create the RNG for `stream` under the run seed.
    /// Stream indices must be stable for a given component.
    pub fn new(seed: u64, stream: u64) -> Self {
        let derived_seed = seed ^ stream.wrapping_mul(STREAM_MULTIPLIER);
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a usize in [0, n). `n` must be > 0.
    pub fn next_index(&mut self, n: usize) -> usize {
        assert!(n > 0, "n must be > 0");
        (self.inner.next_u64() % n as u64) as usize
    }

    /// Roll a float uniformly in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Draw `k` distinct indices from 0..n via a partial Fisher-Yates shuffle.
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..n).collect();
        let k = k.min(n);
        for i in 0..k {
            let j = i + self.next_index(n - i);
            pool.swap(i, j);
        }
        pool.truncate(k);
        pool
    }
}
