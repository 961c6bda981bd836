// src/rng.rs
//
// Deterministic noise source shared by the generator, the reference
// simulators and the parameter perturbations.
//
// All sampling is deterministic given a seed: ChaCha8 is portable across
// platforms, so identical seeds reproduce bit-identical series.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct NoiseSource {
    rng: ChaCha8Rng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform sample in `[lo, hi]`; collapses to `lo` for empty ranges.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if lo >= hi {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    /// Normal sample with mean 0 and standard deviation `sigma`
    /// (Box–Muller, one draw per call).
    pub fn gauss(&mut self, sigma: f64) -> f64 {
        if sigma == 0.0 {
            return 0.0;
        }
        // u1 in (0, 1] keeps ln() finite.
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        sigma * z
    }
}
