// src/synthetic.rs
//
// Synthetic series generator.
//
// forcing[t]  = base + trend·t + amp·sin(2πt / period)
// truth       = relaxation ODE driven by the forcing (noise seeded seed+1)
// observed    = truth + AR(1) micro noise (seeded seed)
//
// Pure function of (horizon, case, seed).

use crate::config::{CaseConfig, SyntheticConfig};
use crate::rng::NoiseSource;
use crate::simulator::integrate_relaxation;
use crate::types::Series;

/// Observed + forcing pair, always the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticData {
    pub observed: Series,
    pub forcing: Series,
}

impl SyntheticData {
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }
}

pub fn forcing_series(steps: usize, case: &CaseConfig, shape: &SyntheticConfig) -> Series {
    let period = if shape.seasonal_period > 0.0 {
        shape.seasonal_period
    } else {
        12.0
    };
    (0..steps)
        .map(|t| {
            let t = t as f64;
            let seasonal =
                case.forcing_seasonal_amp * (2.0 * std::f64::consts::PI * t / period).sin();
            shape.forcing_base + shape.forcing_trend * t + seasonal
        })
        .collect()
}

/// Generate `(observed, forcing)` for one phase.
pub fn generate(
    steps: usize,
    case: &CaseConfig,
    shape: &SyntheticConfig,
    seed: u64,
) -> SyntheticData {
    let forcing = forcing_series(steps, case, shape);

    let mut truth_rng = NoiseSource::new(seed.wrapping_add(1));
    let truth = integrate_relaxation(
        0.0,
        case.ode_alpha,
        case.ode_beta,
        case.ode_noise,
        &forcing,
        steps,
        None,
        &mut truth_rng,
    );

    // Correlated micro noise (inertia).
    let mut noise_rng = NoiseSource::new(seed);
    let mut noise = vec![0.0; steps];
    for t in 1..steps {
        noise[t] = shape.noise_autocorrelation * noise[t - 1] + noise_rng.gauss(case.micro_noise);
    }

    let observed = truth.iter().zip(&noise).map(|(x, n)| x + n).collect();

    SyntheticData { observed, forcing }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaseRegistry, PipelineConfig};

    fn conciencia() -> CaseConfig {
        CaseRegistry::builtin()
            .get("02_caso_conciencia")
            .cloned()
            .unwrap()
    }

    #[test]
    fn generator_is_deterministic() {
        let shape = PipelineConfig::default().synthetic;
        let a = generate(240, &conciencia(), &shape, 42);
        let b = generate(240, &conciencia(), &shape, 42);
        assert_eq!(a.len(), 240);
        assert_eq!(a.forcing.len(), 240);
        for (x, y) in a.observed.iter().zip(&b.observed) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
        assert_eq!(a.forcing, b.forcing);

        let c = generate(240, &conciencia(), &shape, 43);
        assert_ne!(a.observed, c.observed);
    }

    #[test]
    fn first_sample_is_noise_free_truth() {
        // x[0] = 0 and n[0] = 0, whatever the seed.
        let shape = PipelineConfig::default().synthetic;
        let a = generate(240, &conciencia(), &shape, 42);
        assert_eq!(a.observed[0], 0.0);
    }

    #[test]
    fn forcing_has_trend_and_season() {
        let shape = PipelineConfig::default().synthetic;
        let f = forcing_series(25, &conciencia(), &shape);
        assert!(f[0].abs() < 1e-12);
        // Quarter period: trend + full amplitude.
        assert!((f[3] - (0.009 + 0.6)).abs() < 1e-9);
        // Whole periods: only the trend survives.
        assert!((f[12] - 0.036).abs() < 1e-9);
        assert!((f[24] - 0.072).abs() < 1e-9);
    }

    #[test]
    fn single_step_horizon() {
        let shape = PipelineConfig::default().synthetic;
        let d = generate(1, &conciencia(), &shape, 0);
        assert_eq!(d.observed, vec![0.0]);
        assert_eq!(d.forcing.len(), 1);
    }
}
