// src/simulator.rs
//
// Simulator capability set consumed by the calibrator and the paired runner.
//
// - Simulator: trait over {simulate_full, simulate_reduced}. The pipeline
//   never depends on a concrete model, so tests can swap in doubles that
//   return fixed series.
// - GridSimulator: reference implementation. Full model = N×N agent grid
//   with diffusion, macro coupling and direct forcing; reduced model = the
//   first-order macro balance dX = α(F − βX) + σξ.
//
// Contract: identical params + identical seed => bit-identical output.

use crate::rng::NoiseSource;
use crate::types::{FullOutput, GridHistory, ModelParams, ReducedOutput, Series};

pub trait Simulator {
    /// Agent-based run with macro coupling ("full" model).
    fn simulate_full(&self, params: &ModelParams, steps: usize, seed: u64) -> FullOutput;

    /// Macro balance ODE run ("reduced" model).
    fn simulate_reduced(&self, params: &ModelParams, steps: usize, seed: u64) -> ReducedOutput;
}

impl<S: Simulator + ?Sized> Simulator for &S {
    fn simulate_full(&self, params: &ModelParams, steps: usize, seed: u64) -> FullOutput {
        (**self).simulate_full(params, steps, seed)
    }

    fn simulate_reduced(&self, params: &ModelParams, steps: usize, seed: u64) -> ReducedOutput {
        (**self).simulate_reduced(params, steps, seed)
    }
}

/// Euler integration of `x[t+1] = x[t] + α(F[t] − βx[t]) + σξ`, optionally
/// nudged toward `assimilation` after each step.
///
/// `x[0] = t0`; the returned series has exactly `steps` samples.
#[allow(clippy::too_many_arguments)]
pub fn integrate_relaxation(
    t0: f64,
    alpha: f64,
    beta: f64,
    noise: f64,
    forcing: &[f64],
    steps: usize,
    assimilation: Option<(&[f64], f64)>,
    rng: &mut NoiseSource,
) -> Series {
    let mut xs = Vec::with_capacity(steps);
    if steps == 0 {
        return xs;
    }

    let mut x = t0;
    xs.push(x);
    for t in 1..steps {
        let f = forcing.get(t - 1).copied().unwrap_or(0.0);
        x += alpha * (f - beta * x) + rng.gauss(noise);
        if let Some((target, strength)) = assimilation {
            if let Some(&obs) = target.get(t) {
                x += strength * (obs - x);
            }
        }
        xs.push(x);
    }
    xs
}

/// Reference ABM/ODE pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct GridSimulator;

impl GridSimulator {
    pub fn new() -> Self {
        Self
    }
}

impl Simulator for GridSimulator {
    fn simulate_full(&self, params: &ModelParams, steps: usize, seed: u64) -> FullOutput {
        let n = params.grid_size.max(1);
        let cells = n * n;
        let mut rng = NoiseSource::new(seed);

        // Initial heterogeneity around t0.
        let mut grid: Vec<f64> = (0..cells)
            .map(|_| params.t0 + rng.gauss(params.h0 * params.noise))
            .collect();
        let mut next = vec![0.0; cells];

        // Macro state follows the calibrated balance equation.
        let mut macro_x = params.t0;

        let mut out = FullOutput {
            tbar: Vec::with_capacity(steps),
            grid: GridHistory::new(n),
            forcing: Vec::with_capacity(steps),
        };

        for t in 0..steps {
            let f = params.forcing_at(t);

            if t > 0 {
                let f_prev = params.forcing_at(t - 1);
                macro_x += params.ode_alpha * (f_prev - params.ode_beta * macro_x);

                for row in 0..n {
                    for col in 0..n {
                        let i = row * n + col;
                        let c = grid[i];

                        // Von Neumann neighbourhood, reflecting boundary.
                        let up = if row > 0 { grid[i - n] } else { c };
                        let down = if row + 1 < n { grid[i + n] } else { c };
                        let left = if col > 0 { grid[i - 1] } else { c };
                        let right = if col + 1 < n { grid[i + 1] } else { c };
                        let neigh = 0.25 * (up + down + left + right);

                        next[i] = c
                            + params.diffusion * (neigh - c)
                            + params.macro_coupling * (macro_x - c)
                            + params.forcing_scale * f_prev
                            - params.damping * c
                            + rng.gauss(params.noise);
                    }
                }
                std::mem::swap(&mut grid, &mut next);

                if let Some(assim) = &params.assimilation {
                    if let Some(&obs) = assim.series.get(t) {
                        for c in grid.iter_mut() {
                            *c += assim.strength * (obs - *c);
                        }
                    }
                }
            }

            let tbar = grid.iter().sum::<f64>() / cells as f64;
            out.tbar.push(tbar);
            out.grid.frames.push(grid.clone());
            out.forcing.push(f);
        }

        out
    }

    fn simulate_reduced(&self, params: &ModelParams, steps: usize, seed: u64) -> ReducedOutput {
        let mut rng = NoiseSource::new(seed);
        let assimilation = params
            .assimilation
            .as_ref()
            .map(|a| (a.series.as_slice(), a.strength));
        let tbar = integrate_relaxation(
            params.t0,
            params.ode_alpha,
            params.ode_beta,
            params.ode_noise,
            &params.forcing,
            steps,
            assimilation,
            &mut rng,
        );
        ReducedOutput { tbar }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metrics::{mean, rmse};
    use crate::types::Assimilation;

    pub(crate) fn sample_params(steps: usize) -> ModelParams {
        ModelParams {
            grid_size: 6,
            diffusion: 0.2,
            noise: 0.02,
            macro_coupling: 0.6,
            t0: 0.0,
            h0: 0.5,
            forcing: (0..steps)
                .map(|t| 0.003 * t as f64 + 0.5 * (t as f64 * 0.5).sin())
                .collect(),
            forcing_scale: 0.2,
            damping: 0.05,
            ode_alpha: 0.08,
            ode_beta: 0.03,
            ode_noise: 0.01,
            assimilation: None,
        }
    }

    #[test]
    fn full_run_is_bit_identical_for_same_seed() {
        let sim = GridSimulator::new();
        let p = sample_params(60);
        let a = sim.simulate_full(&p, 60, 11);
        let b = sim.simulate_full(&p, 60, 11);
        assert_eq!(a, b);
        assert_eq!(a.tbar.len(), 60);
        assert_eq!(a.grid.frames.len(), 60);
        assert_eq!(a.forcing.len(), 60);

        let c = sim.simulate_full(&p, 60, 12);
        assert_ne!(a.tbar, c.tbar);
    }

    #[test]
    fn reduced_run_matches_closed_form_without_noise() {
        let sim = GridSimulator::new();
        let mut p = sample_params(5);
        p.ode_noise = 0.0;
        p.t0 = 1.0;
        p.forcing = vec![2.0; 5];
        let out = sim.simulate_reduced(&p, 5, 0);
        let mut x = 1.0;
        for t in 1..5 {
            x += 0.08 * (2.0 - 0.03 * x);
            assert!((out.tbar[t] - x).abs() < 1e-12);
        }
    }

    #[test]
    fn full_strength_assimilation_reproduces_observations() {
        let sim = GridSimulator::new();
        let steps = 40;
        let obs: Vec<f64> = (0..steps).map(|t| (t as f64 * 0.3).cos()).collect();
        let mut p = sample_params(steps);
        p.t0 = obs[0];
        p.noise = 0.0;
        p.assimilation = Some(Assimilation {
            series: obs.clone(),
            strength: 1.0,
        });
        let out = sim.simulate_full(&p, steps, 3);
        assert!(rmse(&out.tbar, &obs) < 1e-9);
    }

    #[test]
    fn larger_forcing_raises_mean_response() {
        let sim = GridSimulator::new();
        let p = sample_params(120);
        let mut shifted = p.clone();
        shifted.forcing = p.forcing.iter().map(|f| f + 0.5).collect();
        let base = sim.simulate_full(&p, 120, 5);
        let alt = sim.simulate_full(&shifted, 120, 5);
        assert!(mean(&alt.tbar) > mean(&base.tbar));
    }
}
