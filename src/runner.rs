// src/runner.rs
//
// Paired simulation runner: builds every parameter variant the validation
// protocol needs and invokes the simulators with fixed, named seeds.
//
// Roles (seed = case seed base + offset):
//   abm, ode, reduced, perturbed, replication, alt, sensitivity[0..5]
//
// Fair evaluation (the default policy) strips assimilation from every run.
// The legacy policy keeps a nudging term toward the observations and only
// exists to reproduce the tautological zero-error condition.

use crate::config::{SeedPlanConfig, ValidationThresholds};
use crate::rng::NoiseSource;
use crate::simulator::Simulator;
use crate::types::{Assimilation, FullOutput, ModelParams, ReducedOutput};

/// Named seeds for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPlan {
    pub abm: u64,
    pub ode: u64,
    pub reduced: u64,
    pub perturbed: u64,
    pub replication: u64,
    pub alt: u64,
    pub sensitivity: Vec<u64>,
    /// Seeds of the parameter perturbations (C2 and C5).
    pub robustness_perturbation: u64,
    pub sensitivity_perturbation: Vec<u64>,
}

impl SeedPlan {
    pub fn new(base: u64, cfg: &SeedPlanConfig) -> Self {
        Self {
            abm: base,
            ode: base.wrapping_add(cfg.ode),
            reduced: base.wrapping_add(cfg.reduced),
            perturbed: base.wrapping_add(cfg.perturbed),
            replication: base.wrapping_add(cfg.replication),
            alt: base.wrapping_add(cfg.alt),
            sensitivity: (0..cfg.sensitivity_runs as u64)
                .map(|k| base.wrapping_add(cfg.sensitivity_start + k))
                .collect(),
            robustness_perturbation: cfg.robustness_perturbation_seed,
            sensitivity_perturbation: (0..cfg.sensitivity_runs as u64)
                .map(|k| cfg.sensitivity_perturbation_start + k)
                .collect(),
        }
    }
}

/// How assimilation is handled in evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RunPolicy {
    /// No nudging in any run.
    #[default]
    Fair,
    /// Nudge the full and ODE runs toward the observations. Reproduces the
    /// tautological zero-error records.
    LegacyAssimilation { strength: f64 },
}

/// Everything the evaluator needs, one entry per role.
#[derive(Debug, Clone)]
pub struct PairedOutputs {
    pub full: FullOutput,
    pub ode: ReducedOutput,
    pub reduced: FullOutput,
    pub perturbed: FullOutput,
    pub replication: FullOutput,
    pub alt: FullOutput,
    pub sensitivity: Vec<FullOutput>,
    /// Assimilation strength actually used for the full run.
    pub assimilation_strength: f64,
}

/// Perturb diffusion, macro_coupling, forcing_scale, damping and noise (in
/// that order, non-zero values only) by `p += p·pct·U(−1, 1)`.
pub fn perturb_params(params: &ModelParams, pct: f64, seed: u64) -> ModelParams {
    let mut rng = NoiseSource::new(seed);
    let mut p = params.clone();
    for value in [
        &mut p.diffusion,
        &mut p.macro_coupling,
        &mut p.forcing_scale,
        &mut p.damping,
        &mut p.noise,
    ] {
        if *value != 0.0 {
            *value += *value * pct * rng.uniform(-1.0, 1.0);
        }
    }
    p
}

pub struct PairedRunner<'a, S: Simulator> {
    sim: &'a S,
    seeds: SeedPlan,
    thresholds: &'a ValidationThresholds,
    policy: RunPolicy,
}

impl<'a, S: Simulator> PairedRunner<'a, S> {
    pub fn new(sim: &'a S, seeds: SeedPlan, thresholds: &'a ValidationThresholds) -> Self {
        Self {
            sim,
            seeds,
            thresholds,
            policy: RunPolicy::Fair,
        }
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Evaluation parameter set for the full/ODE runs under the current policy.
    pub fn evaluation_params(&self, calibrated: &ModelParams, observed: &[f64]) -> ModelParams {
        match self.policy {
            RunPolicy::Fair => calibrated.without_assimilation(),
            RunPolicy::LegacyAssimilation { strength } => ModelParams {
                assimilation: Some(Assimilation {
                    series: observed.to_vec(),
                    strength,
                }),
                ..calibrated.clone()
            },
        }
    }

    /// Run every role over `steps` steps.
    pub fn run(&self, calibrated: &ModelParams, observed: &[f64], steps: usize) -> PairedOutputs {
        let eval = self.evaluation_params(calibrated, observed);
        let fair = calibrated.without_assimilation();
        let pct = self.thresholds.perturbation_pct;

        let full = self.sim.simulate_full(&eval, steps, self.seeds.abm);
        let ode = self.sim.simulate_reduced(&eval, steps, self.seeds.ode);

        // Null hypothesis: no macro influence, no nudging.
        let reduced = self
            .sim
            .simulate_full(&fair.reduced(), steps, self.seeds.reduced);

        let perturbed_params = perturb_params(&fair, pct, self.seeds.robustness_perturbation);
        let perturbed = self
            .sim
            .simulate_full(&perturbed_params, steps, self.seeds.perturbed);

        let replication = self.sim.simulate_full(&eval, steps, self.seeds.replication);

        let shift = self.thresholds.validity_forcing_shift;
        let alt_params = ModelParams {
            forcing: eval.forcing.iter().map(|f| f + shift).collect(),
            ..eval.clone()
        };
        let alt = self.sim.simulate_full(&alt_params, steps, self.seeds.alt);

        let sensitivity = self
            .seeds
            .sensitivity_perturbation
            .iter()
            .zip(&self.seeds.sensitivity)
            .map(|(&perturb_seed, &run_seed)| {
                let p = perturb_params(&fair, pct, perturb_seed);
                self.sim.simulate_full(&p, steps, run_seed)
            })
            .collect();

        PairedOutputs {
            full,
            ode,
            reduced,
            perturbed,
            replication,
            alt,
            sensitivity,
            assimilation_strength: eval.assimilation_strength(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::simulator::tests::sample_params;
    use std::cell::RefCell;

    #[test]
    fn seed_plan_offsets() {
        let plan = SeedPlan::new(100, &PipelineConfig::default().seeds);
        assert_eq!(plan.abm, 100);
        assert_eq!(plan.ode, 101);
        assert_eq!(plan.reduced, 102);
        assert_eq!(plan.perturbed, 103);
        assert_eq!(plan.replication, 104);
        assert_eq!(plan.alt, 105);
        assert_eq!(plan.sensitivity, vec![110, 111, 112, 113, 114]);
        assert_eq!(plan.robustness_perturbation, 10);
        assert_eq!(plan.sensitivity_perturbation, vec![20, 21, 22, 23, 24]);
    }

    #[test]
    fn perturbation_is_bounded_and_skips_zeros() {
        let mut base = sample_params(10);
        base.damping = 0.0;
        for seed in 0..50 {
            let p = perturb_params(&base, 0.1, seed);
            assert_eq!(p.damping, 0.0);
            assert!((p.diffusion - base.diffusion).abs() <= 0.1 * base.diffusion + 1e-15);
            assert!((p.macro_coupling - base.macro_coupling).abs() <= 0.1 * base.macro_coupling + 1e-15);
            // Untouched fields.
            assert_eq!(p.ode_alpha, base.ode_alpha);
            assert_eq!(p.forcing, base.forcing);
        }
        assert_eq!(perturb_params(&base, 0.1, 7), perturb_params(&base, 0.1, 7));
    }

    #[derive(Default)]
    struct Spy {
        full: RefCell<Vec<(u64, f64, f64, f64)>>,
        reduced: RefCell<Vec<(u64, f64)>>,
    }

    impl Simulator for Spy {
        fn simulate_full(&self, p: &ModelParams, steps: usize, seed: u64) -> FullOutput {
            self.full.borrow_mut().push((
                seed,
                p.macro_coupling,
                p.forcing_scale,
                p.assimilation_strength(),
            ));
            FullOutput {
                tbar: vec![0.0; steps],
                ..FullOutput::default()
            }
        }

        fn simulate_reduced(&self, p: &ModelParams, steps: usize, seed: u64) -> ReducedOutput {
            self.reduced
                .borrow_mut()
                .push((seed, p.assimilation_strength()));
            ReducedOutput {
                tbar: vec![0.0; steps],
            }
        }
    }

    #[test]
    fn fair_policy_never_assimilates() {
        let spy = Spy::default();
        let thresholds = ValidationThresholds::default();
        let runner = PairedRunner::new(&spy, SeedPlan::new(0, &PipelineConfig::default().seeds), &thresholds);
        let mut calibrated = sample_params(12);
        calibrated.assimilation = Some(Assimilation {
            series: vec![1.0; 12],
            strength: 1.0,
        });

        let out = runner.run(&calibrated, &[1.0; 12], 12);
        assert_eq!(out.assimilation_strength, 0.0);
        assert_eq!(out.sensitivity.len(), 5);

        let full = spy.full.borrow();
        // full, reduced, perturbed, replication, alt + 5 sensitivity runs.
        assert_eq!(full.len(), 10);
        assert!(full.iter().all(|r| r.3 == 0.0));
        assert!(spy.reduced.borrow().iter().all(|r| r.1 == 0.0));

        // The reduced role zeroes macro coupling and forcing scale.
        let reduced_run = full.iter().find(|r| r.0 == 2).unwrap();
        assert_eq!((reduced_run.1, reduced_run.2), (0.0, 0.0));
    }

    #[test]
    fn legacy_policy_nudges_full_and_ode_runs() {
        let spy = Spy::default();
        let thresholds = ValidationThresholds::default();
        let runner = PairedRunner::new(&spy, SeedPlan::new(0, &PipelineConfig::default().seeds), &thresholds)
            .with_policy(RunPolicy::LegacyAssimilation { strength: 1.0 });
        let out = runner.run(&sample_params(12), &[1.0; 12], 12);
        assert_eq!(out.assimilation_strength, 1.0);
        let full = spy.full.borrow();
        assert_eq!(full.iter().find(|r| r.0 == 0).unwrap().3, 1.0);
        // The null model is never nudged.
        assert_eq!(full.iter().find(|r| r.0 == 2).unwrap().3, 0.0);
    }
}
