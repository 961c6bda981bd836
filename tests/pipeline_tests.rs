// tests/pipeline_tests.rs
//
// End-to-end tests for the per-phase recomputation.
//
// These tests verify:
// 1. Generation + evaluation is bit-for-bit deterministic.
// 2. Calibrated coefficients stay inside their bounds for every case.
// 3. The T=240 / seed 42 conciencia scenario evaluates without assimilation.
// 4. A nudged (legacy) evaluation reaches the tautology guard.
// 5. EDI rises as the full model gets closer to the observations and falls
//    as the null model does.
// 6. C5 sensitivity runs use perturbation seeds 20..24 deterministically.

use std::cell::RefCell;

use emergence_audit::calibration::calibrate_reduced;
use emergence_audit::config::{CaseRegistry, PipelineConfig};
use emergence_audit::output::BuildInfo;
use emergence_audit::runner::{perturb_params, RunPolicy};
use emergence_audit::synthetic::{self, SyntheticData};
use emergence_audit::types::{FullOutput, ModelParams, Phase, ReducedOutput, Series};
use emergence_audit::validation::Verdict;
use emergence_audit::{CasePipeline, GridSimulator, Simulator};

fn conciencia() -> emergence_audit::CaseConfig {
    CaseRegistry::builtin()
        .get("02_caso_conciencia")
        .cloned()
        .unwrap()
}

fn data(horizon: usize, seed: u64) -> SyntheticData {
    synthetic::generate(
        horizon,
        &conciencia(),
        &PipelineConfig::default().synthetic,
        seed,
    )
}

// =============================================================================
// Fixed-series double
// =============================================================================

/// Returns prescribed series instead of simulating.
///
/// - full runs:    obs + offset + gain·(forcing − base forcing)
/// - null runs:    obs + null_offset (macro_coupling = forcing_scale = 0)
/// - reduced/ODE:  obs + offset
///
/// Every call is recorded as (seed, params).
struct FixedSeriesSim {
    obs: Series,
    base_forcing: Series,
    offset: f64,
    null_offset: f64,
    gain: f64,
    calls: RefCell<Vec<(u64, ModelParams)>>,
}

impl FixedSeriesSim {
    fn new(data: &SyntheticData, offset: f64, null_offset: f64) -> Self {
        Self {
            obs: data.observed.clone(),
            base_forcing: data.forcing.clone(),
            offset,
            null_offset,
            gain: 0.2,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Simulator for FixedSeriesSim {
    fn simulate_full(&self, p: &ModelParams, steps: usize, seed: u64) -> FullOutput {
        self.calls.borrow_mut().push((seed, p.clone()));
        let null = p.macro_coupling == 0.0 && p.forcing_scale == 0.0;
        let tbar = (0..steps)
            .map(|t| {
                let obs = self.obs.get(t).copied().unwrap_or(0.0);
                if null {
                    obs + self.null_offset
                } else {
                    let shift = p.forcing_at(t) - self.base_forcing.get(t).copied().unwrap_or(0.0);
                    obs + self.offset + self.gain * shift
                }
            })
            .collect();
        FullOutput {
            tbar,
            ..FullOutput::default()
        }
    }

    fn simulate_reduced(&self, _p: &ModelParams, steps: usize, _seed: u64) -> ReducedOutput {
        ReducedOutput {
            tbar: (0..steps)
                .map(|t| self.obs.get(t).copied().unwrap_or(0.0) + self.offset)
                .collect(),
        }
    }
}

// =============================================================================
// Determinism and bounds
// =============================================================================

#[test]
fn phase_evaluation_is_deterministic() {
    let cfg = PipelineConfig {
        horizon: 60,
        ..PipelineConfig::default()
    };
    let sim = GridSimulator::new();
    let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
    let d = data(60, 42);

    let a = pipeline.evaluate_phase(Phase::Synthetic, &d, &conciencia(), 42);
    let b = pipeline.evaluate_phase(Phase::Synthetic, &d, &conciencia(), 42);
    assert_eq!(a.record, b.record);
    assert_eq!(
        serde_json::to_string(&a.record).unwrap(),
        serde_json::to_string(&b.record).unwrap()
    );
}

#[test]
fn calibration_stays_in_bounds_for_every_case() {
    let cfg = PipelineConfig {
        horizon: 80,
        ..PipelineConfig::default()
    };
    let sim = GridSimulator::new();
    let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
    let registry = CaseRegistry::builtin();

    for (i, name) in registry.names().enumerate() {
        let case = registry.get(name).unwrap();
        let d = synthetic::generate(80, case, &cfg.synthetic, i as u64);
        let r = pipeline.evaluate_phase(Phase::Synthetic, &d, case, i as u64);
        let c = &r.record.calibration;
        assert!((0.001..=0.5).contains(&c.ode_alpha), "{name}: alpha {}", c.ode_alpha);
        assert!((0.001..=1.0).contains(&c.ode_beta), "{name}: beta {}", c.ode_beta);
        assert!(cfg.calibration.forcing_scale_grid.contains(&c.forcing_scale));
        assert!(cfg.calibration.macro_coupling_grid.contains(&c.macro_coupling));
        assert!(cfg.calibration.damping_grid.contains(&c.damping));
        assert_eq!(c.assimilation_strength, 0.0);
    }
}

// =============================================================================
// Reference scenario
// =============================================================================

#[test]
fn conciencia_scenario_240_steps_seed_42() {
    let cfg = PipelineConfig::default();
    let sim = GridSimulator::new();
    let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
    let d = data(240, 42);
    assert_eq!(d.len(), 240);
    // Truth starts at 0 and the AR(1) noise at step 0 is 0.
    assert_eq!(d.observed[0], 0.0);
    assert_eq!(d.observed[1].to_bits(), data(240, 42).observed[1].to_bits());

    let fit = calibrate_reduced(&d.observed[..120], &d.forcing[..120], &cfg.calibration);
    assert!((0.001..=0.5).contains(&fit.alpha), "alpha {}", fit.alpha);
    assert!((0.001..=1.0).contains(&fit.beta), "beta {}", fit.beta);

    let r = pipeline.evaluate_phase(Phase::Synthetic, &d, &conciencia(), 42);
    let rec = &r.record;
    let ev = &rec.evaluation;

    assert_eq!(rec.data.steps, 240);
    assert_eq!(rec.data.val_steps, 120);
    assert_eq!(rec.data.start, "2000-01-01");
    assert_eq!(rec.data.end, "2019-12-01");
    assert_eq!(rec.data.split, "2010-01-01");
    assert_eq!(rec.calibration.assimilation_strength, 0.0);

    assert!(ev.errors.rmse_abm.is_finite() && ev.errors.rmse_abm > 1e-6);
    assert!(!ev.emergence.tautological);
    assert!(ev.errors.edi_control.is_finite());
    assert!(ev.emergence.effective_information >= 0.0);
    assert_eq!(ev.errors.edi_control, ev.emergence.edi_control);
    assert!(ev.sensitivity.mean_min <= ev.sensitivity.mean_max);

    let expected = if ev.overall_pass {
        Verdict::Validated
    } else {
        Verdict::NotValidated
    };
    assert_eq!(ev.verdict, expected);
}

#[test]
fn nudged_evaluation_is_tagged_tautological() {
    let cfg = PipelineConfig::default();
    let sim = GridSimulator::new();
    let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test())
        .with_policy(RunPolicy::LegacyAssimilation { strength: 1.0 });
    let d = data(120, 42);

    let r = pipeline.evaluate_phase(Phase::Synthetic, &d, &conciencia(), 42);
    let ev = &r.record.evaluation;
    assert_eq!(r.record.calibration.assimilation_strength, 1.0);
    assert!(ev.errors.rmse_abm < 1e-6);
    assert!(ev.emergence.tautological);
    assert!(!ev.overall_pass);
    assert_eq!(ev.verdict, Verdict::Tautological);
}

// =============================================================================
// Fixed-series double
// =============================================================================

#[test]
fn edi_increases_as_full_model_improves() {
    let cfg = PipelineConfig::default();
    let d = data(120, 7);
    let mut prev = f64::NEG_INFINITY;
    for offset in [0.8, 0.4, 0.2, 0.05] {
        let sim = FixedSeriesSim::new(&d, offset, 1.0);
        let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
        let ev = pipeline
            .evaluate_phase(Phase::Synthetic, &d, &conciencia(), 3)
            .record
            .evaluation;
        assert!((ev.errors.rmse_abm - offset).abs() < 1e-9);
        assert!((ev.errors.rmse_reduced - 1.0).abs() < 1e-9);
        assert!(ev.errors.edi_control > prev);
        prev = ev.errors.edi_control;
    }
}

#[test]
fn edi_falls_as_null_model_improves() {
    let cfg = PipelineConfig::default();
    let d = data(120, 7);
    let mut prev = f64::INFINITY;
    for null_offset in [2.0, 1.0, 0.5, 0.2] {
        let sim = FixedSeriesSim::new(&d, 0.1, null_offset);
        let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
        let ev = pipeline
            .evaluate_phase(Phase::Synthetic, &d, &conciencia(), 3)
            .record
            .evaluation;
        assert!((ev.errors.rmse_abm - 0.1).abs() < 1e-9);
        assert!((ev.errors.rmse_reduced - null_offset).abs() < 1e-9);
        assert!(ev.errors.edi_control < prev);
        prev = ev.errors.edi_control;
    }
}

#[test]
fn fixed_series_double_validates_a_good_model() {
    let cfg = PipelineConfig::default();
    let d = data(240, 42);
    let sim = FixedSeriesSim::new(&d, 0.05, 1.0);
    let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
    let ev = pipeline
        .evaluate_phase(Phase::Synthetic, &d, &conciencia(), 42)
        .record
        .evaluation;

    assert!(ev.criteria.c2_robustness);
    assert!(ev.criteria.c3_replication);
    // Forcing + 0.5 with gain 0.2 lifts the mean by 0.1.
    assert!(ev.criteria.c4_validity);
    assert!(ev.criteria.c5_uncertainty);
    assert!(ev.emergence.pass);
    assert!((ev.errors.edi_control - 0.95).abs() < 1e-6);
}

#[test]
fn sensitivity_runs_use_fixed_perturbation_seeds() {
    let cfg = PipelineConfig::default();
    let d = data(60, 5);
    let base = 100;

    let run = || {
        let sim = FixedSeriesSim::new(&d, 0.1, 1.0);
        let rec = {
            let pipeline = CasePipeline::new(&sim, &cfg, BuildInfo::for_test());
            pipeline.evaluate_phase(Phase::Synthetic, &d, &conciencia(), base)
        };
        (rec, sim.calls.into_inner())
    };
    let (rec_a, calls_a) = run();
    let (rec_b, calls_b) = run();
    assert_eq!(rec_a.record, rec_b.record);
    assert_eq!(calls_a, calls_b);

    // Calibration: 36 grid runs, then full, reduced, perturbed, replication,
    // alt and five sensitivity runs.
    assert_eq!(calls_a.len(), 36 + 10);
    let eval_runs = &calls_a[36..];
    let full_params = &eval_runs[0].1;
    assert_eq!(eval_runs[0].0, base);
    assert!(full_params.assimilation.is_none());

    let sensitivity = &eval_runs[5..];
    for (i, (seed, params)) in sensitivity.iter().enumerate() {
        assert_eq!(*seed, base + 10 + i as u64);
        let expected = perturb_params(full_params, 0.1, 20 + i as u64);
        assert_eq!(params, &expected);
    }

    let perturbed = &eval_runs[2];
    assert_eq!(perturbed.0, base + 3);
    assert_eq!(perturbed.1, perturb_params(full_params, 0.1, 10));
}
