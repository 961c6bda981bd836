// src/pipeline.rs
//
// Per-case recomputation: synthesis -> calibration -> paired runs ->
// validation -> metrics.json.
//
// Every case produces two phases:
// - synthetic: case coefficients, seed base b
// - real:      micro/ODE noise ×1.5, seed base b + 1000
//
// Cases flagged `only_synthetic` keep the real phase of their previous
// metrics.json untouched; it is regenerated only when no usable one exists.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::calibration::{calibrate_full, calibrate_reduced, FullFit, ReducedFit};
use crate::config::{CaseConfig, PipelineConfig};
use crate::logging::{EventSink, PipelineEvent};
use crate::metrics::mean;
use crate::output::{
    metrics_path, read_metrics_value, timestamp_now, BuildInfo, CalibrationRecord, CaseEnvelope,
    DataWindow, OutputError, PhaseEntry, PhaseRecord, Phases,
};
use crate::runner::{PairedRunner, RunPolicy, SeedPlan};
use crate::simulator::Simulator;
use crate::summarize::PhaseSnapshot;
use crate::synthetic::{self, SyntheticData};
use crate::types::{ModelParams, Phase};
use crate::validation::evaluate;

/// Stable per-case seed base: first 8 bytes of SHA-256(name), mod 10 000.
pub fn seed_base(case_name: &str) -> u64 {
    let digest = Sha256::digest(case_name.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) % 10_000
}

/// One evaluated phase plus the raw fits behind it.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub record: PhaseRecord,
    pub reduced_fit: ReducedFit,
    pub full_fit: FullFit,
}

/// What happened to a case directory.
#[derive(Debug, Clone)]
pub enum CaseOutcome {
    Written {
        path: PathBuf,
        envelope: Box<CaseEnvelope>,
    },
    Skipped {
        reason: String,
    },
}

pub struct CasePipeline<'a, S: Simulator> {
    sim: &'a S,
    config: &'a PipelineConfig,
    policy: RunPolicy,
    git: BuildInfo,
    fixed_timestamp: Option<String>,
    create_missing: bool,
}

impl<'a, S: Simulator> CasePipeline<'a, S> {
    pub fn new(sim: &'a S, config: &'a PipelineConfig, git: BuildInfo) -> Self {
        Self {
            sim,
            config,
            policy: RunPolicy::Fair,
            git,
            fixed_timestamp: None,
            create_missing: false,
        }
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stamp every envelope with `ts` instead of the wall clock.
    pub fn with_fixed_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.fixed_timestamp = Some(ts.into());
        self
    }

    /// Create missing case directories instead of skipping them.
    pub fn create_missing(mut self, yes: bool) -> Self {
        self.create_missing = yes;
        self
    }

    /// Calibrate, run and validate one phase over `data`.
    pub fn evaluate_phase(
        &self,
        phase: Phase,
        data: &SyntheticData,
        case: &CaseConfig,
        seed_base: u64,
    ) -> PhaseResult {
        let cfg = self.config;
        let obs = &data.observed;
        let steps = obs.len();
        let val_start = PipelineConfig::split_index(steps);
        let obs_train = &obs[..val_start];
        let forcing_train = &data.forcing[..val_start.min(data.forcing.len())];

        let reduced_fit = calibrate_reduced(obs_train, forcing_train, &cfg.calibration);

        let bm = &cfg.base_model;
        let base = ModelParams {
            grid_size: bm.grid_size,
            diffusion: bm.diffusion,
            noise: bm.noise,
            macro_coupling: case.macro_coupling_hint,
            t0: obs.first().copied().unwrap_or(0.0),
            h0: bm.h0,
            forcing: data.forcing.clone(),
            forcing_scale: bm.forcing_scale,
            damping: bm.damping,
            ode_alpha: reduced_fit.alpha,
            ode_beta: reduced_fit.beta,
            ode_noise: bm.ode_noise,
            assimilation: None,
        };

        let full_fit = calibrate_full(self.sim, obs_train, &base, &cfg.calibration);
        let calibrated = ModelParams {
            forcing_scale: full_fit.forcing_scale,
            macro_coupling: full_fit.macro_coupling,
            damping: full_fit.damping,
            ..base
        };

        let runner = PairedRunner::new(
            self.sim,
            SeedPlan::new(seed_base, &cfg.seeds),
            &cfg.validation,
        )
        .with_policy(self.policy);
        let runs = runner.run(&calibrated, obs, steps);
        let evaluation = evaluate(obs, val_start, &runs, &cfg.validation);

        let record = PhaseRecord {
            phase,
            data: DataWindow::monthly(cfg.start_year, cfg.start_month, steps, val_start, mean(obs)),
            calibration: CalibrationRecord {
                forcing_scale: full_fit.forcing_scale,
                macro_coupling: full_fit.macro_coupling,
                damping: full_fit.damping,
                assimilation_strength: runs.assimilation_strength,
                ode_alpha: reduced_fit.alpha,
                ode_beta: reduced_fit.beta,
            },
            evaluation,
        };

        PhaseResult {
            record,
            reduced_fit,
            full_fit,
        }
    }

    fn run_phase<K: EventSink + ?Sized>(
        &self,
        name: &str,
        phase: Phase,
        case: &CaseConfig,
        seed_base: u64,
        sink: &mut K,
    ) -> PhaseRecord {
        let data = synthetic::generate(self.config.horizon, case, &self.config.synthetic, seed_base);
        let result = self.evaluate_phase(phase, &data, case, seed_base);

        sink.log(&PipelineEvent::PhaseCalibrated {
            case: name.to_string(),
            phase,
            ode_alpha: result.reduced_fit.alpha,
            ode_beta: result.reduced_fit.beta,
            ode_fallback: result.reduced_fit.fallback,
            forcing_scale: result.full_fit.forcing_scale,
            macro_coupling: result.full_fit.macro_coupling,
            damping: result.full_fit.damping,
            train_rmse: result.full_fit.train_rmse,
        });
        let ev = &result.record.evaluation;
        sink.log(&PipelineEvent::PhaseEvaluated {
            case: name.to_string(),
            phase,
            edi: ev.errors.edi_control,
            criteria_passed: ev.criteria.passed(),
            overall_pass: ev.overall_pass,
            verdict: ev.verdict.to_string(),
        });

        result.record
    }

    /// Existing real phase worth keeping, or the reason it is not.
    fn previous_real_phase(&self, path: &Path) -> Result<serde_json::Value, String> {
        match read_metrics_value(path) {
            Ok(Some(value)) => match value.get("phases").and_then(|p| p.get("real")) {
                Some(real) if real.as_object().is_some_and(|o| !o.is_empty()) => Ok(real.clone()),
                _ => Err("previous metrics.json has no real phase".to_string()),
            },
            Ok(None) => Err("no previous metrics.json".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Regenerate `<cases_root>/<name>/metrics.json`.
    pub fn regenerate_case<K: EventSink + ?Sized>(
        &self,
        cases_root: &Path,
        name: &str,
        case: &CaseConfig,
        sink: &mut K,
    ) -> Result<CaseOutcome, OutputError> {
        let case_dir = cases_root.join(name);
        if !case_dir.is_dir() {
            if !self.create_missing {
                let reason = "case directory not found".to_string();
                sink.log(&PipelineEvent::CaseSkipped {
                    case: name.to_string(),
                    reason: reason.clone(),
                });
                return Ok(CaseOutcome::Skipped { reason });
            }
            std::fs::create_dir_all(&case_dir).map_err(|source| OutputError::Io {
                path: case_dir.clone(),
                source,
            })?;
        }

        let base = seed_base(name);
        sink.log(&PipelineEvent::CaseStarted {
            case: name.to_string(),
            seed_base: base,
            horizon: self.config.horizon,
        });

        let synthetic = self.run_phase(name, Phase::Synthetic, case, base, sink);

        let path = metrics_path(cases_root, name);
        let real_case = case.with_noise_scaled(self.config.real_phase.noise_mult);
        let real_base = base.wrapping_add(self.config.real_phase.seed_offset);
        let real = if case.only_synthetic {
            match self.previous_real_phase(&path) {
                Ok(previous) => {
                    sink.log(&PipelineEvent::RealPhasePreserved {
                        case: name.to_string(),
                    });
                    PhaseEntry::Preserved(previous)
                }
                Err(reason) => {
                    sink.log(&PipelineEvent::RealPhaseRegenerated {
                        case: name.to_string(),
                        reason,
                    });
                    self.run_phase(name, Phase::Real, &real_case, real_base, sink)
                        .into()
                }
            }
        } else {
            self.run_phase(name, Phase::Real, &real_case, real_base, sink)
                .into()
        };

        let generated_at = self
            .fixed_timestamp
            .clone()
            .unwrap_or_else(timestamp_now);
        let envelope = CaseEnvelope::new(
            generated_at,
            self.git.clone(),
            Phases {
                synthetic: synthetic.into(),
                real,
            },
        );
        envelope.write_to_file(&path)?;

        sink.log(&PipelineEvent::RecordWritten {
            case: name.to_string(),
            path: path.display().to_string(),
            checksum: envelope.determinism.checksum.clone(),
        });

        Ok(CaseOutcome::Written {
            path,
            envelope: Box::new(envelope),
        })
    }
}

/// One-line console digest: `[synthetic: EDI=0.412, C=4/5] [real: ...]`.
pub fn console_summary(envelope: &CaseEnvelope) -> String {
    Phase::ALL
        .iter()
        .map(|&phase| {
            let snap = serde_json::to_value(envelope.phases.get(phase))
                .map(|v| PhaseSnapshot::from_value(&v))
                .unwrap_or_default();
            let edi = snap
                .edi()
                .map(|e| format!("{:.3}", e))
                .unwrap_or_else(|| "n/a".to_string());
            format!("[{}: EDI={}, C={}/5]", phase, edi, snap.criteria_passed)
        })
        .collect::<Vec<_>>()
        .join(" ")
}
