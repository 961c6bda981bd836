// src/validation.rs
//
// Validation protocol evaluator. Pure function of the observed series and
// the paired run outputs; every comparison uses the validation slice
// obs[T/2..] except effective information, which spans the whole horizon.
//
// Criteria:
//   C1 convergence   rmse_full < 0.6·std(obs_val), both correlations > 0.7
//   C2 robustness    |Δmean|, |Δvar| of the perturbed run < 0.5
//   C3 replication   |wvar(full) − wvar(replication)| < 0.3
//   C4 validity      mean(alt) > mean(full)
//   C5 uncertainty   spread of the sensitivity means < 1.0
//
// A phase whose full run matches the observations to within 1e-6 RMSE is
// tautological: it can never be validated.

use serde::{Deserialize, Serialize};

use crate::config::ValidationThresholds;
use crate::metrics::{
    correlation, dominance_share, effective_information, internal_vs_external_cohesion, mean,
    rmse, variance, window_variance,
};
use crate::runner::PairedOutputs;

/// Denominator epsilon of the emergence index. Records, reports and audits
/// all recompute the index with this value.
pub const EDI_EPSILON: f64 = 1e-9;

/// Emergence Detection Index: relative error reduction of the coupled model
/// over the null model, `(rr − ra) / (rr + ε)`.
pub fn emergence_index(rmse_reduced: f64, rmse_full: f64, epsilon: f64) -> f64 {
    (rmse_reduced - rmse_full) / (rmse_reduced + epsilon)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Validated,
    NotValidated,
    Tautological,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Validated => "validated",
            Verdict::NotValidated => "not_validated",
            Verdict::Tautological => "tautological",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBlock {
    pub rmse_abm: f64,
    pub rmse_ode: f64,
    pub rmse_reduced: f64,
    pub threshold: f64,
    pub edi_control: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationBlock {
    pub abm_obs: f64,
    pub ode_obs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohesionBlock {
    pub internal: f64,
    pub external: f64,
    pub pass: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonLocalityBlock {
    pub dominance_share: f64,
    pub pass: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceBlock {
    pub window_variance: f64,
    pub obs_window_variance: f64,
    pub pass: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergenceBlock {
    pub err_reduced: f64,
    pub err_reduced_full: f64,
    pub err_abm: f64,
    pub threshold: f64,
    pub pass: bool,
    pub effective_information: f64,
    pub edi_control: f64,
    pub tautological: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    pub c1_convergence: bool,
    pub c2_robustness: bool,
    pub c3_replication: bool,
    pub c4_validity: bool,
    pub c5_uncertainty: bool,
}

impl Criteria {
    pub fn passed(&self) -> usize {
        [
            self.c1_convergence,
            self.c2_robustness,
            self.c3_replication,
            self.c4_validity,
            self.c5_uncertainty,
        ]
        .iter()
        .filter(|&&c| c)
        .count()
    }

    pub fn all(&self) -> bool {
        self.passed() == 5
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityBlock {
    pub mean_min: f64,
    pub mean_max: f64,
}

/// Everything the evaluator derives for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub errors: ErrorBlock,
    pub correlations: CorrelationBlock,
    pub symploke: CohesionBlock,
    pub non_locality: NonLocalityBlock,
    pub persistence: PersistenceBlock,
    pub emergence: EmergenceBlock,
    #[serde(flatten)]
    pub criteria: Criteria,
    pub sensitivity: SensitivityBlock,
    pub overall_pass: bool,
    pub verdict: Verdict,
}

fn tail(xs: &[f64], from: usize) -> &[f64] {
    xs.get(from..).unwrap_or(&[])
}

/// Evaluate one phase. `val_start` is the first index of the validation
/// slice; `observed` is the full-horizon observed series.
pub fn evaluate(
    observed: &[f64],
    val_start: usize,
    runs: &PairedOutputs,
    th: &ValidationThresholds,
) -> Evaluation {
    let obs_val = tail(observed, val_start);
    let obs_std = variance(obs_val).sqrt();

    let full_val = tail(&runs.full.tbar, val_start);
    let ode_val = tail(&runs.ode.tbar, val_start);
    let reduced_val = tail(&runs.reduced.tbar, val_start);

    let err_abm = rmse(full_val, obs_val);
    let err_ode = rmse(ode_val, obs_val);
    let err_reduced = rmse(reduced_val, obs_val);
    let err_reduced_full = rmse(reduced_val, full_val);

    // C1
    let err_threshold = th.convergence_std_frac * obs_std;
    let corr_abm = correlation(full_val, obs_val);
    let corr_ode = correlation(ode_val, obs_val);
    let c1 = err_abm < err_threshold
        && corr_abm > th.convergence_min_corr
        && corr_ode > th.convergence_min_corr;

    // C2
    let perturbed_val = tail(&runs.perturbed.tbar, val_start);
    let mean_drift = (mean(perturbed_val) - mean(full_val)).abs();
    let var_drift = (variance(perturbed_val) - variance(full_val)).abs();
    let c2 = mean_drift < th.robustness_mean_drift && var_drift < th.robustness_var_drift;

    // C3
    let wvar_full = window_variance(full_val, th.window);
    let wvar_rep = window_variance(tail(&runs.replication.tbar, val_start), th.window);
    let c3 = (wvar_full - wvar_rep).abs() < th.replication_tolerance;

    // C4
    let c4 = mean(tail(&runs.alt.tbar, val_start)) > mean(full_val);

    // C5
    let sens_means: Vec<f64> = runs
        .sensitivity
        .iter()
        .map(|s| mean(tail(&s.tbar, val_start)))
        .collect();
    let (mean_min, mean_max) = if sens_means.is_empty() {
        (0.0, 0.0)
    } else {
        sens_means
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &m| {
                (lo.min(m), hi.max(m))
            })
    };
    let c5 = mean_max - mean_min < th.uncertainty_spread;

    // Indicators
    let (internal, external) = internal_vs_external_cohesion(&runs.full.grid, &runs.full.forcing);
    let dominance = dominance_share(&runs.full.grid);
    let obs_wvar = window_variance(obs_val, th.window);

    let edi = emergence_index(err_reduced, err_abm, th.edi_epsilon);
    let ei = effective_information(&runs.ode.tbar, &runs.reduced.tbar, th.ei_bins);
    let metastable = edi > 0.0 && ei >= 0.0 && err_reduced > err_abm;
    let tautological = err_abm < th.tautology_rmse;

    let criteria = Criteria {
        c1_convergence: c1,
        c2_robustness: c2,
        c3_replication: c3,
        c4_validity: c4,
        c5_uncertainty: c5,
    };
    let overall_pass = criteria.all() && metastable && !tautological;
    let verdict = if tautological {
        Verdict::Tautological
    } else if overall_pass {
        Verdict::Validated
    } else {
        Verdict::NotValidated
    };

    Evaluation {
        errors: ErrorBlock {
            rmse_abm: err_abm,
            rmse_ode: err_ode,
            rmse_reduced: err_reduced,
            threshold: err_threshold,
            edi_control: edi,
        },
        correlations: CorrelationBlock {
            abm_obs: corr_abm,
            ode_obs: corr_ode,
        },
        symploke: CohesionBlock {
            internal,
            external,
            pass: internal > external,
        },
        non_locality: NonLocalityBlock {
            dominance_share: dominance,
            pass: dominance < th.dominance_max,
        },
        persistence: PersistenceBlock {
            window_variance: wvar_full,
            obs_window_variance: obs_wvar,
            pass: wvar_full < th.persistence_ratio * obs_wvar,
        },
        emergence: EmergenceBlock {
            err_reduced,
            err_reduced_full,
            err_abm,
            threshold: th.emergence_std_frac * obs_std,
            pass: metastable,
            effective_information: ei,
            edi_control: edi,
            tautological,
        },
        criteria,
        sensitivity: SensitivityBlock { mean_min, mean_max },
        overall_pass,
        verdict,
    }
}
