// src/calibration.rs
//
// Dual calibrator. Both fits only ever see the training slice.
//
// - calibrate_reduced: closed-form OLS of Δobs[t] = a·F[t] + b·obs[t]
//   (2×2 normal equations), mapped to the macro balance α, β.
// - calibrate_full: exhaustive grid search over
//   forcing_scale × macro_coupling × damping, scored by training RMSE with
//   assimilation disabled.

use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::metrics::rmse;
use crate::simulator::Simulator;
use crate::types::ModelParams;

/// Result of the reduced (ODE) fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReducedFit {
    pub alpha: f64,
    pub beta: f64,
    /// True when the regression was degenerate and defaults were used.
    pub fallback: bool,
}

/// Result of the full (ABM) grid search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullFit {
    pub forcing_scale: f64,
    pub macro_coupling: f64,
    pub damping: f64,
    /// Training RMSE of the winning combination (1e9 if nothing beat the
    /// initial sentinel).
    pub train_rmse: f64,
}

fn clamp(x: f64, bounds: (f64, f64)) -> f64 {
    x.max(bounds.0).min(bounds.1)
}

/// Fit α, β on first differences of the training slice.
///
/// Fewer than 2 difference points, a (near-)singular system or a non-finite
/// solution fall back to `default_alpha` / `default_beta`.
pub fn calibrate_reduced(
    obs_train: &[f64],
    forcing_train: &[f64],
    cfg: &CalibrationConfig,
) -> ReducedFit {
    let fallback = ReducedFit {
        alpha: cfg.default_alpha,
        beta: cfg.default_beta,
        fallback: true,
    };

    let n = obs_train.len().saturating_sub(1).min(forcing_train.len());
    if n < 2 {
        return fallback;
    }

    let (mut sum_f2, mut sum_x2, mut sum_fx, mut sum_fy, mut sum_xy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for t in 0..n {
        let y = obs_train[t + 1] - obs_train[t];
        let f = forcing_train[t];
        let x = obs_train[t];
        sum_f2 += f * f;
        sum_x2 += x * x;
        sum_fx += f * x;
        sum_fy += f * y;
        sum_xy += x * y;
    }

    let det = sum_f2 * sum_x2 - sum_fx * sum_fx;
    if !det.is_finite() || det.abs() < cfg.singular_det {
        return fallback;
    }

    let a = (sum_fy * sum_x2 - sum_xy * sum_fx) / det;
    let b = (sum_f2 * sum_xy - sum_fy * sum_fx) / det;
    if !a.is_finite() || !b.is_finite() {
        return fallback;
    }

    let alpha = clamp(a, cfg.alpha_bounds);
    let beta = clamp(-b / alpha, cfg.beta_bounds);

    ReducedFit {
        alpha,
        beta,
        fallback: false,
    }
}

/// Grid search for the full model.
///
/// Every candidate is simulated for `obs_train.len()` steps with the same
/// seed; strict `<` keeps the first minimum in iteration order.
pub fn calibrate_full<S: Simulator>(
    sim: &S,
    obs_train: &[f64],
    base: &ModelParams,
    cfg: &CalibrationConfig,
) -> FullFit {
    let mut best = FullFit {
        forcing_scale: 0.1,
        macro_coupling: 0.4,
        damping: 0.05,
        train_rmse: 1e9,
    };

    let steps = obs_train.len();
    for &forcing_scale in &cfg.forcing_scale_grid {
        for &macro_coupling in &cfg.macro_coupling_grid {
            for &damping in &cfg.damping_grid {
                let params = ModelParams {
                    forcing_scale,
                    macro_coupling,
                    damping,
                    ..base.without_assimilation()
                };
                let run = sim.simulate_full(&params, steps, cfg.grid_seed);
                let err = rmse(&run.tbar, obs_train);
                if err < best.train_rmse {
                    best = FullFit {
                        forcing_scale,
                        macro_coupling,
                        damping,
                        train_rmse: err,
                    };
                }
            }
        }
    }

    best
}
