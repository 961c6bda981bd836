// src/types.rs
//
// Common shared types for the recomputation pipeline: series, the model
// parameter set handed to the simulators and the simulator outputs.

use serde::{Deserialize, Serialize};

/// Ordered fixed-length sequence of samples (one per month).
pub type Series = Vec<f64>;

/// Which data flavour a validation record was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Synthetic,
    Real,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Synthetic, Phase::Real];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Synthetic => "synthetic",
            Phase::Real => "real",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nudging term pulling the simulated output toward a target series.
///
/// Only the legacy (tautological) evaluation path ever carries one; fair
/// evaluation runs always have `ModelParams::assimilation == None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assimilation {
    pub series: Series,
    pub strength: f64,
}

/// Parameter set consumed by both simulators.
///
/// Grid / diffusion / noise constants come from defaults; `forcing_scale`,
/// `macro_coupling`, `damping`, `ode_alpha` and `ode_beta` are fitted by the
/// calibrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    /// Side length N of the N×N agent grid.
    pub grid_size: usize,
    /// Nearest-neighbour diffusion rate.
    pub diffusion: f64,
    /// Per-cell micro noise σ.
    pub noise: f64,
    /// Strength of the macro → micro pull.
    pub macro_coupling: f64,
    /// Initial value of the tracked macro variable.
    pub t0: f64,
    /// Initial heterogeneity of the agent grid (multiplies `noise`).
    pub h0: f64,
    /// Exogenous forcing applied per step.
    pub forcing: Series,
    /// Direct forcing gain on every agent.
    pub forcing_scale: f64,
    /// Linear relaxation of agents toward zero.
    pub damping: f64,
    /// Macro balance rate α in dX = α(F − βX).
    pub ode_alpha: f64,
    /// Macro balance feedback β.
    pub ode_beta: f64,
    /// Macro balance noise σ.
    pub ode_noise: f64,
    pub assimilation: Option<Assimilation>,
}

impl ModelParams {
    /// Effective nudging coefficient (0 when no assimilation is attached).
    pub fn assimilation_strength(&self) -> f64 {
        self.assimilation.as_ref().map(|a| a.strength).unwrap_or(0.0)
    }

    /// Copy with assimilation removed. Every evaluation run goes through this.
    pub fn without_assimilation(&self) -> Self {
        Self {
            assimilation: None,
            ..self.clone()
        }
    }

    /// Null-hypothesis variant: no macro-level causal influence and no
    /// direct forcing on the agents.
    pub fn reduced(&self) -> Self {
        Self {
            macro_coupling: 0.0,
            forcing_scale: 0.0,
            ..self.clone()
        }
    }

    /// Forcing applied at step `t` (0 past the end of the series).
    pub fn forcing_at(&self, t: usize) -> f64 {
        self.forcing.get(t).copied().unwrap_or(0.0)
    }
}

/// Per-step history of the N×N agent grid (row-major frames).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridHistory {
    pub size: usize,
    pub frames: Vec<Vec<f64>>,
}

impl GridHistory {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            frames: Vec::new(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.size * self.size
    }

    pub fn last_frame(&self) -> &[f64] {
        self.frames.last().map(|f| f.as_slice()).unwrap_or(&[])
    }

    /// Time series of a single cell across all frames.
    pub fn cell_series(&self, cell: usize) -> Series {
        self.frames
            .iter()
            .map(|frame| frame.get(cell).copied().unwrap_or(0.0))
            .collect()
    }
}

/// Output of the agent-based ("full") simulator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullOutput {
    /// Tracked macro variable (grid mean) per step.
    pub tbar: Series,
    pub grid: GridHistory,
    /// Forcing actually applied, one value per step.
    pub forcing: Series,
}

/// Output of the ODE ("reduced") simulator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedOutput {
    pub tbar: Series,
}
