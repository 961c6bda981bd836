//! Fair-comparison recomputation of emergence metrics.
//!
//! This crate regenerates per-case validation records (`metrics.json`) for
//! a hybrid agent-based / ODE modelling study, evaluating every phase
//! without data assimilation so that the Emergence Detection Index (EDI)
//! and Cohesion Ratio (CR) are no longer tautological. The binary
//! (`src/main.rs`) is a thin harness around these components.
//!
//! Pipeline, leaf first: synthetic series -> dual calibration -> paired
//! simulation runs -> five-criterion validation -> result serialisation.

pub mod audit;
pub mod calibration;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod rng;
pub mod runner;
pub mod simulator;
pub mod summarize;
pub mod synthetic;
pub mod types;
pub mod validation;

// --- Re-exports for ergonomic external use ---------------------------------

pub use audit::{audit_cases, audit_envelope, AuditReport, AuditThresholds, Finding, FindingKind};

pub use calibration::{calibrate_full, calibrate_reduced, FullFit, ReducedFit};

pub use config::{CaseConfig, CaseRegistry, ConfigError, PipelineConfig, ValidationThresholds};

pub use logging::{EventSink, FileSink, MemorySink, NoopSink, PipelineEvent};

pub use metrics::{
    correlation, dominance_share, effective_information, internal_vs_external_cohesion, mean,
    rmse, variance, window_variance,
};

pub use output::{BuildInfo, CaseEnvelope, OutputError, PhaseEntry, PhaseRecord, Phases};

pub use pipeline::{console_summary, seed_base, CaseOutcome, CasePipeline, PhaseResult};

pub use runner::{perturb_params, PairedOutputs, PairedRunner, RunPolicy, SeedPlan};

pub use simulator::{GridSimulator, Simulator};

pub use summarize::{CaseStatus, OutputFormat, PhaseSnapshot, SummaryRow};

pub use synthetic::SyntheticData;

pub use types::{FullOutput, GridHistory, ModelParams, Phase, ReducedOutput, Series};

pub use validation::{emergence_index, evaluate, Evaluation, Verdict};
