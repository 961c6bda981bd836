// src/config.rs
//
// Central configuration for the recomputation pipeline.
//
// Two layers:
// - PipelineConfig: every numeric constant of the protocol (horizon, base
//   ABM parameters, calibration grid, validation thresholds, seed plan).
//   `Default` is the reference protocol; a few research knobs can be
//   overridden from EMERGENCE_* environment variables.
// - CaseRegistry: immutable table case-name -> domain coefficients and
//   case-name -> level of evidence. Built in, or loaded from YAML.

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::validation::EDI_EPSILON;

/// Current registry schema version.
pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Human-readable protocol version.
    pub version: &'static str,
    /// Number of monthly steps per phase.
    pub horizon: usize,
    /// Calendar anchor for the data window descriptors (year, month).
    pub start_year: i32,
    pub start_month: u32,
    pub synthetic: SyntheticConfig,
    pub base_model: BaseModelConfig,
    pub calibration: CalibrationConfig,
    pub validation: ValidationThresholds,
    pub seeds: SeedPlanConfig,
    pub real_phase: RealPhaseConfig,
}

/// Forcing + observation-noise shape for the synthetic generator.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub forcing_base: f64,
    /// Linear forcing trend per step.
    pub forcing_trend: f64,
    /// Seasonal period in steps.
    pub seasonal_period: f64,
    /// AR(1) coefficient of the observation noise.
    pub noise_autocorrelation: f64,
}

/// Parameters carried into every ModelParams before calibration.
#[derive(Debug, Clone)]
pub struct BaseModelConfig {
    pub grid_size: usize,
    pub diffusion: f64,
    pub noise: f64,
    pub h0: f64,
    pub forcing_scale: f64,
    pub damping: f64,
    /// ODE noise used during evaluation (not the case's "true" noise).
    pub ode_noise: f64,
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub forcing_scale_grid: Vec<f64>,
    pub macro_coupling_grid: Vec<f64>,
    pub damping_grid: Vec<f64>,
    /// Seed for every grid-search run.
    pub grid_seed: u64,
    /// Reduced-fit fallback when the regression is degenerate.
    pub default_alpha: f64,
    pub default_beta: f64,
    pub alpha_bounds: (f64, f64),
    pub beta_bounds: (f64, f64),
    /// |det| below this is treated as singular.
    pub singular_det: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationThresholds {
    /// C1: RMSE threshold as a fraction of std(observed validation slice).
    pub convergence_std_frac: f64,
    /// C1: minimum correlation of both models against observations.
    pub convergence_min_corr: f64,
    /// C2: max |Δmean| and |Δvariance| under perturbation.
    pub robustness_mean_drift: f64,
    pub robustness_var_drift: f64,
    /// C3: max |Δ windowed variance| between replications.
    pub replication_tolerance: f64,
    /// C4: additive forcing shift for the alternate run.
    pub validity_forcing_shift: f64,
    /// C5: max spread of the sensitivity means.
    pub uncertainty_spread: f64,
    /// Relative parameter perturbation for C2 / C5.
    pub perturbation_pct: f64,
    /// Window for windowed variance (C3, persistence).
    pub window: usize,
    pub dominance_max: f64,
    pub persistence_ratio: f64,
    /// Emergence threshold reported as a fraction of std(observed).
    pub emergence_std_frac: f64,
    /// Bins for the effective-information score.
    pub ei_bins: usize,
    /// Epsilon in the emergence-index denominator.
    pub edi_epsilon: f64,
    /// Full-model RMSE below this is tagged tautological.
    pub tautology_rmse: f64,
}

/// Seed offsets relative to a case's seed base.
#[derive(Debug, Clone)]
pub struct SeedPlanConfig {
    pub ode: u64,
    pub reduced: u64,
    pub perturbed: u64,
    pub replication: u64,
    pub alt: u64,
    pub sensitivity_start: u64,
    pub sensitivity_runs: usize,
    /// Absolute seeds of the parameter perturbations themselves.
    pub robustness_perturbation_seed: u64,
    pub sensitivity_perturbation_start: u64,
}

#[derive(Debug, Clone)]
pub struct RealPhaseConfig {
    /// Multiplier on micro_noise and ode_noise for the "real" phase.
    pub noise_mult: f64,
    pub seed_offset: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: "fair-metrics-v1",
            // 20 years of monthly data.
            horizon: 240,
            start_year: 2000,
            start_month: 1,
            synthetic: SyntheticConfig {
                forcing_base: 0.0,
                forcing_trend: 0.003,
                seasonal_period: 12.0,
                noise_autocorrelation: 0.3,
            },
            base_model: BaseModelConfig {
                grid_size: 10,
                diffusion: 0.2,
                noise: 0.02,
                h0: 0.5,
                forcing_scale: 0.1,
                damping: 0.05,
                ode_noise: 0.01,
            },
            calibration: CalibrationConfig {
                forcing_scale_grid: vec![0.1, 0.2, 0.4, 0.8],
                macro_coupling_grid: vec![0.4, 0.6, 0.8],
                damping_grid: vec![0.02, 0.05, 0.1],
                grid_seed: 2,
                default_alpha: 0.05,
                default_beta: 0.02,
                alpha_bounds: (0.001, 0.5),
                beta_bounds: (0.001, 1.0),
                singular_det: 1e-12,
            },
            validation: ValidationThresholds::default(),
            seeds: SeedPlanConfig {
                ode: 1,
                reduced: 2,
                perturbed: 3,
                replication: 4,
                alt: 5,
                sensitivity_start: 10,
                sensitivity_runs: 5,
                robustness_perturbation_seed: 10,
                sensitivity_perturbation_start: 20,
            },
            real_phase: RealPhaseConfig {
                noise_mult: 1.5,
                seed_offset: 1000,
            },
        }
    }
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            convergence_std_frac: 0.6,
            convergence_min_corr: 0.7,
            robustness_mean_drift: 0.5,
            robustness_var_drift: 0.5,
            replication_tolerance: 0.3,
            validity_forcing_shift: 0.5,
            uncertainty_spread: 1.0,
            perturbation_pct: 0.1,
            window: 50,
            dominance_max: 0.05,
            persistence_ratio: 1.5,
            emergence_std_frac: 0.2,
            ei_bins: 10,
            edi_epsilon: EDI_EPSILON,
            tautology_rmse: 1e-6,
        }
    }
}

impl PipelineConfig {
    /// Build the default config, then apply environment overrides.
    ///
    ///   - EMERGENCE_HORIZON           (usize, steps; must be >= 4)
    ///   - EMERGENCE_REAL_NOISE_MULT   (f64, > 0)
    ///   - EMERGENCE_REAL_SEED_OFFSET  (u64)
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn from_env_or_default() -> Self {
        use std::env;

        let mut cfg = PipelineConfig::default();

        if let Ok(raw) = env::var("EMERGENCE_HORIZON") {
            match raw.parse::<usize>() {
                Ok(v) if v >= 4 => {
                    cfg.horizon = v;
                    eprintln!("[config] EMERGENCE_HORIZON = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not use EMERGENCE_HORIZON = {:?}; using default {}",
                        raw, cfg.horizon
                    );
                }
            }
        }

        if let Ok(raw) = env::var("EMERGENCE_REAL_NOISE_MULT") {
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() && v > 0.0 => {
                    cfg.real_phase.noise_mult = v;
                    eprintln!("[config] EMERGENCE_REAL_NOISE_MULT = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not use EMERGENCE_REAL_NOISE_MULT = {:?}; using default {}",
                        raw, cfg.real_phase.noise_mult
                    );
                }
            }
        }

        if let Ok(raw) = env::var("EMERGENCE_REAL_SEED_OFFSET") {
            match raw.parse::<u64>() {
                Ok(v) => {
                    cfg.real_phase.seed_offset = v;
                    eprintln!("[config] EMERGENCE_REAL_SEED_OFFSET = {v} (overrode default)");
                }
                Err(_) => {
                    eprintln!(
                        "[config] WARN: could not parse EMERGENCE_REAL_SEED_OFFSET = {:?} as u64; using default {}",
                        raw, cfg.real_phase.seed_offset
                    );
                }
            }
        }

        cfg
    }

    /// First index of the validation slice (train = `[0, split)`).
    pub fn split_index(steps: usize) -> usize {
        steps / 2
    }
}

// =============================================================================
// Case registry
// =============================================================================

/// Domain coefficients for one case study.
///
/// Every field has a documented default so thin or partial YAML still yields
/// a usable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseConfig {
    /// True ODE rate α of the synthetic ground truth.
    pub ode_alpha: f64,
    /// True ODE feedback β.
    pub ode_beta: f64,
    /// True ODE noise σ.
    pub ode_noise: f64,
    /// Expected macro coupling (starting point before the grid search).
    pub macro_coupling_hint: f64,
    /// Seasonal forcing amplitude.
    pub forcing_seasonal_amp: f64,
    /// Observation (micro) noise σ.
    pub micro_noise: f64,
    pub description: String,
    /// Keep the existing real phase instead of regenerating it.
    pub only_synthetic: bool,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            ode_alpha: 0.05,
            ode_beta: 0.02,
            ode_noise: 0.02,
            macro_coupling_hint: 0.4,
            forcing_seasonal_amp: 0.5,
            micro_noise: 0.15,
            description: String::new(),
            only_synthetic: false,
        }
    }
}

impl CaseConfig {
    fn new(
        ode_alpha: f64,
        ode_beta: f64,
        ode_noise: f64,
        macro_coupling_hint: f64,
        forcing_seasonal_amp: f64,
        micro_noise: f64,
        description: &str,
    ) -> Self {
        Self {
            ode_alpha,
            ode_beta,
            ode_noise,
            macro_coupling_hint,
            forcing_seasonal_amp,
            micro_noise,
            description: description.to_string(),
            only_synthetic: false,
        }
    }

    /// Replace non-finite or negative coefficients with defaults.
    pub fn sanitized(&self) -> Self {
        let d = CaseConfig::default();
        let pick = |v: f64, fallback: f64| if v.is_finite() && v >= 0.0 { v } else { fallback };
        Self {
            ode_alpha: pick(self.ode_alpha, d.ode_alpha),
            ode_beta: pick(self.ode_beta, d.ode_beta),
            ode_noise: pick(self.ode_noise, d.ode_noise),
            macro_coupling_hint: pick(self.macro_coupling_hint, d.macro_coupling_hint),
            forcing_seasonal_amp: pick(self.forcing_seasonal_amp, d.forcing_seasonal_amp),
            micro_noise: pick(self.micro_noise, d.micro_noise),
            description: self.description.clone(),
            only_synthetic: self.only_synthetic,
        }
    }

    /// Read one case leniently. Missing or mistyped fields keep their
    /// defaults; each problem is appended to `warnings`.
    fn from_yaml_value(name: &str, value: &Value, warnings: &mut Vec<String>) -> Self {
        let mut cfg = CaseConfig::default();
        if value.is_null() {
            return cfg;
        }
        let Some(fields) = value.as_mapping() else {
            warnings.push(format!("cases.{name} is not a mapping; using defaults"));
            return cfg;
        };

        for (key, v) in fields {
            let Some(key) = key.as_str() else {
                warnings.push(format!("cases.{name} has a non-string key; ignored"));
                continue;
            };
            let slot = match key {
                "ode_alpha" => &mut cfg.ode_alpha,
                "ode_beta" => &mut cfg.ode_beta,
                "ode_noise" => &mut cfg.ode_noise,
                "macro_coupling_hint" => &mut cfg.macro_coupling_hint,
                "forcing_seasonal_amp" => &mut cfg.forcing_seasonal_amp,
                "micro_noise" => &mut cfg.micro_noise,
                "description" => {
                    match v.as_str() {
                        Some(text) => cfg.description = text.to_string(),
                        None => warnings.push(format!("cases.{name}.description is not a string")),
                    }
                    continue;
                }
                "only_synthetic" => {
                    match v.as_bool() {
                        Some(flag) => cfg.only_synthetic = flag,
                        None => warnings.push(format!(
                            "cases.{name}.only_synthetic is not a boolean; using false"
                        )),
                    }
                    continue;
                }
                other => {
                    warnings.push(format!("cases.{name}.{other} is not a known field; ignored"));
                    continue;
                }
            };
            match v.as_f64() {
                Some(x) => *slot = x,
                None => warnings.push(format!(
                    "cases.{name}.{key} is not a number; using default {}",
                    *slot
                )),
            }
        }

        let clean = cfg.sanitized();
        if clean != cfg {
            warnings.push(format!(
                "cases.{name} has negative or non-finite coefficients; replaced by defaults"
            ));
        }
        clean
    }

    /// Noisier copy used for the "real" phase.
    pub fn with_noise_scaled(&self, mult: f64) -> Self {
        Self {
            micro_noise: self.micro_noise * mult,
            ode_noise: self.ode_noise * mult,
            ..self.clone()
        }
    }
}

/// Immutable case table loaded once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRegistry {
    pub schema_version: u32,
    /// Cases that the pipeline regenerates, keyed by directory name.
    pub cases: BTreeMap<String, CaseConfig>,
    /// Level of evidence (1-5) per case directory, for reporting.
    pub evidence_levels: BTreeMap<String, u8>,
}

impl Default for CaseRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CaseRegistry {
    /// The nine cases whose earlier metrics were tautological, plus the
    /// level-of-evidence table for all eighteen case studies.
    pub fn builtin() -> Self {
        let mut cases = BTreeMap::new();
        cases.insert(
            "02_caso_conciencia".to_string(),
            CaseConfig::new(0.08, 0.03, 0.02, 0.4, 0.6, 0.15, "Collective consciousness phenomena"),
        );
        cases.insert(
            "04_caso_energia".to_string(),
            CaseConfig::new(0.06, 0.02, 0.01, 0.5, 0.9, 0.08, "Energy systems"),
        );
        cases.insert(
            "05_caso_epidemiologia".to_string(),
            CaseConfig::new(0.10, 0.04, 0.03, 0.3, 0.5, 0.20, "Epidemiological dynamics"),
        );
        cases.insert(
            "06_caso_estetica".to_string(),
            CaseConfig::new(0.05, 0.02, 0.02, 0.3, 0.4, 0.18, "Collective aesthetic trends"),
        );
        cases.insert(
            "11_caso_justicia".to_string(),
            CaseConfig::new(0.07, 0.03, 0.02, 0.4, 0.5, 0.12, "Justice systems"),
        );
        cases.insert(
            "13_caso_movilidad".to_string(),
            CaseConfig {
                // The real phase already had a non-degenerate EDI.
                only_synthetic: true,
                ..CaseConfig::new(0.09, 0.03, 0.01, 0.5, 0.7, 0.10, "Urban mobility patterns")
            },
        );
        cases.insert(
            "14_caso_paradigmas".to_string(),
            CaseConfig::new(0.04, 0.01, 0.02, 0.5, 0.3, 0.15, "Scientific paradigm shifts"),
        );
        cases.insert(
            "16_caso_postverdad".to_string(),
            CaseConfig::new(0.06, 0.02, 0.03, 0.3, 0.5, 0.22, "Post-truth dynamics"),
        );
        cases.insert(
            "18_caso_wikipedia".to_string(),
            CaseConfig::new(0.07, 0.02, 0.01, 0.5, 0.8, 0.08, "Collaborative knowledge (Wikipedia)"),
        );

        let evidence_levels = [
            ("01_caso_clima", 5),
            ("02_caso_conciencia", 1),
            ("03_caso_contaminacion", 4),
            ("04_caso_energia", 4),
            ("05_caso_epidemiologia", 4),
            ("06_caso_estetica", 2),
            ("07_caso_falsacion_exogeneidad", 1),
            ("08_caso_falsacion_no_estacionariedad", 1),
            ("09_caso_falsacion_observabilidad", 1),
            ("10_caso_finanzas", 5),
            ("11_caso_justicia", 2),
            ("12_caso_moderacion_adversarial", 1),
            ("13_caso_movilidad", 2),
            ("14_caso_paradigmas", 2),
            ("15_caso_politicas_estrategicas", 1),
            ("16_caso_postverdad", 2),
            ("17_caso_rtb_publicidad", 1),
            ("18_caso_wikipedia", 3),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            schema_version: REGISTRY_SCHEMA_VERSION,
            cases,
            evidence_levels,
        }
    }

    /// Load a registry from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError {
            path: path.as_ref().display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a registry from a YAML string.
    ///
    /// Only YAML that does not parse at all is an error. Mistyped fields,
    /// unusable levels of evidence and unnamed cases fall back to defaults
    /// or are dropped, with a `[config] WARN:` line each.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let (registry, warnings) = Self::parse_lenient(yaml)?;
        for w in &warnings {
            eprintln!("[config] WARN: {w}");
        }
        Ok(registry)
    }

    /// Lenient parse returning the warnings instead of printing them.
    pub fn parse_lenient(yaml: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let doc: Value = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            source: e.to_string(),
        })?;

        let mut warnings = Vec::new();
        let mut registry = Self {
            schema_version: REGISTRY_SCHEMA_VERSION,
            cases: BTreeMap::new(),
            evidence_levels: BTreeMap::new(),
        };
        if doc.is_null() {
            return Ok((registry, warnings));
        }
        if !doc.is_mapping() {
            warnings.push("registry is not a mapping; using an empty registry".to_string());
            return Ok((registry, warnings));
        }

        if let Some(v) = doc.get("schema_version") {
            if v.as_u64() != Some(u64::from(REGISTRY_SCHEMA_VERSION)) {
                warnings.push(format!(
                    "schema_version {} is not {}; reading it anyway",
                    describe(v),
                    REGISTRY_SCHEMA_VERSION
                ));
            }
        }

        for (name, value) in section(&doc, "cases", &mut warnings) {
            registry
                .cases
                .insert(name.clone(), CaseConfig::from_yaml_value(&name, value, &mut warnings));
        }

        for (name, value) in section(&doc, "evidence_levels", &mut warnings) {
            match value.as_u64() {
                Some(loe @ 1..=5) => {
                    registry.evidence_levels.insert(name, loe as u8);
                }
                _ => warnings.push(format!(
                    "evidence_levels.{name} = {} is not in 1..=5; dropped",
                    describe(value)
                )),
            }
        }

        Ok((registry, warnings))
    }

    pub fn get(&self, name: &str) -> Option<&CaseConfig> {
        self.cases.get(name)
    }

    pub fn evidence_level(&self, name: &str) -> Option<u8> {
        self.evidence_levels.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cases.keys().map(|k| k.as_str())
    }
}

/// Named entries of a top-level mapping section. Unnamed entries are
/// dropped with a warning; a missing or null section is empty.
fn section<'a>(doc: &'a Value, key: &str, warnings: &mut Vec<String>) -> Vec<(String, &'a Value)> {
    let Some(value) = doc.get(key).filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    let Some(entries) = value.as_mapping() else {
        warnings.push(format!("{key} is not a mapping; ignored"));
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(k, v)| match k.as_str().map(str::trim) {
            Some(name) if !name.is_empty() => Some((name.to_string(), v)),
            _ => {
                warnings.push(format!("{key} entry {} has no usable name; dropped", describe(k)));
                None
            }
        })
        .collect()
}

fn describe(v: &Value) -> String {
    serde_yaml::to_string(v)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "?".to_string())
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError { path: String, source: String },
    ParseError { source: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(f, "Failed to read case registry '{}': {}", path, source)
            }
            ConfigError::ParseError { source } => {
                write!(f, "Failed to parse case registry YAML: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
