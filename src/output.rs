// src/output.rs
//
// Persisted record schema for `<cases_root>/<case>/metrics.json`.
//
// Layout:
// - generated_at: UTC RFC 3339, second precision, trailing `Z`
// - git:          commit + dirty flag of the producing checkout
// - phases:       synthetic + real PhaseRecord (real may be carried over
//                 verbatim from a previous file)
// - determinism:  SHA-256 over the serialised phases
//
// Writing is last-write-wins. Apart from `generated_at`, serialising the same
// phases twice produces byte-identical JSON.

use chrono::{Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::types::Phase;
use crate::validation::Evaluation;

/// File name of the per-case record.
pub const METRICS_FILE: &str = "metrics.json";

/// Git provenance of the producing checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub commit: String,
    pub dirty: bool,
}

impl BuildInfo {
    /// Capture from `git`; falls back to `"unknown"` / dirty outside a
    /// checkout.
    pub fn capture() -> Self {
        let (commit, dirty) = get_git_info();
        Self { commit, dirty }
    }

    pub fn for_test() -> Self {
        Self {
            commit: "test_sha".to_string(),
            dirty: false,
        }
    }
}

/// Calendar window and coverage of the observed series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataWindow {
    pub start: String,
    pub end: String,
    pub split: String,
    pub obs_mean: f64,
    pub steps: usize,
    pub val_steps: usize,
    pub expected_months: usize,
    pub observed_months: usize,
    pub coverage: f64,
    pub outlier_share: f64,
}

impl DataWindow {
    /// Monthly calendar starting at `start_year-start_month-01`.
    /// Synthetic data is complete by construction: coverage 1, no outliers.
    pub fn monthly(
        start_year: i32,
        start_month: u32,
        steps: usize,
        split: usize,
        obs_mean: f64,
    ) -> Self {
        let end_offset = steps.saturating_sub(1);
        Self {
            start: month_label(start_year, start_month, 0),
            end: month_label(start_year, start_month, end_offset),
            split: month_label(start_year, start_month, split),
            obs_mean,
            steps,
            val_steps: steps - split.min(steps),
            expected_months: steps,
            observed_months: steps,
            coverage: 1.0,
            outlier_share: 0.0,
        }
    }
}

fn month_label(year: i32, month: u32, offset: usize) -> String {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.checked_add_months(Months::new(offset as u32)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fitted parameters as recorded in the phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub forcing_scale: f64,
    pub macro_coupling: f64,
    pub damping: f64,
    /// Always 0 for fair evaluation; anything else marks a nudged record.
    pub assimilation_strength: f64,
    pub ode_alpha: f64,
    pub ode_beta: f64,
}

/// Validation outcome for one {case, phase}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub data: DataWindow,
    pub calibration: CalibrationRecord,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

/// A freshly computed phase, or one carried over untouched from a previous
/// `metrics.json` (whatever its shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseEntry {
    Fresh(Box<PhaseRecord>),
    Preserved(serde_json::Value),
}

impl PhaseEntry {
    pub fn as_record(&self) -> Option<&PhaseRecord> {
        match self {
            PhaseEntry::Fresh(r) => Some(r),
            PhaseEntry::Preserved(_) => None,
        }
    }
}

impl From<PhaseRecord> for PhaseEntry {
    fn from(r: PhaseRecord) -> Self {
        PhaseEntry::Fresh(Box::new(r))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phases {
    pub synthetic: PhaseEntry,
    pub real: PhaseEntry,
}

impl Phases {
    pub fn get(&self, phase: Phase) -> &PhaseEntry {
        match phase {
            Phase::Synthetic => &self.synthetic,
            Phase::Real => &self.real,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminismInfo {
    /// SHA-256 of the serialised phases.
    pub checksum: String,
}

/// Top-level contents of `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseEnvelope {
    pub generated_at: String,
    pub git: BuildInfo,
    pub phases: Phases,
    pub determinism: DeterminismInfo,
}

impl CaseEnvelope {
    pub fn new(generated_at: String, git: BuildInfo, phases: Phases) -> Self {
        let checksum = Self::compute_checksum(&phases);
        Self {
            generated_at,
            git,
            phases,
            determinism: DeterminismInfo { checksum },
        }
    }

    /// Checksum over the compact JSON encoding of the phases. Excludes
    /// `generated_at` and `git` so identical results hash identically.
    pub fn compute_checksum(phases: &Phases) -> String {
        let payload = serde_json::to_vec(phases).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&payload);
        hex_encode(&hasher.finalize())
    }

    /// Overwrite `path` with this envelope.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), OutputError> {
        let path = path.as_ref();
        let io_err = |source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|source| OutputError::Serialize { source })?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Path of the record for `case` under `cases_root`.
pub fn metrics_path(cases_root: &Path, case: &str) -> PathBuf {
    cases_root.join(case).join(METRICS_FILE)
}

/// Read an existing record as untyped JSON. `Ok(None)` when the file does
/// not exist.
pub fn read_metrics_value(path: &Path) -> Result<Option<serde_json::Value>, OutputError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_json::from_str(&text).map_err(|source| OutputError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Errors from reading or writing records.
#[derive(Debug)]
pub enum OutputError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            OutputError::Parse { path, source } => {
                write!(f, "invalid JSON in {}: {}", path.display(), source)
            }
            OutputError::Serialize { source } => write!(f, "serialization error: {}", source),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::Io { source, .. } => Some(source),
            OutputError::Parse { source, .. } => Some(source),
            OutputError::Serialize { source } => Some(source),
        }
    }
}

fn get_git_info() -> (String, bool) {
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .filter(|s| !s.is_empty());

    match commit {
        Some(commit) => {
            let dirty = Command::new("git")
                .args(["status", "--porcelain"])
                .output()
                .map(|output| !output.stdout.is_empty())
                .unwrap_or(true);
            (commit, dirty)
        }
        None => ("unknown".to_string(), true),
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_window_for_twenty_years() {
        let w = DataWindow::monthly(2000, 1, 240, 120, 0.5);
        assert_eq!(w.start, "2000-01-01");
        assert_eq!(w.end, "2019-12-01");
        assert_eq!(w.split, "2010-01-01");
        assert_eq!(w.val_steps, 120);
        assert_eq!(w.expected_months, 240);
        assert_eq!(w.coverage, 1.0);
        assert_eq!(w.outlier_share, 0.0);
    }

    #[test]
    fn odd_horizon_window() {
        let w = DataWindow::monthly(2000, 1, 7, 3, 0.0);
        assert_eq!(w.end, "2000-07-01");
        assert_eq!(w.split, "2000-04-01");
        assert_eq!(w.val_steps, 4);
    }

    #[test]
    fn timestamp_shape() {
        let ts = timestamp_now();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn checksum_ignores_timestamp_and_git() {
        let phases = Phases {
            synthetic: PhaseEntry::Preserved(serde_json::json!({"phase": "synthetic"})),
            real: PhaseEntry::Preserved(serde_json::json!({})),
        };
        let a = CaseEnvelope::new("2024-01-01T00:00:00Z".into(), BuildInfo::for_test(), phases.clone());
        let b = CaseEnvelope::new(
            "2025-06-30T12:00:00Z".into(),
            BuildInfo {
                commit: "abc1234".into(),
                dirty: true,
            },
            phases,
        );
        assert_eq!(a.determinism.checksum, b.determinism.checksum);
        assert_eq!(a.determinism.checksum.len(), 64);
    }

    #[test]
    fn phases_lookup_by_phase() {
        let phases = Phases {
            synthetic: PhaseEntry::Preserved(serde_json::json!({"phase": "synthetic"})),
            real: PhaseEntry::Preserved(serde_json::json!({"phase": "real"})),
        };
        for phase in Phase::ALL {
            let PhaseEntry::Preserved(v) = phases.get(phase) else {
                panic!("expected preserved entry");
            };
            assert_eq!(v["phase"], phase.as_str());
        }
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0x10]), "00ab10");
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_metrics_value(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            read_metrics_value(&bad),
            Err(OutputError::Parse { .. })
        ));
    }
}
