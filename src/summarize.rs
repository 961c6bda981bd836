// src/summarize.rs
//
// Summarize command: scans `NN_caso_*` directories under the cases root and
// aggregates their metrics.json files into one table (fixed-width text or
// Markdown).
//
// Records are read as untyped JSON so hand-edited, legacy or partially
// written files still produce a row.

use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::CaseRegistry;
use crate::output::METRICS_FILE;
use crate::validation::{emergence_index, EDI_EPSILON};

/// Minimum EDI for a case to count as validated.
pub const VALIDATED_EDI: f64 = 0.30;

const CRITERIA_KEYS: [&str; 5] = [
    "c1_convergence",
    "c2_robustness",
    "c3_replication",
    "c4_validity",
    "c5_uncertainty",
];

/// Output format for summarize command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Fixed-width text table (default).
    #[default]
    Text,
    /// Markdown table.
    Markdown,
}

/// Numbers read back from one persisted phase. Absent or non-numeric fields
/// stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseSnapshot {
    pub rmse_abm: Option<f64>,
    pub rmse_reduced: Option<f64>,
    pub internal: Option<f64>,
    pub external: Option<f64>,
    pub criteria_passed: usize,
    pub overall_pass: Option<bool>,
    pub tautological: bool,
    pub effective_information: Option<f64>,
    pub assimilation_strength: Option<f64>,
}

fn number(value: &Value, section: &str, key: &str) -> Option<f64> {
    value
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(Value::as_f64)
        .filter(|x| x.is_finite())
}

impl PhaseSnapshot {
    pub fn from_value(phase: &Value) -> Self {
        let tautological = phase
            .get("emergence")
            .and_then(|e| e.get("tautological"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || phase.get("verdict").and_then(Value::as_str) == Some("tautological");

        Self {
            rmse_abm: number(phase, "errors", "rmse_abm"),
            rmse_reduced: number(phase, "errors", "rmse_reduced"),
            internal: number(phase, "symploke", "internal"),
            external: number(phase, "symploke", "external"),
            criteria_passed: CRITERIA_KEYS
                .iter()
                .filter(|k| phase.get(**k).and_then(Value::as_bool).unwrap_or(false))
                .count(),
            overall_pass: phase.get("overall_pass").and_then(Value::as_bool),
            tautological,
            effective_information: number(phase, "emergence", "effective_information"),
            assimilation_strength: number(phase, "calibration", "assimilation_strength"),
        }
    }

    /// Emergence Detection Index recomputed from the stored errors.
    pub fn edi(&self) -> Option<f64> {
        match (self.rmse_reduced, self.rmse_abm) {
            (Some(rr), Some(ra)) => {
                Some(emergence_index(rr, ra, EDI_EPSILON)).filter(|e| e.is_finite())
            }
            _ => None,
        }
    }

    /// Cohesion Ratio, internal / external; `None` when external ≤ 0.
    pub fn cohesion_ratio(&self) -> Option<f64> {
        match (self.internal, self.external) {
            (Some(i), Some(e)) if e > 0.0 => Some(i / e),
            _ => None,
        }
    }
}

/// Overall judgement of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Validated,
    Rejected,
    Partial(usize),
    Tautological,
    NoMetrics,
}

impl CaseStatus {
    pub fn classify(snapshot: &PhaseSnapshot) -> Self {
        if snapshot.tautological {
            return CaseStatus::Tautological;
        }
        // Missing errors count as no emergence.
        let edi = snapshot.edi().unwrap_or(0.0);
        if edi >= VALIDATED_EDI && snapshot.criteria_passed == 5 {
            CaseStatus::Validated
        } else if edi < VALIDATED_EDI {
            CaseStatus::Rejected
        } else {
            CaseStatus::Partial(snapshot.criteria_passed)
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaseStatus::Validated => write!(f, "Validated"),
            CaseStatus::Rejected => write!(f, "Rejected (low EDI)"),
            CaseStatus::Partial(k) => write!(f, "Partial ({}/5)", k),
            CaseStatus::Tautological => write!(f, "Tautological"),
            CaseStatus::NoMetrics => write!(f, "No metrics"),
        }
    }
}

/// One case in the aggregated report.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub case: String,
    /// Level of evidence, when the registry knows the case.
    pub loe: Option<u8>,
    /// Phase the numbers were taken from ("real" preferred).
    pub phase: Option<String>,
    pub edi: Option<f64>,
    pub cr: Option<f64>,
    pub criteria_passed: usize,
    pub overall_pass: Option<bool>,
    pub status: CaseStatus,
    /// metrics.json path relative to the cases root.
    pub path: PathBuf,
}

impl SummaryRow {
    fn no_metrics(case: String, loe: Option<u8>, path: PathBuf) -> Self {
        Self {
            case,
            loe,
            phase: None,
            edi: None,
            cr: None,
            criteria_passed: 0,
            overall_pass: None,
            status: CaseStatus::NoMetrics,
            path,
        }
    }

    /// Build a row from an envelope value, preferring the real phase.
    pub fn from_json_value(case: String, loe: Option<u8>, value: &Value, path: PathBuf) -> Self {
        let phases = value.get("phases");
        let pick = ["real", "synthetic"].iter().find_map(|name| {
            phases
                .and_then(|p| p.get(*name))
                .filter(|ph| ph.as_object().is_some_and(|o| !o.is_empty()))
                .map(|ph| (name.to_string(), ph))
        });

        let Some((phase_name, phase)) = pick else {
            return Self::no_metrics(case, loe, path);
        };

        let snap = PhaseSnapshot::from_value(phase);
        Self {
            case,
            loe,
            phase: Some(phase_name),
            edi: snap.edi(),
            cr: snap.cohesion_ratio(),
            criteria_passed: snap.criteria_passed,
            overall_pass: snap.overall_pass,
            status: CaseStatus::classify(&snap),
            path,
        }
    }
}

/// True for directory names shaped like `NN_caso_<name>`.
pub fn is_case_dir_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 8
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && name[2..].starts_with("_caso_")
}

/// Case directories directly under `root`, sorted by name.
pub fn discover_cases(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !root.is_dir() {
        return Ok(dirs);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(is_case_dir_name)
            .unwrap_or(false);
        if path.is_dir() && matches {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Parse one case directory into a row; unreadable files become
/// "No metrics".
pub fn parse_case(case_dir: &Path, root: &Path, registry: &CaseRegistry) -> SummaryRow {
    let case = case_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let loe = registry.evidence_level(&case);
    let metrics = case_dir.join(METRICS_FILE);
    let relative = metrics
        .strip_prefix(root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| metrics.clone());

    let value = fs::read_to_string(&metrics)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok());

    match value {
        Some(v) => SummaryRow::from_json_value(case, loe, &v, relative),
        None => SummaryRow::no_metrics(case, loe, relative),
    }
}

fn fmt_opt(x: Option<f64>) -> String {
    x.map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn fmt_loe(loe: Option<u8>) -> String {
    loe.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Print the summary as a fixed-width text table.
pub fn print_table<W: Write>(rows: &[SummaryRow], mut writer: W) -> io::Result<()> {
    writeln!(
        writer,
        "{:<40} {:>3} {:<9} {:>8} {:>8} {:>5} {:<20} PATH",
        "CASE", "LOE", "PHASE", "EDI", "CR", "C1-5", "STATUS",
    )?;
    writeln!(
        writer,
        "{:-<40} {:->3} {:-<9} {:->8} {:->8} {:->5} {:-<20} {:-<30}",
        "", "", "", "", "", "", "", ""
    )?;

    for row in rows {
        writeln!(
            writer,
            "{:<40} {:>3} {:<9} {:>8} {:>8} {:>5} {:<20} {}",
            row.case,
            fmt_loe(row.loe),
            row.phase.as_deref().unwrap_or("-"),
            fmt_opt(row.edi),
            fmt_opt(row.cr),
            format!("{}/5", row.criteria_passed),
            row.status.to_string(),
            row.path.display()
        )?;
    }

    Ok(())
}

/// Print the summary as a Markdown table.
pub fn print_markdown_table<W: Write>(rows: &[SummaryRow], mut writer: W) -> io::Result<()> {
    writeln!(writer, "# Simulation Summary")?;
    writeln!(writer)?;
    writeln!(writer, "| Case | LoE | EDI | CR | C1–C5 | Status | Record |")?;
    writeln!(writer, "| :--- | ---: | ---: | ---: | ---: | :--- | :--- |")?;

    for row in rows {
        writeln!(
            writer,
            "| {} | {} | {} | {} | {}/5 | {} | `{}` |",
            row.case,
            fmt_loe(row.loe),
            fmt_opt(row.edi),
            fmt_opt(row.cr),
            row.criteria_passed,
            row.status,
            row.path.display()
        )?;
    }

    Ok(())
}

/// Get parsed rows without printing.
pub fn get_summary_rows(root: &Path, registry: &CaseRegistry) -> io::Result<Vec<SummaryRow>> {
    Ok(discover_cases(root)?
        .iter()
        .map(|dir| parse_case(dir, root, registry))
        .collect())
}

/// Discover, parse and print. Returns the rows that were printed.
pub fn summarize_with_format<W: Write>(
    root: &Path,
    registry: &CaseRegistry,
    writer: W,
    format: OutputFormat,
) -> io::Result<Vec<SummaryRow>> {
    let rows = get_summary_rows(root, registry)?;
    match format {
        OutputFormat::Text => print_table(&rows, writer)?,
        OutputFormat::Markdown => print_markdown_table(&rows, writer)?,
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn phase(ra: f64, rr: f64, passes: usize) -> Value {
        let mut v = json!({
            "errors": {"rmse_abm": ra, "rmse_reduced": rr},
            "symploke": {"internal": 0.6, "external": 0.3},
        });
        for key in CRITERIA_KEYS.iter().take(passes) {
            v[*key] = json!(true);
        }
        v
    }

    fn write_case(root: &Path, name: &str, value: &Value) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(METRICS_FILE), serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn case_dir_names() {
        assert!(is_case_dir_name("02_caso_conciencia"));
        assert!(!is_case_dir_name("caso_conciencia"));
        assert!(!is_case_dir_name("2_caso_x"));
        assert!(!is_case_dir_name("02_case_x"));
    }

    #[test]
    fn snapshot_metrics() {
        let snap = PhaseSnapshot::from_value(&phase(0.2, 1.0, 3));
        assert!((snap.edi().unwrap() - 0.8).abs() < 1e-6);
        assert!((snap.cohesion_ratio().unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(snap.criteria_passed, 3);

        let zero_ext = PhaseSnapshot::from_value(&json!({"symploke": {"internal": 1.0, "external": 0.0}}));
        assert_eq!(zero_ext.cohesion_ratio(), None);
        assert_eq!(zero_ext.edi(), None);
    }

    #[test]
    fn snapshot_edi_uses_the_evaluator_epsilon() {
        // Only the shared epsilon separates these errors.
        let snap = PhaseSnapshot::from_value(&phase(0.0, 1e-9, 0));
        assert_eq!(snap.edi(), Some(0.5));
        assert_eq!(
            crate::config::ValidationThresholds::default().edi_epsilon,
            EDI_EPSILON
        );
    }

    #[test]
    fn status_rules() {
        let status = |v: Value| CaseStatus::classify(&PhaseSnapshot::from_value(&v));
        assert_eq!(status(phase(0.2, 1.0, 5)), CaseStatus::Validated);
        assert_eq!(status(phase(0.2, 1.0, 3)), CaseStatus::Partial(3));
        assert_eq!(status(phase(0.9, 1.0, 5)), CaseStatus::Rejected);
        assert_eq!(status(json!({})), CaseStatus::Rejected);

        let mut t = phase(0.0, 1.0, 5);
        t["emergence"] = json!({"tautological": true});
        assert_eq!(status(t), CaseStatus::Tautological);
        assert_eq!(CaseStatus::Partial(4).to_string(), "Partial (4/5)");
    }

    #[test]
    fn rows_prefer_real_phase_and_flag_missing_metrics() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write_case(
            root,
            "02_caso_conciencia",
            &json!({"phases": {"synthetic": phase(0.9, 1.0, 1), "real": phase(0.2, 1.0, 5)}}),
        );
        write_case(
            root,
            "13_caso_movilidad",
            &json!({"phases": {"synthetic": phase(0.5, 1.0, 4), "real": {}}}),
        );
        fs::create_dir_all(root.join("04_caso_energia")).unwrap();
        fs::create_dir_all(root.join("notes")).unwrap();

        let rows = get_summary_rows(root, &CaseRegistry::builtin()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].case, "02_caso_conciencia");
        assert_eq!(rows[0].phase.as_deref(), Some("real"));
        assert_eq!(rows[0].status, CaseStatus::Validated);
        assert_eq!(rows[0].loe, Some(1));

        assert_eq!(rows[1].case, "04_caso_energia");
        assert_eq!(rows[1].status, CaseStatus::NoMetrics);

        assert_eq!(rows[2].phase.as_deref(), Some("synthetic"));
        assert_eq!(rows[2].status, CaseStatus::Partial(4));
    }

    #[test]
    fn markdown_and_text_output() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write_case(root, "18_caso_wikipedia", &json!({"phases": {"real": phase(0.2, 1.0, 5)}}));

        let mut md = Vec::new();
        summarize_with_format(root, &CaseRegistry::builtin(), &mut md, OutputFormat::Markdown).unwrap();
        let md = String::from_utf8(md).unwrap();
        assert!(md.contains("| Case | LoE | EDI | CR | C1–C5 | Status | Record |"));
        assert!(md.contains("| 18_caso_wikipedia | 3 | 0.800 | 2.000 | 5/5 | Validated |"));

        let mut text = Vec::new();
        summarize_with_format(root, &CaseRegistry::builtin(), &mut text, OutputFormat::Text).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.starts_with("CASE"));
        assert!(text.contains("18_caso_wikipedia"));
        assert!(text.contains("Validated"));
    }
}
