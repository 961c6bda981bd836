// src/audit.rs
//
// Numeric audit of persisted records. Flags values that betray a degenerate
// or stale evaluation rather than a real result:
//
// - EDI > 0.90              possible tautology (model fed its own target)
// - 0 < rmse_abm < 1e-10    possible overfit
// - |EDI| > 5               EDI out of range
// - CR undefined or ≤ 0
// - overall_pass missing
// - assimilation_strength > 0 in calibration (nudged evaluation)
// - effective_information == 0 in every phase (EI never computed)
// - metrics.json missing or unreadable

use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::output::METRICS_FILE;
use crate::summarize::{discover_cases, PhaseSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct AuditThresholds {
    pub edi_max: f64,
    pub rmse_floor: f64,
    pub edi_abs_max: f64,
}

impl Default for AuditThresholds {
    fn default() -> Self {
        Self {
            edi_max: 0.90,
            rmse_floor: 1e-10,
            edi_abs_max: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    MissingMetrics,
    UnreadableMetrics,
    PossibleTautology,
    PossibleOverfit,
    EdiOutOfRange,
    CohesionUndefined,
    MissingOverallPass,
    NudgedCalibration,
    StaleEffectiveInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub case: String,
    pub phase: Option<String>,
    pub kind: FindingKind,
    pub message: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.phase {
            Some(p) => write!(f, "{}: {}", p, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub cases_total: usize,
    pub findings: Vec<Finding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Number of distinct cases with at least one finding.
    pub fn cases_with_findings(&self) -> usize {
        let mut cases: Vec<&str> = self.findings.iter().map(|f| f.case.as_str()).collect();
        cases.dedup();
        cases.len()
    }

    pub fn cases_ok(&self) -> usize {
        self.cases_total - self.cases_with_findings()
    }

    pub fn write_markdown<W: Write>(&self, mut writer: W, generated_at: &str) -> io::Result<()> {
        writeln!(writer, "# Simulation Audit")?;
        writeln!(writer)?;
        writeln!(writer, "**Date:** {}", generated_at)?;
        writeln!(writer, "**Cases audited:** {}", self.cases_total)?;
        writeln!(
            writer,
            "**OK:** {} | **With findings:** {}",
            self.cases_ok(),
            self.cases_with_findings()
        )?;
        writeln!(writer, "**Total findings:** {}", self.findings.len())?;
        writeln!(writer)?;
        if self.findings.is_empty() {
            writeln!(writer, "No findings.")?;
        } else {
            writeln!(writer, "| Case | Finding |")?;
            writeln!(writer, "|------|---------|")?;
            for f in &self.findings {
                writeln!(writer, "| {} | {} |", f.case, f)?;
            }
        }
        Ok(())
    }
}

/// Audit one envelope value.
pub fn audit_envelope(case: &str, envelope: &Value, th: &AuditThresholds) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut push = |phase: Option<&str>, kind, message: String| {
        findings.push(Finding {
            case: case.to_string(),
            phase: phase.map(str::to_string),
            kind,
            message,
        });
    };

    let phases: Vec<(&String, &Value)> = envelope
        .get("phases")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter(|(_, v)| v.as_object().is_some_and(|o| !o.is_empty()))
                .collect()
        })
        .unwrap_or_default();

    let mut ei_values = Vec::new();
    for (name, phase) in &phases {
        let name = name.as_str();
        let snap = PhaseSnapshot::from_value(phase);

        if let Some(edi) = snap.edi() {
            if edi > th.edi_max {
                push(
                    Some(name),
                    FindingKind::PossibleTautology,
                    format!("EDI={:.3} > {} (possible tautology)", edi, th.edi_max),
                );
            }
            if edi.abs() > th.edi_abs_max {
                push(
                    Some(name),
                    FindingKind::EdiOutOfRange,
                    format!("EDI={:.3} outside [-{}, {}]", edi, th.edi_abs_max, th.edi_abs_max),
                );
            }
        }

        if let Some(ra) = snap.rmse_abm {
            if ra > 0.0 && ra < th.rmse_floor {
                push(
                    Some(name),
                    FindingKind::PossibleOverfit,
                    format!("RMSE={:.2e} < {:.0e} (possible overfit)", ra, th.rmse_floor),
                );
            }
        }

        match snap.cohesion_ratio() {
            Some(cr) if cr > 0.0 => {}
            Some(cr) => push(
                Some(name),
                FindingKind::CohesionUndefined,
                format!("CR={:.3} <= 0", cr),
            ),
            None => push(
                Some(name),
                FindingKind::CohesionUndefined,
                "CR n/a (missing or zero external cohesion)".to_string(),
            ),
        }

        if snap.overall_pass.is_none() {
            push(
                Some(name),
                FindingKind::MissingOverallPass,
                "overall_pass missing".to_string(),
            );
        }

        if let Some(strength) = snap.assimilation_strength {
            if strength > 0.0 {
                push(
                    Some(name),
                    FindingKind::NudgedCalibration,
                    format!(
                        "assimilation_strength={} > 0 (evaluation nudged toward observations)",
                        strength
                    ),
                );
            }
        }

        if let Some(ei) = snap.effective_information {
            ei_values.push(ei);
        }
    }

    if !ei_values.is_empty() && ei_values.len() == phases.len() && ei_values.iter().all(|&e| e == 0.0) {
        push(
            None,
            FindingKind::StaleEffectiveInformation,
            "effective_information is 0.0 in every phase".to_string(),
        );
    }

    findings
}

/// Audit every case directory under `root`.
pub fn audit_cases(root: &Path, th: &AuditThresholds) -> io::Result<AuditReport> {
    let dirs = discover_cases(root)?;
    let mut report = AuditReport {
        cases_total: dirs.len(),
        findings: Vec::new(),
    };

    for dir in &dirs {
        let case = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = dir.join(METRICS_FILE);
        if !path.exists() {
            report.findings.push(Finding {
                case,
                phase: None,
                kind: FindingKind::MissingMetrics,
                message: format!("{} missing", METRICS_FILE),
            });
            continue;
        }

        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(value) => report.findings.extend(audit_envelope(&case, &value, th)),
            Err(e) => report.findings.push(Finding {
                case,
                phase: None,
                kind: FindingKind::UnreadableMetrics,
                message: format!("{} unreadable: {}", METRICS_FILE, e),
            }),
        }
    }

    Ok(report)
}
