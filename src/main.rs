// src/main.rs
//
// Thin harness around the emergence_audit library.
// All of the real logic lives in the lib crate (pipeline, summarize, audit).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use emergence_audit::output::timestamp_now;
use emergence_audit::summarize::summarize_with_format;
use emergence_audit::{
    audit_cases, console_summary, AuditThresholds, BuildInfo, CaseOutcome, CasePipeline,
    CaseRegistry, EventSink, FileSink, GridSimulator, NoopSink, OutputFormat, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(name = "emergence_audit")]
#[command(about = "Recompute, summarize and audit per-case emergence metrics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Regenerate metrics.json for registered cases (fair evaluation)
    Regenerate {
        /// Case to regenerate (repeatable; default: every registered case)
        #[arg(long = "case")]
        cases: Vec<String>,

        /// Root directory holding the NN_caso_* directories
        #[arg(long, default_value = "cases")]
        cases_dir: PathBuf,

        /// YAML case registry replacing the built-in table
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of monthly steps per phase
        #[arg(long)]
        horizon: Option<usize>,

        /// Create case directories that do not exist yet
        #[arg(long)]
        create_missing: bool,

        /// Optional JSONL path for pipeline events
        #[arg(long)]
        log_jsonl: Option<PathBuf>,
    },

    /// Aggregate all case records into one table
    Summarize {
        #[arg(long, default_value = "cases")]
        cases_dir: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,

        /// Write the table to this file instead of stdout
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Flag degenerate or stale numbers in case records (exit 1 on findings)
    Audit {
        #[arg(long, default_value = "cases")]
        cases_dir: PathBuf,

        /// Markdown audit report path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the case registry
    Cases {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Markdown,
}

impl From<FormatArg> for OutputFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Markdown => OutputFormat::Markdown,
        }
    }
}

/// Build the telemetry sink as a trait object so we can choose between
/// FileSink and NoopSink at runtime.
fn build_sink(log_jsonl: Option<&Path>) -> Box<dyn EventSink> {
    if let Some(path) = log_jsonl {
        match FileSink::create(path) {
            Ok(s) => Box::new(s),
            Err(err) => {
                eprintln!(
                    "Failed to create log file ({}), falling back to NoopSink: {err}",
                    path.display()
                );
                Box::new(NoopSink)
            }
        }
    } else {
        Box::new(NoopSink)
    }
}

fn load_registry(path: Option<&Path>) -> Result<CaseRegistry> {
    match path {
        Some(p) => CaseRegistry::from_yaml_file(p)
            .with_context(|| format!("loading case registry {}", p.display())),
        None => Ok(CaseRegistry::builtin()),
    }
}

fn regenerate(
    cases: Vec<String>,
    cases_dir: &Path,
    config: Option<&Path>,
    horizon: Option<usize>,
    create_missing: bool,
    log_jsonl: Option<&Path>,
) -> Result<()> {
    let registry = load_registry(config)?;

    let mut cfg = PipelineConfig::from_env_or_default();
    if let Some(h) = horizon {
        if h < 4 {
            bail!("--horizon must be at least 4 (got {h})");
        }
        cfg.horizon = h;
    }

    let names: Vec<String> = if cases.is_empty() {
        registry.names().map(str::to_string).collect()
    } else {
        cases
    };
    if let Some(unknown) = names.iter().find(|n| registry.get(n).is_none()) {
        bail!("unknown case '{unknown}' (see `emergence_audit cases`)");
    }

    let sim = GridSimulator::new();
    let pipeline =
        CasePipeline::new(&sim, &cfg, BuildInfo::capture()).create_missing(create_missing);
    let mut sink = build_sink(log_jsonl);

    println!(
        "Regenerating {} case(s) in {} (horizon {}, {})",
        names.len(),
        cases_dir.display(),
        cfg.horizon,
        cfg.version
    );

    let (mut written, mut skipped) = (0usize, 0usize);
    for name in &names {
        let Some(case) = registry.get(name) else {
            continue;
        };
        let outcome = pipeline
            .regenerate_case(cases_dir, name, case, sink.as_mut())
            .with_context(|| format!("regenerating {name}"))?;
        match outcome {
            CaseOutcome::Written { envelope, .. } => {
                written += 1;
                let note = if case.only_synthetic {
                    " (synthetic only)"
                } else {
                    ""
                };
                println!("  {name}{note} {}", console_summary(&envelope));
            }
            CaseOutcome::Skipped { reason } => {
                skipped += 1;
                eprintln!("  {name}: skipped ({reason})");
            }
        }
    }

    println!("Done: {written} written, {skipped} skipped");
    Ok(())
}

fn summarize(
    cases_dir: &Path,
    config: Option<&Path>,
    format: FormatArg,
    write: Option<&Path>,
) -> Result<()> {
    let registry = load_registry(config)?;
    let rows = match write {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let rows = summarize_with_format(cases_dir, &registry, &mut writer, format.into())?;
            writer.flush()?;
            println!("Wrote {} row(s) to {}", rows.len(), path.display());
            rows
        }
        None => summarize_with_format(cases_dir, &registry, io::stdout().lock(), format.into())?,
    };
    if rows.is_empty() {
        eprintln!("No case directories found under {}", cases_dir.display());
    }
    Ok(())
}

fn audit(cases_dir: &Path, output: Option<&Path>) -> Result<bool> {
    let report = audit_cases(cases_dir, &AuditThresholds::default())
        .with_context(|| format!("scanning {}", cases_dir.display()))?;

    println!("Auditing {} case(s)...", report.cases_total);
    let mut last_case = "";
    for f in &report.findings {
        if f.case != last_case {
            println!("  {}", f.case);
            last_case = &f.case;
        }
        println!("     - {f}");
    }
    println!(
        "Cases: {} | OK: {} | With findings: {} | Total findings: {}",
        report.cases_total,
        report.cases_ok(),
        report.cases_with_findings(),
        report.findings.len()
    );

    if let Some(path) = output {
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        report.write_markdown(&mut writer, &timestamp_now())?;
        writer.flush()?;
        println!("Report: {}", path.display());
    }

    Ok(report.is_clean())
}

fn list_cases(config: Option<&Path>) -> Result<()> {
    let registry = load_registry(config)?;
    println!("{:<40} {:>3} {:<6} DESCRIPTION", "CASE", "LOE", "REAL");
    for name in registry.names() {
        let Some(case) = registry.get(name) else {
            continue;
        };
        let loe = registry
            .evidence_level(name)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        let real = if case.only_synthetic { "keep" } else { "regen" };
        println!("{:<40} {:>3} {:<6} {}", name, loe, real, case.description);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Regenerate {
            cases,
            cases_dir,
            config,
            horizon,
            create_missing,
            log_jsonl,
        } => regenerate(
            cases,
            &cases_dir,
            config.as_deref(),
            horizon,
            create_missing,
            log_jsonl.as_deref(),
        ),
        Commands::Summarize {
            cases_dir,
            config,
            format,
            write,
        } => summarize(&cases_dir, config.as_deref(), format, write.as_deref()),
        Commands::Audit { cases_dir, output } => {
            if !audit(&cases_dir, output.as_deref())? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Cases { config } => list_cases(config.as_deref()),
    }
}
