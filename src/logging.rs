// src/logging.rs
//
// Telemetry sinks for the recomputation pipeline.
// - EventSink: trait used by the case pipeline
// - NoopSink:  discards all events
// - FileSink:  writes one JSON object per event (JSONL) for later inspection

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::types::Phase;

/// Structured pipeline events, tagged by `event` in the JSONL output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    CaseStarted {
        case: String,
        seed_base: u64,
        horizon: usize,
    },
    CaseSkipped {
        case: String,
        reason: String,
    },
    PhaseCalibrated {
        case: String,
        phase: Phase,
        ode_alpha: f64,
        ode_beta: f64,
        ode_fallback: bool,
        forcing_scale: f64,
        macro_coupling: f64,
        damping: f64,
        train_rmse: f64,
    },
    PhaseEvaluated {
        case: String,
        phase: Phase,
        edi: f64,
        criteria_passed: usize,
        overall_pass: bool,
        verdict: String,
    },
    RealPhasePreserved {
        case: String,
    },
    RealPhaseRegenerated {
        case: String,
        reason: String,
    },
    RecordWritten {
        case: String,
        path: String,
        checksum: String,
    },
}

/// Abstract sink for pipeline telemetry.
pub trait EventSink {
    fn log(&mut self, event: &PipelineEvent);
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn log(&mut self, _event: &PipelineEvent) {
        // intentionally no-op
    }
}

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<PipelineEvent>,
}

impl EventSink for MemorySink {
    fn log(&mut self, event: &PipelineEvent) {
        self.events.push(event.clone());
    }
}

/// JSONL file sink.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create a new sink writing to `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for FileSink {
    fn log(&mut self, event: &PipelineEvent) {
        // Logging failures never abort a run.
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(self.writer, "{}", line);
            let _ = self.writer.flush();
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn log(&mut self, event: &PipelineEvent) {
        (**self).log(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_writes_one_tagged_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let mut sink = FileSink::create(&path).unwrap();
            sink.log(&PipelineEvent::CaseStarted {
                case: "01_caso_clima".into(),
                seed_base: 42,
                horizon: 240,
            });
            sink.log(&PipelineEvent::RealPhasePreserved {
                case: "13_caso_movilidad".into(),
            });
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "case_started");
        assert_eq!(first["seed_base"], 42);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "real_phase_preserved");
    }

    #[test]
    fn memory_sink_through_mut_ref() {
        fn emit<S: EventSink>(mut sink: S) {
            sink.log(&PipelineEvent::CaseSkipped {
                case: "x".into(),
                reason: "missing".into(),
            });
        }

        let mut mem = MemorySink::default();
        emit(&mut mem);
        NoopSink.log(&PipelineEvent::RealPhasePreserved { case: "y".into() });
        assert_eq!(mem.events.len(), 1);
    }
}
