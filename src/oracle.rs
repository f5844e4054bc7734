// src/oracle.rs

use crate::error::{Error, Result};
use crate::model::{Measurement, SigilCounts, StrictnessLevel};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::debug;

/// Argument placeholder replaced by the path of a scratch metrics file.
pub const METRICS_PLACEHOLDER: &str = "{metrics}";

const SIGIL_METRIC: &str = "types.input.files.sigil.";

/// The external type checker, seen as a source of strictness counts.
pub trait Oracle {
    fn measure(&self, path: &Path) -> Result<Measurement>;
}

/// Runs a type checker process and reads its metrics payload.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    pub program: String,
    pub args: Vec<String>,
    /// Stripped from metric names before they are matched.
    pub metrics_prefix: String,
}

impl CommandOracle {
    fn writes_metrics_file(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(METRICS_PLACEHOLDER))
    }
}

impl Oracle for CommandOracle {
    fn measure(&self, path: &Path) -> Result<Measurement> {
        let metrics_file = tempfile::Builder::new()
            .prefix("sigil-metrics-")
            .suffix(".json")
            .tempfile()
            .map_err(|source| Error::OracleUnavailable {
                program: self.program.clone(),
                source,
            })?;
        let metrics_path = metrics_file.path().to_string_lossy().into_owned();

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(METRICS_PLACEHOLDER, &metrics_path))
            .collect();

        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::OracleUnavailable {
                program: self.program.clone(),
                source,
            })?;
        let duration_ms = started.elapsed().as_millis() as u64;

        // Type errors make checkers exit non-zero; only the payload matters.
        debug!(
            "{} exited with {} after {}ms",
            self.program, output.status, duration_ms
        );

        let payload = if self.writes_metrics_file() {
            let bytes = std::fs::read(metrics_file.path())
                .map_err(|e| Error::OracleOutput(format!("could not read metrics file: {}", e)))?;
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        if payload.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::OracleOutput(format!(
                "no metrics produced ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let counts = parse_metrics(&payload, &self.metrics_prefix)?;
        Ok(Measurement { counts, duration_ms })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Metrics { metrics: Vec<Metric> },
    Flat(std::collections::BTreeMap<String, u64>),
}

#[derive(Deserialize)]
struct Metric {
    name: String,
    value: u64,
}

/// Reads per-level counts from either a list of named metrics or a flat
/// `{level: count}` object. Levels that are not reported count as zero.
pub fn parse_metrics(payload: &str, prefix: &str) -> Result<SigilCounts> {
    let payload: Payload =
        serde_json::from_str(payload).map_err(|e| Error::OracleOutput(e.to_string()))?;

    let mut counts = SigilCounts::default();
    match payload {
        Payload::Metrics { metrics } => {
            for metric in metrics {
                let name = metric.name.strip_prefix(prefix).unwrap_or(&metric.name);
                let level = name
                    .trim_start_matches('.')
                    .strip_prefix(SIGIL_METRIC)
                    .and_then(|level| level.parse::<StrictnessLevel>().ok());
                if let Some(level) = level {
                    counts.set(level, metric.value);
                }
            }
        }
        Payload::Flat(map) => {
            for (key, value) in map {
                let level = key
                    .parse::<StrictnessLevel>()
                    .map_err(Error::OracleOutput)?;
                counts.set(level, value);
            }
        }
    }
    if counts.checked_total().is_none() {
        return Err(Error::OracleOutput("file counts overflow".to_string()));
    }
    Ok(counts)
}
