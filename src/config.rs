// src/config.rs

use crate::error::{Error, Result};
use crate::oracle::CommandOracle;
use crate::replay::SetupCommand;
use crate::timeline::Granularity;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Looked up at the repository root when no `--config` is given.
pub const CONFIG_FILE: &str = "sigil-timeline.toml";

/// Every recognised option. All sections and keys are optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub oracle: OracleConfig,
    pub timeline: TimelineConfig,
    pub output: OutputConfig,
    pub palette: PaletteConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OracleConfig {
    /// Type checker executable.
    pub program: String,
    /// Arguments; `{metrics}` becomes the path of a scratch metrics file.
    pub args: Vec<String>,
    /// Stripped from metric names before matching.
    pub metrics_prefix: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            program: "srb".to_string(),
            args: vec![
                "tc".to_string(),
                "--metrics-file".to_string(),
                "{metrics}".to_string(),
            ],
            metrics_prefix: "ruby_typer.unknown.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TimelineConfig {
    pub granularity: Granularity,
    /// Run after each checkout, e.g. `["bundle", "install"]`. Empty: none.
    pub setup: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Relative paths are resolved against the repository root.
    pub save_dir: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("sigil_timeline"),
            width: 1280,
            height: 720,
        }
    }
}

/// `#rrggbb` overrides for the chart colours of each level.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PaletteConfig {
    pub ignore: Option<String>,
    #[serde(rename = "false")]
    pub false_: Option<String>,
    #[serde(rename = "true")]
    pub true_: Option<String>,
    pub strict: Option<String>,
    pub strong: Option<String>,
}

impl Config {
    /// Reads `explicit` if given (it must exist), otherwise the repository's
    /// `sigil-timeline.toml` if there is one, otherwise the defaults.
    pub fn load(repo: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = repo.join(CONFIG_FILE);
                if !candidate.is_file() {
                    return Ok(Self::default());
                }
                candidate
            }
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checked on load; run again after command-line overrides.
    pub fn validate(&self) -> Result<()> {
        if self.oracle.program.trim().is_empty() {
            return Err(Error::Config("oracle.program must not be empty".to_string()));
        }
        if self.output.width < 2 || self.output.height < 2 {
            return Err(Error::Config(format!(
                "chart size {}x{} is too small",
                self.output.width, self.output.height
            )));
        }
        Ok(())
    }

    pub fn oracle(&self) -> CommandOracle {
        CommandOracle {
            program: self.oracle.program.clone(),
            args: self.oracle.args.clone(),
            metrics_prefix: self.oracle.metrics_prefix.clone(),
        }
    }

    pub fn setup(&self) -> Option<SetupCommand> {
        SetupCommand::from_argv(&self.timeline.setup)
    }

    pub fn save_dir(&self, repo: &Path) -> PathBuf {
        if self.output.save_dir.is_absolute() {
            self.output.save_dir.clone()
        } else {
            repo.join(&self.output.save_dir)
        }
    }
}
