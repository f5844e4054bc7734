// src/error.rs

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Why a replay cannot start.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReplayable {
    #[error("not a git repository with at least one commit")]
    NotVersionControlled,

    #[error("working tree has uncommitted changes; commit or stash them first")]
    DirtyWorktree,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot replay history: {0}")]
    NotReplayable(#[from] NotReplayable),

    #[error("invalid date range: {from} is after {to}")]
    InvalidRange { from: DateTime<Utc>, to: DateTime<Utc> },

    #[error("no commits between {from} and {to}")]
    NoCommitsInRange { from: DateTime<Utc>, to: DateTime<Utc> },

    #[error("failed to check out {target}: {reason}")]
    Checkout { target: String, reason: String },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("type checker `{program}` could not be started: {source}")]
    OracleUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse type checker output: {0}")]
    OracleOutput(String),

    #[error("setup command `{command}` failed: {reason}")]
    Setup { command: String, reason: String },

    #[error("malformed snapshot {path}: {reason}")]
    MalformedSnapshot { path: PathBuf, reason: String },

    #[error("no snapshots found in {0}")]
    NoSnapshots(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write chart: {0}")]
    Render(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
