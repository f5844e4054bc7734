// src/cli.rs

use crate::timeline::Granularity;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the git repository to measure
    #[arg(short, long, global = true, default_value = ".")]
    pub repo: PathBuf,

    /// Configuration file (defaults to sigil-timeline.toml in the repository)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory snapshots are saved to and read from
    #[arg(long, global = true)]
    pub save_dir: Option<PathBuf>,

    /// Log more (-v for progress details, -vv for every step)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measure the current working tree and save one snapshot
    Snapshot,

    /// Replay the repository history and save a snapshot per sampled commit
    Timeline {
        /// First day to sample (YYYY-MM-DD, UTC). Defaults to the first commit
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to sample (YYYY-MM-DD, UTC, inclusive). Defaults to now
        #[arg(long)]
        to: Option<NaiveDate>,

        /// How sparsely to sample history
        #[arg(long, value_enum)]
        granularity: Option<Granularity>,

        /// Command run after each checkout, before measuring (e.g. "bundle install")
        #[arg(long)]
        setup: Option<String>,
    },

    /// Merge saved snapshots into a series file and a chart
    Report {
        /// Where to write series.json and timeline.png (defaults to the save directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Width of the chart in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Height of the chart in pixels
        #[arg(long)]
        height: Option<u32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timeline_flags() {
        let args = Args::try_parse_from([
            "sigil-timeline",
            "timeline",
            "--from",
            "2024-01-01",
            "--granularity",
            "week",
            "-r",
            "/tmp/project",
        ])
        .unwrap();
        assert_eq!(args.repo, PathBuf::from("/tmp/project"));
        match args.command {
            Command::Timeline { from, to, granularity, setup } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(to, None);
                assert_eq!(granularity, Some(Granularity::Week));
                assert_eq!(setup, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_dates() {
        assert!(Args::try_parse_from(["sigil-timeline", "timeline", "--from", "last week"]).is_err());
    }
}
