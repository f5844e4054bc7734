// src/main.rs

mod aggregate;
mod cli;
mod config;
mod error;
mod git;
mod model;
mod oracle;
mod renderer;
mod replay;
mod store;
mod timeline;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Parser;
use cli::{Args, Command};
use config::Config;
use git::{GitRepo, RepoGateway};
use indicatif::ProgressBar;
use model::{Snapshot, StrictnessLevel};
use oracle::Oracle;
use renderer::Palette;
use replay::{Replay, SetupCommand, TickOutcome};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use store::SnapshotStore;
use timeline::Timeline;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let start_time = Instant::now();

    let mut config = Config::load(&args.repo, args.config.as_deref())?;
    if let Some(save_dir) = &args.save_dir {
        config.output.save_dir = save_dir.clone();
    }

    match &args.command {
        Command::Snapshot => snapshot(&args.repo, &config)?,
        Command::Timeline { from, to, granularity, setup } => {
            if let Some(granularity) = granularity {
                config.timeline.granularity = *granularity;
            }
            if let Some(setup) = setup {
                config.timeline.setup = setup.split_whitespace().map(String::from).collect();
            }
            timeline(&args.repo, &config, *from, *to)?
        }
        Command::Report { output, width, height } => {
            if let Some(width) = width {
                config.output.width = *width;
            }
            if let Some(height) = height {
                config.output.height = *height;
            }
            config.validate()?;
            report(&args.repo, &config, output.clone())?
        }
    }

    println!("Total time: {:.2?}", start_time.elapsed());
    Ok(())
}

/// Raised by the first Ctrl-C so the replay stops after the current commit
/// and restores the tree; a second Ctrl-C exits at once.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("Interrupted; restoring the working tree after the current commit");
    })
    .context("Failed to install interrupt handler")?;
    Ok(flag)
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Measures the tree as it is now. A clean checkout is stamped with HEAD and
/// its commit time; anything else is a live measurement stamped with now.
fn snapshot(repo_path: &Path, config: &Config) -> Result<()> {
    let repo = GitRepo::open(repo_path).ok();
    let workdir = repo
        .as_ref()
        .map_or_else(|| repo_path.to_path_buf(), |r| r.workdir().to_path_buf());

    let (commit_id, timestamp) = match &repo {
        Some(repo) if repo.workdir_clean()? => match repo.last_commit()? {
            Some(id) => {
                let time = repo.commit_time(&id)?.unwrap_or_else(Utc::now);
                (Some(id), time)
            }
            None => (None, Utc::now()),
        },
        _ => (None, Utc::now()),
    };

    let measurement = config
        .oracle()
        .measure(&workdir)
        .with_context(|| format!("Failed to measure {}", workdir.display()))?;
    let snapshot = Snapshot::new(commit_id, timestamp, measurement);

    let store = SnapshotStore::new(config.save_dir(&workdir));
    let path = store.save(&snapshot)?;
    print_counts(&snapshot);
    println!("Snapshot saved to {}", path.display());
    Ok(())
}

fn timeline(repo_path: &Path, config: &Config, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<()> {
    let mut repo = GitRepo::open(repo_path)?;
    let from = from.map_or(DateTime::<Utc>::MIN_UTC, start_of_day);
    let to = match to {
        Some(day) => end_of_day(day)?,
        None => Utc::now(),
    };

    let sampler = Timeline::new(&repo, from, to, config.timeline.granularity)?;
    let ticks = sampler.ticks()?;
    if ticks.is_empty() {
        return Err(error::Error::NoCommitsInRange {
            from: sampler.start(),
            to: sampler.end(),
        }
        .into());
    }
    println!(
        "Replaying {} commits from {} to {}",
        ticks.len(),
        ticks[0].time.date_naive(),
        ticks[ticks.len() - 1].time.date_naive()
    );

    let oracle = config.oracle();
    let setup: Option<SetupCommand> = config.setup();
    let store = SnapshotStore::new(config.save_dir(repo.workdir()));

    let interrupted = interrupt_flag()?;

    let bar = ProgressBar::new(ticks.len() as u64);
    bar.set_message("Measuring commits");
    let mut saved = 0;
    let mut unsaved = 0;
    let reports = Replay::new(&oracle)
        .with_setup(setup.as_ref())
        .with_cancel(&interrupted)
        .replay(&mut repo, &ticks, |report| {
            if let Some(snapshot) = report.snapshot() {
                match store.save(snapshot) {
                    Ok(_) => saved += 1,
                    Err(e) => {
                        unsaved += 1;
                        warn!("Could not save snapshot for {}: {}", report.tick.id.short(), e);
                    }
                }
            }
            bar.inc(1);
        })?;
    bar.finish_with_message("Replay complete");

    let failed: Vec<_> = reports
        .iter()
        .filter_map(|r| match &r.outcome {
            TickOutcome::Failed { stage, error } => Some((&r.tick, stage, error)),
            TickOutcome::Measured(_) => None,
        })
        .collect();
    println!(
        "Measured {} of {} commits; saved {} snapshots in {}",
        reports.len() - failed.len(),
        ticks.len(),
        saved,
        store.dir().display()
    );
    for (tick, stage, error) in failed {
        println!("  {} ({}): {} failed: {}", tick.id.short(), tick.time.date_naive(), stage, error);
    }
    if unsaved > 0 {
        println!("  {} measured snapshots could not be saved", unsaved);
    }
    if interrupted.load(Ordering::SeqCst) {
        anyhow::bail!("replay interrupted after {} of {} commits", reports.len(), ticks.len());
    }
    Ok(())
}

fn report(repo_path: &Path, config: &Config, output: Option<PathBuf>) -> Result<()> {
    // Snapshots are saved relative to the work tree root; reports need not
    // run inside a repository at all.
    let root = GitRepo::open(repo_path)
        .map(|repo| repo.workdir().to_path_buf())
        .unwrap_or_else(|_| repo_path.to_path_buf());
    let store = SnapshotStore::new(config.save_dir(&root));
    let snapshots = store.load_all()?;
    let series = aggregate::aggregate(&snapshots);
    if series.is_empty() {
        return Err(error::Error::NoSnapshots(store.dir().to_path_buf()).into());
    }
    info!("Aggregated {} snapshots into {} points", snapshots.len(), series.len());

    let output = output.unwrap_or_else(|| store.dir().to_path_buf());
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let series_path = output.join("series.json");
    std::fs::write(&series_path, serde_json::to_string_pretty(&series)?)
        .with_context(|| format!("Failed to write {}", series_path.display()))?;

    let palette = Palette::from_config(&config.palette)?;
    let chart_path = output.join("timeline.png");
    renderer::save_chart(
        &series,
        &palette,
        config.output.width,
        config.output.height,
        &chart_path,
    )?;

    if let (Some(first), Some(last)) = (series.points().first(), series.points().last()) {
        println!(
            "{} points from {} to {}",
            series.len(),
            first.timestamp.date_naive(),
            last.timestamp.date_naive()
        );
        for level in StrictnessLevel::ALL.into_iter().rev() {
            println!(
                "  {:>6} or stricter: {:5.1}% -> {:5.1}%",
                level,
                first.at_or_above(level),
                last.at_or_above(level)
            );
        }
    }
    println!("Wrote {} and {}", series_path.display(), chart_path.display());
    Ok(())
}

fn print_counts(snapshot: &Snapshot) {
    let commit = snapshot.commit_id.as_ref().map_or("uncommitted", |id| id.short());
    println!("{} ({} files, {}ms):", commit, snapshot.counts.total(), snapshot.duration_ms);
    for (level, count) in snapshot.counts.iter() {
        println!("  {:>6}: {}", level, count);
    }
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

fn end_of_day(day: NaiveDate) -> Result<DateTime<Utc>> {
    let time = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
        .context("Invalid end-of-day time")?;
    Ok(Utc.from_utc_datetime(&day.and_time(time)))
}
