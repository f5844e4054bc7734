// src/replay.rs

use crate::error::{Error, NotReplayable, Result};
use crate::git::RepoGateway;
use crate::model::{Snapshot, Tick};
use crate::oracle::Oracle;
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Where a single tick is in its reset → checkout → measure cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStage {
    Resetting,
    CheckedOut,
    SettingUp,
    Measuring,
}

impl fmt::Display for TickStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickStage::Resetting => "reset",
            TickStage::CheckedOut => "checkout",
            TickStage::SettingUp => "setup",
            TickStage::Measuring => "measurement",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Measured(Snapshot),
    /// The stage that failed and why; the tick produced no snapshot.
    Failed { stage: TickStage, error: Error },
}

#[derive(Debug)]
pub struct TickReport {
    pub tick: Tick,
    pub outcome: TickOutcome,
}

impl TickReport {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match &self.outcome {
            TickOutcome::Measured(snapshot) => Some(snapshot),
            TickOutcome::Failed { .. } => None,
        }
    }
}

/// Dependency installation run after each checkout, before measuring.
#[derive(Debug, Clone)]
pub struct SetupCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SetupCommand {
    /// Builds a command from an argv list; `None` when the list is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn run(&self, dir: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Setup {
                command: self.describe(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Setup {
                command: self.describe(),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Exclusive handle on the working tree for the length of a replay.
///
/// Remembers where HEAD was when acquired and puts it back when released,
/// including when dropped during unwinding.
pub struct WorkTree<'r, G: RepoGateway> {
    repo: &'r mut G,
    origin: String,
    restored: bool,
}

impl<'r, G: RepoGateway> WorkTree<'r, G> {
    /// Fails without touching the tree unless it has a commit and no local
    /// modifications.
    pub fn acquire(repo: &'r mut G) -> Result<Self> {
        let head = repo
            .last_commit()?
            .ok_or(NotReplayable::NotVersionControlled)?;
        if !repo.workdir_clean()? {
            return Err(NotReplayable::DirtyWorktree.into());
        }
        let origin = match repo.current_branch()? {
            Some(branch) => branch,
            None => head.0,
        };
        debug!("Replay will restore {}", origin);
        Ok(Self {
            repo,
            origin,
            restored: false,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn path(&self) -> &Path {
        self.repo.workdir()
    }

    pub fn hard_reset(&mut self) -> Result<()> {
        self.repo.hard_reset()
    }

    pub fn checkout(&mut self, tick: &Tick) -> Result<()> {
        self.repo.checkout(tick.id.as_str())
    }

    /// Returns the tree to where it was when acquired.
    pub fn restore(mut self) -> Result<()> {
        self.restore_in_place()
    }

    /// Moves HEAD back even when the reset fails; the first error wins.
    fn restore_in_place(&mut self) -> Result<()> {
        self.restored = true;
        let reset = self.repo.hard_reset();
        if let Err(e) = &reset {
            warn!("Reset before restoring {} failed: {}", self.origin, e);
        }
        let checkout = self.repo.checkout(&self.origin);
        reset.and(checkout)?;
        info!("Restored working tree to {}", self.origin);
        Ok(())
    }
}

impl<G: RepoGateway> Drop for WorkTree<'_, G> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.restore_in_place() {
            error!("Failed to restore working tree to {}: {}", self.origin, e);
        }
    }
}

/// Measures a list of ticks one after another on a single working tree.
pub struct Replay<'a, O: Oracle> {
    oracle: &'a O,
    setup: Option<&'a SetupCommand>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, O: Oracle> Replay<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self {
            oracle,
            setup: None,
            cancel: None,
        }
    }

    pub fn with_setup(mut self, setup: Option<&'a SetupCommand>) -> Self {
        self.setup = setup;
        self
    }

    /// Stops before the next tick once the flag is raised.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replays `ticks` in order and reports each outcome, calling `on_each`
    /// as soon as a tick is done. The repository ends on the branch or
    /// commit it started on, whatever happens.
    pub fn replay<G, F>(&self, repo: &mut G, ticks: &[Tick], mut on_each: F) -> Result<Vec<TickReport>>
    where
        G: RepoGateway,
        F: FnMut(&TickReport),
    {
        let mut tree = WorkTree::acquire(repo)?;
        debug!("Replaying {} commits from {}", ticks.len(), tree.origin());
        let replayed = self.replay_all(&mut tree, ticks, &mut on_each);
        let restored = tree.restore();
        let reports = replayed?;
        restored?;
        Ok(reports)
    }

    fn replay_all<G, F>(
        &self,
        tree: &mut WorkTree<'_, G>,
        ticks: &[Tick],
        on_each: &mut F,
    ) -> Result<Vec<TickReport>>
    where
        G: RepoGateway,
        F: FnMut(&TickReport),
    {
        let mut reports = Vec::with_capacity(ticks.len());
        for tick in ticks {
            if self.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                warn!("Replay cancelled after {} of {} commits", reports.len(), ticks.len());
                break;
            }
            let report = TickReport {
                tick: tick.clone(),
                outcome: self.replay_tick(tree, tick)?,
            };
            if let TickOutcome::Failed { stage, error } = &report.outcome {
                warn!("Skipping {}: {} failed: {}", tick.id.short(), stage, error);
            }
            on_each(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// `Err` only when the tree itself can no longer be trusted.
    fn replay_tick<G: RepoGateway>(&self, tree: &mut WorkTree<'_, G>, tick: &Tick) -> Result<TickOutcome> {
        let failed = |stage: TickStage, error: Error| -> Result<TickOutcome> {
            Ok(TickOutcome::Failed { stage, error })
        };

        debug!("{}: {}", tick.id.short(), TickStage::Resetting);
        tree.hard_reset()?;

        if let Err(e) = tree.checkout(tick) {
            return failed(TickStage::CheckedOut, e);
        }

        if let Some(setup) = self.setup {
            debug!("{}: {}", tick.id.short(), TickStage::SettingUp);
            if let Err(e) = setup.run(tree.path()) {
                return failed(TickStage::SettingUp, e);
            }
        }

        debug!("{}: {}", tick.id.short(), TickStage::Measuring);
        match self.oracle.measure(tree.path()) {
            Ok(measurement) => Ok(TickOutcome::Measured(Snapshot::new(
                Some(tick.id.clone()),
                tick.time,
                measurement,
            ))),
            Err(e) => failed(TickStage::Measuring, e),
        }
    }
}
