// src/git.rs

use crate::error::{Error, NotReplayable, Result};
use crate::model::{CommitId, Tick};
use chrono::{DateTime, TimeZone, Utc};
use git2::build::CheckoutBuilder;
use git2::{ErrorCode, Oid, Repository, ResetType, StatusOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Version-control operations the sampler and the replay engine rely on.
///
/// Queries borrow the gateway shared; anything that rewrites the working
/// tree needs it exclusively.
pub trait RepoGateway {
    /// Root of the working tree the type checker runs in.
    fn workdir(&self) -> &Path;

    /// Commit HEAD points at, or `None` when there is no history yet.
    fn last_commit(&self) -> Result<Option<CommitId>>;

    fn commit_time(&self, id: &CommitId) -> Result<Option<DateTime<Utc>>>;

    /// First-parent history of HEAD with commit times in `[from, to]`,
    /// oldest first.
    fn history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Tick>>;

    /// Local branch HEAD is attached to, if any.
    fn current_branch(&self) -> Result<Option<String>>;

    /// True when no tracked file has staged or unstaged modifications.
    fn workdir_clean(&self) -> Result<bool>;

    /// Checks out a commit id (detached) or a local branch name, overwriting
    /// untracked files that are tracked at the target. Other untracked files
    /// are left alone.
    fn checkout(&mut self, target: &str) -> Result<()>;

    /// Discards every modification to tracked files.
    fn hard_reset(&mut self) -> Result<()>;
}

/// A git work tree opened through libgit2.
pub struct GitRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl GitRepo {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|_| Error::NotReplayable(NotReplayable::NotVersionControlled))?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or(Error::NotReplayable(NotReplayable::NotVersionControlled))?;
        debug!("Opened git repository at {}", workdir.display());
        Ok(Self { repo, workdir })
    }
}

fn commit_instant(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

impl RepoGateway for GitRepo {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn last_commit(&self) -> Result<Option<CommitId>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        Ok(Some(CommitId(commit.id().to_string())))
    }

    fn commit_time(&self, id: &CommitId) -> Result<Option<DateTime<Utc>>> {
        let Ok(oid) = Oid::from_str(id.as_str()) else {
            return Ok(None);
        };
        match self.repo.find_commit(oid) {
            Ok(commit) => Ok(commit_instant(commit.time().seconds())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Tick>> {
        if self.last_commit()?.is_none() {
            return Ok(Vec::new());
        }

        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.simplify_first_parent()?;

        let mut ticks = Vec::new();
        for oid in revwalk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let Some(time) = commit_instant(commit.time().seconds()) else {
                continue;
            };
            if time >= from && time <= to {
                ticks.push(Tick { id: CommitId(oid.to_string()), time });
            }
        }
        // The walk yields newest first; flip it, then order by time so that
        // commits with skewed clocks still come out chronologically.
        ticks.reverse();
        ticks.sort_by_key(|tick| tick.time);
        Ok(ticks)
    }

    fn current_branch(&self) -> Result<Option<String>> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(String::from)),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn workdir_clean(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }

    fn checkout(&mut self, target: &str) -> Result<()> {
        let checkout_error = |e: git2::Error| Error::Checkout {
            target: target.to_string(),
            reason: e.message().to_string(),
        };

        let (object, reference) = self.repo.revparse_ext(target).map_err(checkout_error)?;
        let commit = object.peel_to_commit().map_err(checkout_error)?;
        // Setup and the type checker can leave untracked files behind at
        // paths a later commit tracks; a safe checkout would refuse.
        let mut force = CheckoutBuilder::new();
        force.force();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut force))
            .map_err(checkout_error)?;

        let moved = match reference.as_ref().filter(|r| r.is_branch()).and_then(|r| r.name()) {
            Some(name) => self.repo.set_head(name),
            None => self.repo.set_head_detached(commit.id()),
        };
        moved.map_err(checkout_error)?;

        debug!("Checked out {}", target);
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<()> {
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.reset(head.as_object(), ResetType::Hard, None)?;
        Ok(())
    }
}

/// In-memory gateway that records every mutation, for exercising the
/// sampler and the replay engine without a real repository.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Checkout(String),
        HardReset,
    }

    pub struct FakeRepo {
        pub workdir: PathBuf,
        /// Oldest first, the way `history` reports them.
        pub commits: Vec<Tick>,
        pub branches: HashMap<String, CommitId>,
        pub head: Option<CommitId>,
        pub branch: Option<String>,
        pub dirty: bool,
        pub unreachable: Vec<String>,
        /// Resets that succeed before every further one fails; `None` never
        /// fails.
        pub resets_left: Option<usize>,
        pub calls: Vec<Call>,
    }

    impl FakeRepo {
        /// A repository whose `main` branch has one commit per timestamp.
        pub fn with_commits(commits: &[(&str, i64)]) -> Self {
            let commits: Vec<Tick> = commits
                .iter()
                .map(|(id, secs)| Tick {
                    id: CommitId::from(*id),
                    time: Utc.timestamp_opt(*secs, 0).unwrap(),
                })
                .collect();
            let head = commits.last().map(|t| t.id.clone());
            let mut branches = HashMap::new();
            if let Some(head) = &head {
                branches.insert("main".to_string(), head.clone());
            }
            Self {
                workdir: PathBuf::from("/fake/repo"),
                commits,
                branches,
                branch: head.as_ref().map(|_| "main".to_string()),
                head,
                dirty: false,
                unreachable: Vec::new(),
                resets_left: None,
                calls: Vec::new(),
            }
        }
    }

    impl RepoGateway for FakeRepo {
        fn workdir(&self) -> &Path {
            &self.workdir
        }

        fn last_commit(&self) -> Result<Option<CommitId>> {
            Ok(self.head.clone())
        }

        fn commit_time(&self, id: &CommitId) -> Result<Option<DateTime<Utc>>> {
            Ok(self.commits.iter().find(|t| &t.id == id).map(|t| t.time))
        }

        fn history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Tick>> {
            let mut ticks: Vec<Tick> = self
                .commits
                .iter()
                .filter(|t| t.time >= from && t.time <= to)
                .cloned()
                .collect();
            ticks.sort_by_key(|t| t.time);
            Ok(ticks)
        }

        fn current_branch(&self) -> Result<Option<String>> {
            Ok(self.branch.clone())
        }

        fn workdir_clean(&self) -> Result<bool> {
            Ok(!self.dirty)
        }

        fn checkout(&mut self, target: &str) -> Result<()> {
            self.calls.push(Call::Checkout(target.to_string()));
            if self.dirty || self.unreachable.iter().any(|u| u == target) {
                return Err(Error::Checkout {
                    target: target.to_string(),
                    reason: "refused".to_string(),
                });
            }
            if let Some(id) = self.branches.get(target) {
                self.head = Some(id.clone());
                self.branch = Some(target.to_string());
            } else if self.commits.iter().any(|t| t.id.as_str() == target) {
                self.head = Some(CommitId::from(target));
                self.branch = None;
            } else {
                return Err(Error::Checkout {
                    target: target.to_string(),
                    reason: "unknown revision".to_string(),
                });
            }
            Ok(())
        }

        fn hard_reset(&mut self) -> Result<()> {
            self.calls.push(Call::HardReset);
            match &mut self.resets_left {
                Some(0) => return Err(Error::Io(std::io::Error::other("reset failed"))),
                Some(left) => *left -= 1,
                None => {}
            }
            self.dirty = false;
            Ok(())
        }
    }
}
