// src/store.rs

use crate::error::{Error, Result};
use crate::model::Snapshot;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A directory of snapshot files, one JSON document per measurement.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<epoch seconds>_<short sha or "live">.json`, so that a directory
    /// listing sorts chronologically.
    pub fn file_name(snapshot: &Snapshot) -> String {
        let time = snapshot
            .timestamp
            .map_or_else(|| "undated".to_string(), |t| format!("{:010}", t.timestamp()));
        let commit = snapshot.commit_id.as_ref().map_or("live", |id| id.short());
        format!("{}_{}.json", time, commit)
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(snapshot));
        fs::write(&path, snapshot.to_json()?)?;
        debug!("Saved snapshot to {}", path.display());
        Ok(path)
    }

    /// Every readable snapshot, in file-name order. Unreadable or malformed
    /// files are skipped with a warning; a missing directory is empty.
    pub fn load_all(&self) -> Result<Vec<Snapshot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let loaded: Vec<Result<Snapshot>> = paths.par_iter().map(|path| load_one(path)).collect();

        let mut snapshots = Vec::with_capacity(loaded.len());
        for result in loaded {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping {}", e),
            }
        }
        debug!("Loaded {} of {} snapshot files", snapshots.len(), paths.len());
        Ok(snapshots)
    }
}

fn load_one(path: &Path) -> Result<Snapshot> {
    let malformed = |reason: String| Error::MalformedSnapshot {
        path: path.to_path_buf(),
        reason,
    };
    let json = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    Snapshot::from_json(&json).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitId, SigilCounts, StrictnessLevel};
    use chrono::{TimeZone, Utc};

    fn snapshot(secs: i64, sha: Option<&str>) -> Snapshot {
        Snapshot {
            commit_id: sha.map(CommitId::from),
            timestamp: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            counts: SigilCounts::default().with(StrictnessLevel::Strict, 2),
            duration_ms: 40,
        }
    }

    #[test]
    fn file_names_sort_chronologically() {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(
            SnapshotStore::file_name(&snapshot(5, Some(sha))),
            "0000000005_0123456789ab.json"
        );
        assert_eq!(
            SnapshotStore::file_name(&snapshot(1_700_000_000, None)),
            "1700000000_live.json"
        );
    }

    #[test]
    fn saved_snapshots_load_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("data"));
        let later = snapshot(200, Some("bbb"));
        let earlier = snapshot(100, Some("aaa"));
        store.save(&later).unwrap();
        store.save(&earlier).unwrap();

        assert_eq!(store.load_all().unwrap(), vec![earlier, later]);
    }

    #[test]
    fn malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let good = snapshot(100, None);
        store.save(&good).unwrap();
        fs::write(dir.path().join("0000000050_broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.load_all().unwrap(), vec![good]);
    }

    #[test]
    fn overflowing_counts_are_skipped_as_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000000000_huge.json");
        fs::write(&path, r#"{"timestamp": 0, "strong": 18446744073709551615, "true": 1}"#).unwrap();

        assert!(matches!(load_one(&path), Err(Error::MalformedSnapshot { .. })));
        assert!(SnapshotStore::new(dir.path()).load_all().unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nowhere"));
        assert!(store.load_all().unwrap().is_empty());
    }
}
