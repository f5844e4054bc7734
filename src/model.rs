// src/model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// How strictly a file is type-checked, from the sigil at its top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrictnessLevel {
    Ignore,
    False,
    True,
    Strict,
    Strong,
}

impl StrictnessLevel {
    /// All levels, least strict first.
    pub const ALL: [StrictnessLevel; 5] = [
        StrictnessLevel::Ignore,
        StrictnessLevel::False,
        StrictnessLevel::True,
        StrictnessLevel::Strict,
        StrictnessLevel::Strong,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrictnessLevel::Ignore => "ignore",
            StrictnessLevel::False => "false",
            StrictnessLevel::True => "true",
            StrictnessLevel::Strict => "strict",
            StrictnessLevel::Strong => "strong",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StrictnessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StrictnessLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StrictnessLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown strictness level `{}`", s))
    }
}

/// Per-level counts. Every level is always present; unset levels are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SigilCounts([u64; 5]);

impl SigilCounts {
    pub fn get(&self, level: StrictnessLevel) -> u64 {
        self.0[level.index()]
    }

    pub fn set(&mut self, level: StrictnessLevel, count: u64) {
        self.0[level.index()] = count;
    }

    pub fn with(mut self, level: StrictnessLevel, count: u64) -> Self {
        self.set(level, count);
        self
    }

    /// Sum over all levels, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.0.iter().fold(0, |sum, &n| sum.saturating_add(n))
    }

    /// Sum over all levels, or `None` if it does not fit in a `u64`.
    pub fn checked_total(&self) -> Option<u64> {
        self.0.iter().try_fold(0u64, |sum, &n| sum.checked_add(n))
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrictnessLevel, u64)> + '_ {
        StrictnessLevel::ALL.into_iter().map(|level| (level, self.get(level)))
    }

    /// Percentage of the total classified at `level` or any stricter level.
    /// Zero for an empty breakdown.
    pub fn at_or_above(&self, level: StrictnessLevel) -> f64 {
        let total: u128 = self.0.iter().map(|&n| n as u128).sum();
        if total == 0 {
            return 0.0;
        }
        let covered: u128 = self.0[level.index()..].iter().map(|&n| n as u128).sum();
        covered as f64 * 100.0 / total as f64
    }
}

/// A full commit hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display and file names.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        CommitId(s.to_string())
    }
}

/// A commit selected for replay, with its commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub id: CommitId,
    pub time: DateTime<Utc>,
}

/// What the type checker reported for one tree, before it is placed in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub counts: SigilCounts,
    pub duration_ms: u64,
}

/// One point-in-time measurement of strictness counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "SnapshotRecord", try_from = "SnapshotRecord")]
pub struct Snapshot {
    /// Absent for a measurement of an uncommitted tree.
    pub commit_id: Option<CommitId>,
    /// Commit time, or measurement time when there is no commit. Only
    /// missing for persisted files written without one.
    pub timestamp: Option<DateTime<Utc>>,
    pub counts: SigilCounts,
    pub duration_ms: u64,
}

impl Snapshot {
    pub fn new(
        commit_id: Option<CommitId>,
        timestamp: DateTime<Utc>,
        measurement: Measurement,
    ) -> Self {
        Self {
            commit_id,
            timestamp: Some(timestamp),
            counts: measurement.counts,
            duration_ms: measurement.duration_ms,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }
}

/// On-disk layout: one integer field per level, next to the commit and time.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotRecord {
    #[serde(default)]
    commit_sha: Option<String>,
    #[serde(default, with = "timestamp_repr")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    ignore: u64,
    #[serde(default, rename = "false")]
    false_: u64,
    #[serde(default, rename = "true")]
    true_: u64,
    #[serde(default)]
    strict: u64,
    #[serde(default)]
    strong: u64,
}

impl From<Snapshot> for SnapshotRecord {
    fn from(s: Snapshot) -> Self {
        let c = s.counts;
        SnapshotRecord {
            commit_sha: s.commit_id.map(|id| id.0),
            timestamp: s.timestamp,
            duration_ms: s.duration_ms,
            ignore: c.get(StrictnessLevel::Ignore),
            false_: c.get(StrictnessLevel::False),
            true_: c.get(StrictnessLevel::True),
            strict: c.get(StrictnessLevel::Strict),
            strong: c.get(StrictnessLevel::Strong),
        }
    }
}

impl TryFrom<SnapshotRecord> for Snapshot {
    type Error = String;

    fn try_from(r: SnapshotRecord) -> std::result::Result<Self, Self::Error> {
        let counts = SigilCounts::default()
            .with(StrictnessLevel::Ignore, r.ignore)
            .with(StrictnessLevel::False, r.false_)
            .with(StrictnessLevel::True, r.true_)
            .with(StrictnessLevel::Strict, r.strict)
            .with(StrictnessLevel::Strong, r.strong);
        if counts.checked_total().is_none() {
            return Err("file counts add up to more than a u64 can hold".to_string());
        }
        Ok(Snapshot {
            commit_id: r.commit_sha.map(CommitId),
            timestamp: r.timestamp,
            counts,
            duration_ms: r.duration_ms,
        })
    }
}

/// Written as RFC 3339; read from RFC 3339 or integer epoch seconds.
mod timestamp_repr {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Epoch(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Epoch(secs)) => Utc
                .timestamp_opt(secs, 0)
                .single()
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("epoch {} out of range", secs))),
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| de::Error::custom(format!("bad timestamp `{}`: {}", text, e))),
        }
    }
}
