// src/aggregate.rs

use crate::model::{CommitId, SigilCounts, Snapshot, StrictnessLevel};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;

/// A snapshot placed on the time axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub commit_id: Option<CommitId>,
    pub counts: SigilCounts,
}

impl SeriesPoint {
    pub fn total(&self) -> u64 {
        self.counts.total()
    }

    /// Share of the total at `level` or stricter, in percent.
    pub fn at_or_above(&self, level: StrictnessLevel) -> f64 {
        self.counts.at_or_above(level)
    }
}

impl Serialize for SeriesPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let counts: BTreeMap<&str, u64> = self
            .counts
            .iter()
            .map(|(level, count)| (level.as_str(), count))
            .collect();
        let percentages: BTreeMap<&str, f64> = StrictnessLevel::ALL
            .into_iter()
            .map(|level| (level.as_str(), self.at_or_above(level)))
            .collect();

        let mut point = serializer.serialize_struct("SeriesPoint", 5)?;
        point.serialize_field("timestamp", &self.timestamp)?;
        point.serialize_field("commit_sha", &self.commit_id)?;
        point.serialize_field("counts", &counts)?;
        point.serialize_field("total", &self.total())?;
        point.serialize_field("at_or_above", &percentages)?;
        point.end()
    }
}

/// Points in strictly increasing timestamp order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct Series {
    points: Vec<SeriesPoint>,
}

impl Series {
    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&SeriesPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    /// Latest point at or before `time`.
    pub fn at(&self, time: DateTime<Utc>) -> Option<&SeriesPoint> {
        let idx = self.points.partition_point(|p| p.timestamp <= time);
        idx.checked_sub(1).map(|i| &self.points[i])
    }
}

/// Orders snapshots by time, dropping the undated ones. When several share
/// a timestamp the one that comes last in `snapshots` is kept.
pub fn aggregate(snapshots: &[Snapshot]) -> Series {
    let mut dated: Vec<SeriesPoint> = snapshots
        .iter()
        .filter_map(|s| {
            s.timestamp.map(|timestamp| SeriesPoint {
                timestamp,
                commit_id: s.commit_id.clone(),
                counts: s.counts,
            })
        })
        .collect();

    // Stable, so equal timestamps keep input order and the last one wins.
    dated.sort_by_key(|p| p.timestamp);
    let mut points: Vec<SeriesPoint> = Vec::with_capacity(dated.len());
    for point in dated {
        match points.last_mut() {
            Some(prev) if prev.timestamp == point.timestamp => *prev = point,
            _ => points.push(point),
        }
    }
    Series { points }
}
