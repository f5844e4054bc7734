// src/timeline.rs

use crate::error::{Error, Result};
use crate::git::RepoGateway;
use crate::model::Tick;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tracing::debug;

/// How sparsely history is sampled between `from` and `to`.
#[derive(clap::ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Every commit on the first-parent history
    Commit,
    /// First commit of each UTC day
    #[default]
    Day,
    /// First commit of each ISO week
    Week,
    /// First commit of each calendar month
    Month,
}

impl Granularity {
    /// Calendar bucket a commit time falls in; `None` means every commit
    /// is its own bucket.
    fn bucket(self, time: DateTime<Utc>) -> Option<(i32, u32)> {
        match self {
            Granularity::Commit => None,
            Granularity::Day => Some((time.year(), time.ordinal())),
            Granularity::Week => {
                let week = time.iso_week();
                Some((week.year(), week.week()))
            }
            Granularity::Month => Some((time.year(), time.month())),
        }
    }
}

/// Picks the commits to replay between two instants.
pub struct Timeline<'a, G: RepoGateway> {
    repo: &'a G,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: Granularity,
}

impl<'a, G: RepoGateway> Timeline<'a, G> {
    pub fn new(
        repo: &'a G,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Self> {
        if from > to {
            return Err(Error::InvalidRange { from, to });
        }
        Ok(Self { repo, from, to, granularity })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.to
    }

    /// Oldest to newest: the first commit of every bucket, plus the newest
    /// commit in range. Empty when nothing was committed in range.
    pub fn ticks(&self) -> Result<Vec<Tick>> {
        let history = self.repo.history(self.from, self.to)?;
        let total = history.len();
        let ticks = sample(history, self.granularity);
        debug!(
            "Sampled {} of {} commits between {} and {} ({:?})",
            ticks.len(),
            total,
            self.from,
            self.to,
            self.granularity
        );
        Ok(ticks)
    }
}

fn sample(mut history: Vec<Tick>, granularity: Granularity) -> Vec<Tick> {
    history.sort_by_key(|tick| tick.time);
    let Some(newest) = history.last().cloned() else {
        return history;
    };

    let mut ticks: Vec<Tick> = Vec::new();
    let mut last_bucket = None;
    for tick in history {
        match granularity.bucket(tick.time) {
            Some(bucket) if last_bucket == Some(bucket) => continue,
            bucket => last_bucket = bucket,
        }
        ticks.push(tick);
    }

    if ticks.last().map(|t| &t.id) != Some(&newest.id) {
        ticks.push(newest);
    }
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::FakeRepo;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const DAY: i64 = 86_400;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ids(ticks: &[Tick]) -> Vec<&str> {
        ticks.iter().map(|t| t.id.as_str()).collect()
    }

    fn repo() -> FakeRepo {
        // Three commits on day 0, one on day 1, two on day 9.
        FakeRepo::with_commits(&[
            ("a", 100),
            ("b", 200),
            ("c", 300),
            ("d", DAY + 5),
            ("e", 9 * DAY),
            ("f", 9 * DAY + 10),
        ])
    }

    #[test]
    fn default_granularity_is_daily() {
        assert_eq!(Granularity::default(), Granularity::Day);
    }

    #[test]
    fn daily_keeps_first_of_each_day_and_newest() {
        let repo = repo();
        let timeline = Timeline::new(&repo, at(0), at(10 * DAY), Granularity::default()).unwrap();
        assert_eq!(ids(&timeline.ticks().unwrap()), vec!["a", "d", "e", "f"]);
    }

    #[test]
    fn every_commit_granularity_keeps_all() {
        let repo = repo();
        let timeline = Timeline::new(&repo, at(0), at(10 * DAY), Granularity::Commit).unwrap();
        assert_eq!(ids(&timeline.ticks().unwrap()), vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn weekly_and_monthly_buckets() {
        let repo = repo();
        // 1970-01-01 was a Thursday, so day 9 falls in the following ISO week.
        let weekly = Timeline::new(&repo, at(0), at(10 * DAY), Granularity::Week).unwrap();
        assert_eq!(ids(&weekly.ticks().unwrap()), vec!["a", "e", "f"]);
        let monthly = Timeline::new(&repo, at(0), at(10 * DAY), Granularity::Month).unwrap();
        assert_eq!(ids(&monthly.ticks().unwrap()), vec!["a", "f"]);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let repo = repo();
        let timeline = Timeline::new(&repo, at(200), at(DAY + 5), Granularity::Commit).unwrap();
        assert_eq!(ids(&timeline.ticks().unwrap()), vec!["b", "c", "d"]);
    }

    #[test]
    fn day_without_commits_is_empty() {
        let repo = repo();
        let day = at(5 * DAY);
        let timeline = Timeline::new(&repo, day, day, Granularity::Day).unwrap();
        assert!(timeline.ticks().unwrap().is_empty());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let repo = repo();
        let err = Timeline::new(&repo, at(10), at(5), Granularity::Day).err().unwrap();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }

    #[test]
    fn sampling_is_deterministic() {
        let repo = repo();
        let timeline = Timeline::new(&repo, at(0), at(10 * DAY), Granularity::Day).unwrap();
        assert_eq!(timeline.ticks().unwrap(), timeline.ticks().unwrap());
    }

    proptest! {
        #[test]
        fn ticks_are_ordered_and_in_range(
            times in proptest::collection::vec(0i64..60 * DAY, 0..40),
            from in 0i64..60 * DAY,
            span in 0i64..60 * DAY,
            granularity in prop_oneof![
                Just(Granularity::Commit),
                Just(Granularity::Day),
                Just(Granularity::Week),
                Just(Granularity::Month),
            ],
        ) {
            let names: Vec<String> = (0..times.len()).map(|i| format!("c{}", i)).collect();
            let commits: Vec<(&str, i64)> =
                names.iter().map(String::as_str).zip(times.iter().copied()).collect();
            let repo = FakeRepo::with_commits(&commits);
            let (from, to) = (at(from), at(from + span));

            let ticks = Timeline::new(&repo, from, to, granularity).unwrap().ticks().unwrap();

            for pair in ticks.windows(2) {
                prop_assert!(pair[0].time <= pair[1].time);
            }
            for tick in &ticks {
                prop_assert!(tick.time >= from && tick.time <= to);
            }
            let in_range = times.iter().filter(|&&t| at(t) >= from && at(t) <= to).count();
            prop_assert_eq!(ticks.is_empty(), in_range == 0);
        }
    }
}
