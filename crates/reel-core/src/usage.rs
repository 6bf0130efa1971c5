//! Lifetime usage totals plus pruned timestamp logs for rolling windows.
//!
//! Each record appends `now` to the kind's log, drops log entries older than
//! [`RETENTION_DAYS`], then bumps the lifetime total. Totals never shrink;
//! only the log that backs the rolling figures is pruned.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const RETENTION_DAYS: i64 = 30;
pub const ROLLING_WINDOW_HOURS: i64 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    ApiCall,
    Artifact,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::Artifact => "artifact",
        }
    }
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_call" => Ok(Self::ApiCall),
            "artifact" => Ok(Self::Artifact),
            other => Err(format!("unknown usage kind: {other}")),
        }
    }
}

/// Oldest instant still kept in a log at time `now`.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RETENTION_DAYS)
}

/// Append-only timestamps, pruned on write.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampLog {
    entries: Vec<DateTime<Utc>>,
}

impl TimestampLog {
    pub fn from_entries(mut entries: Vec<DateTime<Utc>>) -> Self {
        entries.sort();
        Self { entries }
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        self.entries.push(now);
        self.prune(retention_cutoff(now));
    }

    /// Drop every entry at or before `cutoff`. Returns how many were removed.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|t| *t > cutoff);
        before - self.entries.len()
    }

    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.entries.iter().filter(|t| **t > since).count()
    }

    pub fn entries(&self) -> &[DateTime<Utc>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub total: u64,
    pub log: TimestampLog,
}

impl UsageCounter {
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.log.record(now);
        self.total += 1;
    }

    pub fn rolling(&self, now: DateTime<Utc>) -> usize {
        self.log
            .count_since(now - Duration::hours(ROLLING_WINDOW_HOURS))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub api_calls: UsageCounter,
    pub artifacts: UsageCounter,
}

impl UsageCounters {
    pub fn counter(&self, kind: UsageKind) -> &UsageCounter {
        match kind {
            UsageKind::ApiCall => &self.api_calls,
            UsageKind::Artifact => &self.artifacts,
        }
    }

    pub fn counter_mut(&mut self, kind: UsageKind) -> &mut UsageCounter {
        match kind {
            UsageKind::ApiCall => &mut self.api_calls,
            UsageKind::Artifact => &mut self.artifacts,
        }
    }

    pub fn record(&mut self, kind: UsageKind, now: DateTime<Utc>) {
        self.counter_mut(kind).record(now);
    }

    pub fn total(&self, kind: UsageKind) -> u64 {
        self.counter(kind).total
    }

    /// Events of `kind` within the last 24 hours of `now`.
    pub fn rolling_24h(&self, kind: UsageKind, now: DateTime<Utc>) -> usize {
        self.counter(kind).rolling(now)
    }
}

/// Sink for usage events raised outside the ledger, e.g. by the client when a
/// request goes out.
pub trait UsageRecorder: Send + Sync {
    fn record_api_call(&self);
    fn record_artifact(&self);
}

/// Recorder that drops everything. Used where no ledger is attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRecorder;

impl UsageRecorder for NoopRecorder {
    fn record_api_call(&self) {}
    fn record_artifact(&self) {}
}
