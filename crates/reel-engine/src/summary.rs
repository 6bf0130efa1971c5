use chrono::{DateTime, Utc};

use reel_core::task::{GenerationTask, TaskStatus};
use reel_core::usage::{UsageCounters, UsageKind};

/// Estimated size of five seconds of produced video.
const MB_PER_FIVE_SECONDS: f64 = 50.0;

/// Dashboard figures, derived on demand.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerSummary {
    pub completed: usize,
    pub processing: usize,
    pub failed: usize,
    pub artifacts_24h: usize,
    pub artifacts_total: u64,
    pub api_calls_24h: usize,
    pub api_calls_total: u64,
    pub storage_mb: f64,
}

impl LedgerSummary {
    pub fn compute(tasks: &[GenerationTask], usage: &UsageCounters, now: DateTime<Utc>) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let storage_mb = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| f64::from(t.format.length.seconds()) / 5.0 * MB_PER_FIVE_SECONDS)
            .sum();

        Self {
            completed: count(TaskStatus::Completed),
            processing: count(TaskStatus::Processing),
            failed: count(TaskStatus::Failed),
            artifacts_24h: usage.rolling_24h(UsageKind::Artifact, now),
            artifacts_total: usage.total(UsageKind::Artifact),
            api_calls_24h: usage.rolling_24h(UsageKind::ApiCall, now),
            api_calls_total: usage.total(UsageKind::ApiCall),
            storage_mb,
        }
    }

    /// `"300 MB"` below a gigabyte, `"1.17 GB"` from there on.
    pub fn storage_display(&self) -> String {
        if self.storage_mb >= 1024.0 {
            format!("{:.2} GB", self.storage_mb / 1024.0)
        } else {
            format!("{:.0} MB", self.storage_mb)
        }
    }

    pub fn artifacts_display(&self) -> String {
        format!("{}/{}", self.artifacts_24h, self.artifacts_total)
    }

    pub fn api_calls_display(&self) -> String {
        format!("{}/{}", self.api_calls_24h, self.api_calls_total)
    }
}
