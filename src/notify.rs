//! Batch completion notification

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::job::JobStatus;

/// Outcome counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub warning: usize,
}

impl BatchSummary {
    /// Count one finished job. Non-terminal statuses only bump the total.
    pub fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Warning => self.warning += 1,
            JobStatus::Queued | JobStatus::Processing => {}
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} with warnings (of {})",
            self.completed, self.failed, self.warning, self.total
        )
    }
}

/// Receives one signal per batch that finishes without cancellation
pub trait Notifier: Send + Sync {
    fn batch_finished(&self, summary: &BatchSummary);
}

/// Logs the summary
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn batch_finished(&self, summary: &BatchSummary) {
        info!("Batch finished: {}", summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let mut summary = BatchSummary::default();
        summary.record(JobStatus::Completed);
        summary.record(JobStatus::Completed);
        summary.record(JobStatus::Failed);
        summary.record(JobStatus::Warning);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.to_string(), "2 completed, 1 failed, 1 with warnings (of 4)");
    }
}
