//! Refresh health, one record per (job, league).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures before a job counts as degraded.
pub const DEGRADED_AFTER: usize = 5;
/// Consecutive failures before `/healthz` answers 503.
pub const UNAVAILABLE_AFTER: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_count: usize,
    pub consecutive_errors: usize,
    pub last_error: Option<String>,
}

#[derive(Clone, Default)]
pub struct HealthState {
    jobs: Arc<RwLock<BTreeMap<String, JobHealth>>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, job: &str, at: DateTime<Utc>, count: usize) {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.entry(job.to_string()).or_default();
        entry.last_success = Some(at);
        entry.last_count = count;
        entry.consecutive_errors = 0;
        entry.last_error = None;
    }

    pub async fn record_error(&self, job: &str, error: &str) {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.entry(job.to_string()).or_default();
        entry.consecutive_errors += 1;
        entry.last_error = Some(error.to_string());
    }

    pub async fn snapshot(&self) -> BTreeMap<String, JobHealth> {
        self.jobs.read().await.clone()
    }

    /// Highest consecutive error count across jobs.
    pub async fn worst_errors(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .map(|j| j.consecutive_errors)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_success_resets_errors() {
        let health = HealthState::new();
        health.record_error("props:mlb", "timeout").await;
        health.record_error("props:mlb", "timeout").await;
        assert_eq!(health.worst_errors().await, 2);

        let at = Utc.with_ymd_and_hms(2025, 7, 4, 12, 0, 0).unwrap();
        health.record_success("props:mlb", at, 120).await;
        let jobs = health.snapshot().await;
        assert_eq!(jobs["props:mlb"].consecutive_errors, 0);
        assert_eq!(jobs["props:mlb"].last_count, 120);
        assert_eq!(jobs["props:mlb"].last_success, Some(at));
        assert_eq!(health.worst_errors().await, 0);
    }
}
