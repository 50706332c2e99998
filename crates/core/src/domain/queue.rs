// Queue Domain Model: listing filters, statistics and per-tenant admission limits

use crate::domain::job::{Job, JobStatus};
use serde::{Deserialize, Serialize};

/// Rolling rate-limit window (1 hour)
pub const RATE_LIMIT_WINDOW_MS: i64 = 60 * 60 * 1000;

/// Trailing window used by queue statistics (24 hours)
pub const STATS_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Filter for listing jobs. Results are ordered by creation time, newest first.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub queue_name: Option<String>,
    pub job_type: Option<String>,
    pub org_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Page size every backend applies; negative means an empty page
    pub fn page_limit(&self) -> Option<i64> {
        self.limit.map(|l| l.max(0))
    }

    /// Rows skipped before the page; negative means none
    pub fn page_offset(&self) -> i64 {
        self.offset.max(0)
    }

    /// In-process predicate (used by the in-memory backend)
    pub fn matches(&self, job: &Job) -> bool {
        self.queue_name.as_deref().map_or(true, |q| job.queue_name == q)
            && self
                .job_type
                .as_deref()
                .map_or(true, |t| job.job_type.as_str() == t)
            && self.org_id.as_deref().map_or(true, |o| job.org_id == o)
            && self.status.map_or(true, |s| job.status == s)
    }
}

/// Queue statistics over the trailing [`STATS_WINDOW_MS`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    /// Mean `completed_at - started_at` of completed jobs, in ms
    pub avg_processing_ms: Option<f64>,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Per-(organization, queue) admission limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_jobs_per_hour: i64,
    pub max_concurrent_jobs: i64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_jobs_per_hour: 1000,
            max_concurrent_jobs: 10,
        }
    }
}

impl RateLimit {
    pub fn new(max_jobs_per_hour: i64, max_concurrent_jobs: i64) -> Self {
        Self {
            max_jobs_per_hour,
            max_concurrent_jobs,
        }
    }

    /// Admission decision.
    ///
    /// `processing` already includes the job being admitted (it was dequeued
    /// before the check), so the slot limit is only exceeded when the count
    /// goes beyond `max_concurrent_jobs`.
    pub fn admits(&self, jobs_in_window: i64, processing: i64) -> bool {
        jobs_in_window < self.max_jobs_per_hour && processing <= self.max_concurrent_jobs
    }
}

/// Rolling hourly counter for one (organization, queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_start: i64,
    pub jobs_in_window: i64,
}

impl RateLimitWindow {
    pub fn open(now_millis: i64) -> Self {
        Self {
            window_start: now_millis,
            jobs_in_window: 0,
        }
    }

    pub fn is_stale(&self, now_millis: i64) -> bool {
        now_millis - self.window_start > RATE_LIMIT_WINDOW_MS
    }

    /// Jobs counted against the quota at `now_millis` (0 once the window is stale)
    pub fn jobs_counted(&self, now_millis: i64) -> i64 {
        if self.is_stale(now_millis) {
            0
        } else {
            self.jobs_in_window
        }
    }

    /// Count one processed job, resetting a stale window instead of accumulating
    pub fn record(&mut self, now_millis: i64) {
        if self.is_stale(now_millis) {
            self.window_start = now_millis;
            self.jobs_in_window = 1;
        } else {
            self.jobs_in_window += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_resets_after_an_hour() {
        let mut window = RateLimitWindow::open(0);
        window.record(10);
        window.record(20);
        assert_eq!(window.jobs_counted(30), 2);

        let later = RATE_LIMIT_WINDOW_MS + 1;
        assert!(window.is_stale(later));
        assert_eq!(window.jobs_counted(later), 0);

        window.record(later);
        assert_eq!(window.window_start, later);
        assert_eq!(window.jobs_in_window, 1);
    }

    #[test]
    fn test_negative_paging_is_clamped() {
        let filter = JobFilter::new().limit(-1).offset(-10);
        assert_eq!(filter.page_limit(), Some(0));
        assert_eq!(filter.page_offset(), 0);
        assert_eq!(JobFilter::new().page_limit(), None);
    }

    #[test]
    fn test_rate_limit_admission() {
        let limit = RateLimit::new(2, 1);
        assert!(limit.admits(0, 1));
        assert!(limit.admits(1, 1));
        assert!(!limit.admits(2, 1), "hourly quota reached");
        assert!(!limit.admits(0, 2), "concurrent slots full");
    }
}
