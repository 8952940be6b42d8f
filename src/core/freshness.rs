// src/core/freshness.rs

//! Reuse-versus-recreate policy.

use chrono::{DateTime, Utc};

use crate::core::models::{Job, JobStatus};

/// Returns the candidate if it may be served instead of running new probes.
///
/// Only `completed` jobs whose age is within the staleness window qualify.
/// Failed or stale jobs always trigger fresh work. A `created_at` in the
/// future (clock skew) counts as age zero.
pub fn find_reusable(candidate: Option<Job>, now: DateTime<Utc>, staleness: chrono::Duration) -> Option<Job> {
    candidate.filter(|job| is_reusable(job, now, staleness))
}

pub fn is_reusable(job: &Job, now: DateTime<Utc>, staleness: chrono::Duration) -> bool {
    job.status == JobStatus::Completed
        && job.report.is_some()
        && now.signed_duration_since(job.created_at) <= staleness
}
