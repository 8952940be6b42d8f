// src/core/store.rs

//! Job persistence contract and two conforming engines.
//!
//! Every mutation is applied to a whole [`Job`] document under exclusive
//! access and then published in one step (map insert or atomic file rename),
//! so readers never observe a half-updated job.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::models::{Job, JobId, JobStatus, JobTransitionError, ProbeName, ProbeOutcome};
use crate::core::report::Report;
use crate::core::target::Target;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    Duplicate(JobId),
    #[error(transparent)]
    InvalidTransition(#[from] JobTransitionError),
    #[error("outcome for '{probe}' already recorded on job {job}")]
    OutcomeAlreadyRecorded { job: JobId, probe: ProbeName },
    #[error("job {0} is {1} and can no longer be modified")]
    Frozen(JobId, JobStatus),
    #[error("job {0} cannot complete without a report")]
    ReportMissing(JobId),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("job document could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence operations the orchestrator depends on.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<JobId, StoreError>;
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;
    /// Applies a state-machine transition; `reason` is kept on the audit
    /// trail and, for `failed`, as the job's failure reason.
    async fn update_status(&self, id: JobId, status: JobStatus, reason: Option<String>) -> Result<(), StoreError>;
    async fn set_addresses(&self, id: JobId, addresses: Vec<IpAddr>) -> Result<(), StoreError>;
    /// Append-once: a second write for the same probe is rejected.
    async fn set_outcome(&self, id: JobId, probe: ProbeName, outcome: ProbeOutcome) -> Result<(), StoreError>;
    async fn set_report(&self, id: JobId, report: Report) -> Result<(), StoreError>;
    /// Most recently created job for the target, restricted to `status` when
    /// one is given.
    async fn find_latest_by_target(
        &self,
        target: &Target,
        status: Option<JobStatus>,
    ) -> Result<Option<Job>, StoreError>;
}

// --- Shared mutation rules ---

fn apply_status(job: &mut Job, status: JobStatus, reason: Option<String>) -> Result<(), StoreError> {
    if status == JobStatus::Completed && job.report.is_none() {
        return Err(StoreError::ReportMissing(job.id));
    }
    if status == JobStatus::Failed {
        job.failure = reason.clone();
    }
    job.transition(status, reason, Utc::now())?;
    Ok(())
}

fn ensure_mutable(job: &Job) -> Result<(), StoreError> {
    if job.status.is_terminal() {
        return Err(StoreError::Frozen(job.id, job.status));
    }
    Ok(())
}

fn apply_outcome(job: &mut Job, probe: ProbeName, outcome: ProbeOutcome) -> Result<(), StoreError> {
    ensure_mutable(job)?;
    if job.outcomes.contains_key(&probe) {
        return Err(StoreError::OutcomeAlreadyRecorded { job: job.id, probe });
    }
    job.outcomes.insert(probe, outcome);
    Ok(())
}

fn apply_report(job: &mut Job, report: Report) -> Result<(), StoreError> {
    ensure_mutable(job)?;
    job.report = Some(report);
    Ok(())
}

fn apply_addresses(job: &mut Job, addresses: Vec<IpAddr>) -> Result<(), StoreError> {
    ensure_mutable(job)?;
    job.addresses = addresses;
    Ok(())
}

fn latest<'a>(jobs: impl Iterator<Item = &'a Job>, target: &Target, status: Option<JobStatus>) -> Option<Job> {
    jobs.filter(|j| &j.target == target && status.is_none_or(|s| j.status == s))
        .max_by_key(|j| j.created_at)
        .cloned()
}

// --- In-memory engine ---

/// Process-local store. Each mutation holds the write lock for its whole
/// read-modify-write.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate<F>(&self, id: JobId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError> + Send,
    {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&id).ok_or(StoreError::NotFound(id))?;
        // Mutate a copy so a rejected change leaves the stored job untouched.
        let mut next = current.clone();
        f(&mut next)?;
        jobs.insert(id, next);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: JobId, status: JobStatus, reason: Option<String>) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_status(job, status, reason)).await
    }

    async fn set_addresses(&self, id: JobId, addresses: Vec<IpAddr>) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_addresses(job, addresses)).await
    }

    async fn set_outcome(&self, id: JobId, probe: ProbeName, outcome: ProbeOutcome) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_outcome(job, probe, outcome)).await
    }

    async fn set_report(&self, id: JobId, report: Report) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_report(job, report)).await
    }

    async fn find_latest_by_target(
        &self,
        target: &Target,
        status: Option<JobStatus>,
    ) -> Result<Option<Job>, StoreError> {
        Ok(latest(self.jobs.read().await.values(), target, status))
    }
}

// --- JSON file engine ---

/// Durable store: one JSON document per job under a directory.
///
/// Writers are serialized by a mutex and publish with write-to-temp then
/// rename, which replaces the document atomically.
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), "Opened file job store.");
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, job: &Job) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", job.id));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.path_for(job.id)).await?;
        debug!(job_id = %job.id, status = %job.status, "Job document written.");
        Ok(())
    }

    async fn mutate<F>(&self, id: JobId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut job = self.read(id).await?.ok_or(StoreError::NotFound(id))?;
        f(&mut job)?;
        self.write(&job).await
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: Job) -> Result<JobId, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read(job.id).await?.is_some() {
            return Err(StoreError::Duplicate(job.id));
        }
        self.write(&job).await?;
        Ok(job.id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.read(id).await
    }

    async fn update_status(&self, id: JobId, status: JobStatus, reason: Option<String>) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_status(job, status, reason)).await
    }

    async fn set_addresses(&self, id: JobId, addresses: Vec<IpAddr>) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_addresses(job, addresses)).await
    }

    async fn set_outcome(&self, id: JobId, probe: ProbeName, outcome: ProbeOutcome) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_outcome(job, probe, outcome)).await
    }

    async fn set_report(&self, id: JobId, report: Report) -> Result<(), StoreError> {
        self.mutate(id, |job| apply_report(job, report)).await
    }

    async fn find_latest_by_target(
        &self,
        target: &Target,
        status: Option<JobStatus>,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().is_some_and(|e| e == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_document {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Job>(&bytes) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job document."),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job document."),
            }
        }
        Ok(latest(jobs.iter(), target, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ErrorKind;
    use crate::core::report::merge;
    use std::sync::Arc;

    fn job(target: &str) -> Job {
        Job::new(Target::parse(target).unwrap(), Utc::now())
    }

    async fn exercise_contract(store: Arc<dyn JobStore>) {
        let job = job("example.test");
        let id = store.create(job.clone()).await.unwrap();
        assert!(matches!(store.create(job).await, Err(StoreError::Duplicate(_))));

        store.update_status(id, JobStatus::Running, None).await.unwrap();
        store
            .set_outcome(id, ProbeName::Dns, ProbeOutcome::not_found("no records"))
            .await
            .unwrap();
        let again = store
            .set_outcome(id, ProbeName::Dns, ProbeOutcome::failed(ErrorKind::Timeout, "late"))
            .await;
        assert!(matches!(again, Err(StoreError::OutcomeAlreadyRecorded { .. })));

        assert!(matches!(
            store.update_status(id, JobStatus::Completed, None).await,
            Err(StoreError::ReportMissing(_))
        ));

        let stored = store.get(id).await.unwrap().unwrap();
        store.set_report(id, merge(&stored.outcomes)).await.unwrap();
        store.update_status(id, JobStatus::Completed, Some("done".into())).await.unwrap();

        let done = store.get(id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.report.is_some());
        assert_eq!(done.transitions.len(), 2);

        // Terminal jobs are frozen.
        assert!(matches!(
            store.set_outcome(id, ProbeName::Tls, ProbeOutcome::not_found("x")).await,
            Err(StoreError::Frozen(..))
        ));
        assert!(store.update_status(id, JobStatus::Failed, None).await.is_err());
        assert!(matches!(
            store.get(JobId::new()).await,
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn memory_store_honors_the_contract() {
        exercise_contract(Arc::new(MemoryJobStore::new())).await;
    }

    #[tokio::test]
    async fn file_store_honors_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        exercise_contract(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn latest_by_target_picks_newest_for_that_target_only() {
        let dir = tempfile::tempdir().unwrap();
        let file_store = FileJobStore::open(dir.path().join("jobs")).await.unwrap();
        let stores: Vec<Arc<dyn JobStore>> = vec![Arc::new(MemoryJobStore::new()), Arc::new(file_store)];

        for store in stores {
            let target = Target::parse("example.test").unwrap();
            let mut older = Job::new(target.clone(), Utc::now() - chrono::Duration::hours(2));
            older.failure = Some("older".into());
            let newer = Job::new(target.clone(), Utc::now());
            let other = Job::new(Target::parse("other.test").unwrap(), Utc::now() + chrono::Duration::hours(1));

            store.create(older).await.unwrap();
            let newer_id = store.create(newer).await.unwrap();
            store.create(other).await.unwrap();

            let found = store.find_latest_by_target(&target, None).await.unwrap().unwrap();
            assert_eq!(found.id, newer_id);
            let missing = Target::parse("absent.test").unwrap();
            assert!(store.find_latest_by_target(&missing, None).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn latest_by_status_skips_newer_jobs_in_other_states() {
        let dir = tempfile::tempdir().unwrap();
        let file_store = FileJobStore::open(dir.path()).await.unwrap();
        let stores: Vec<Arc<dyn JobStore>> = vec![Arc::new(MemoryJobStore::new()), Arc::new(file_store)];

        for store in stores {
            let target = Target::parse("example.test").unwrap();
            let done_id = store
                .create(Job::new(target.clone(), Utc::now() - chrono::Duration::hours(1)))
                .await
                .unwrap();
            store.update_status(done_id, JobStatus::Running, None).await.unwrap();
            store.set_report(done_id, Report::default()).await.unwrap();
            store.update_status(done_id, JobStatus::Completed, None).await.unwrap();

            // Left running by a process that went away.
            let orphan_id = store.create(Job::new(target.clone(), Utc::now())).await.unwrap();
            store.update_status(orphan_id, JobStatus::Running, None).await.unwrap();

            let any = store.find_latest_by_target(&target, None).await.unwrap().unwrap();
            assert_eq!(any.id, orphan_id);
            let completed = store
                .find_latest_by_target(&target, Some(JobStatus::Completed))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(completed.id, done_id);
            assert!(store
                .find_latest_by_target(&target, Some(JobStatus::Failed))
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn failed_status_records_the_reason() {
        let store = MemoryJobStore::new();
        let id = store.create(job("example.test")).await.unwrap();
        store.update_status(id, JobStatus::Running, None).await.unwrap();
        store
            .update_status(id, JobStatus::Failed, Some("target did not resolve".into()))
            .await
            .unwrap();
        let failed = store.get(id).await.unwrap().unwrap();
        assert_eq!(failed.failure.as_deref(), Some("target did not resolve"));
        assert!(failed.report.is_none());
    }
}
