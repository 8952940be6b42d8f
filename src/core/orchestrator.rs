// src/core/orchestrator.rs

//! Submission, the background job runner and the read side callers poll.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ReconConfig, ResolutionCheck};
use crate::core::error::ReconError;
use crate::core::executor::{JobInputs, OutcomeLedger, WaveExecutor};
use crate::core::freshness::find_reusable;
use crate::core::models::{ErrorKind, Job, JobId, JobStatus, ProbeName, ProbeOutcome};
use crate::core::probes;
use crate::core::registry::ProbeRegistry;
use crate::core::report::{OutcomeTally, Report, merge};
use crate::core::resolver::{DnsTargetResolver, TargetResolver};
use crate::core::store::{FileJobStore, JobStore, MemoryJobStore, StoreError};
use crate::core::target::{Target, TargetError};

/// Failure reason recorded when the resolution precondition fails.
pub const UNRESOLVED_REASON: &str = "target did not resolve";

/// What `report` hands back for a job id.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportLookup {
    Ready(Report),
    /// Terminal without a report.
    Failed { reason: String },
    /// Still `pending` or `running`.
    InProgress(JobStatus),
    NotFound,
}

/// Status-level view of a job; never carries outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub target: Target,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub failure: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            target: job.target.clone(),
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            failure: job.failure.clone(),
        }
    }
}

/// Cheap to clone; every clone drives the same set of jobs.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ReconConfig>,
    executor: WaveExecutor,
    store: Arc<dyn JobStore>,
    resolver: Arc<dyn TargetResolver>,
    deadline: Duration,
    /// Jobs this orchestrator is still driving, by target. Held across the
    /// dedup check and job creation, so submits are serialized.
    in_flight: Mutex<HashMap<Target, JobId>>,
}

impl Orchestrator {
    /// Validates the registry's dependency graph; a cycle is a configuration error.
    pub fn new(
        config: Arc<ReconConfig>,
        registry: ProbeRegistry,
        store: Arc<dyn JobStore>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Result<Self, ReconError> {
        let deadline = config
            .job_deadline
            .unwrap_or_else(|| registry.total_budget() + config.deadline_margin);
        let executor = WaveExecutor::new(Arc::new(registry), config.max_concurrency)?;
        info!(
            probes = executor.registry().len(),
            waves = executor.plan().len(),
            deadline_secs = deadline.as_secs(),
            "Orchestrator ready."
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                executor,
                store,
                resolver,
                deadline,
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Standard wiring: system DNS resolver, shared HTTP client, every probe,
    /// and the file store when `data_dir` is set.
    pub async fn from_config(config: Arc<ReconConfig>) -> Result<Self, ReconError> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let client = probes::http_client(&config)?;
        let registry = probes::standard_registry(&config, resolver.clone(), client)?;
        let store: Arc<dyn JobStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileJobStore::open(dir.clone()).await?),
            None => Arc::new(MemoryJobStore::new()),
        };
        Self::new(config, registry, store, Arc::new(DnsTargetResolver::new(resolver)))
    }

    pub fn config(&self) -> &ReconConfig {
        &self.inner.config
    }

    /// The time budget of one job.
    pub fn deadline(&self) -> Duration {
        self.inner.deadline
    }

    /// Normalizes the target and returns a job id right away.
    ///
    /// A job this orchestrator is still running for the target, or a fresh
    /// completed job from the store, is returned as-is. Otherwise a new job
    /// is created and its probes run in the background.
    pub async fn submit(&self, raw_target: &str) -> Result<JobId, ReconError> {
        let target = Target::parse(raw_target)?;

        let resolved = match self.inner.config.resolution_check {
            ResolutionCheck::OnSubmit => match self.inner.resolver.resolve(&target).await {
                Ok(addresses) => Some(addresses),
                Err(e) => {
                    warn!(target = %target, error = %e, "Rejecting unresolvable target.");
                    return Err(TargetError::Unresolvable(target.to_string()).into());
                }
            },
            ResolutionCheck::InBackground => None,
        };

        let mut in_flight = self.inner.in_flight.lock().await;
        if let Some(id) = in_flight.get(&target) {
            info!(job_id = %id, target = %target, "Job already in flight, reusing it.");
            return Ok(*id);
        }

        let latest = self
            .inner
            .store
            .find_latest_by_target(&target, Some(JobStatus::Completed))
            .await?;
        if let Some(job) = find_reusable(latest, Utc::now(), self.inner.config.staleness_window) {
            info!(job_id = %job.id, target = %target, created_at = %job.created_at, "Fresh completed job found, reusing it.");
            return Ok(job.id);
        }

        let id = self.inner.store.create(Job::new(target.clone(), Utc::now())).await?;
        in_flight.insert(target.clone(), id);
        drop(in_flight);
        info!(job_id = %id, target = %target, "Job created.");

        let this = self.clone();
        let span = info_span!("job", job_id = %id, target = %target);
        tokio::spawn(async move { this.run_job(id, target, resolved).await }.instrument(span));

        Ok(id)
    }

    async fn run_job(&self, id: JobId, target: Target, resolved: Option<Vec<IpAddr>>) {
        if let Err(e) = self.drive(id, &target, resolved).await {
            error!(error = %e, "Job runner hit a store error.");
            let reason = format!("store error: {e}");
            if let Err(e) = self.inner.store.update_status(id, JobStatus::Failed, Some(reason)).await {
                error!(error = %e, "Could not mark job as failed.");
            }
        }

        let mut in_flight = self.inner.in_flight.lock().await;
        if in_flight.get(&target) == Some(&id) {
            in_flight.remove(&target);
        }
    }

    async fn drive(&self, id: JobId, target: &Target, resolved: Option<Vec<IpAddr>>) -> Result<(), StoreError> {
        let store = &self.inner.store;
        store.update_status(id, JobStatus::Running, None).await?;
        debug!(status = %JobStatus::Running, "Job status changed.");

        let addresses = match resolved {
            Some(addresses) => addresses,
            None => match self.inner.resolver.resolve(target).await {
                Ok(addresses) => addresses,
                Err(e) => {
                    warn!(error = %e, "Target did not resolve, failing job.");
                    store.update_status(id, JobStatus::Failed, Some(UNRESOLVED_REASON.to_string())).await?;
                    return Ok(());
                }
            },
        };
        store.set_addresses(id, addresses.clone()).await?;

        let ledger = OutcomeLedger::new(id, Arc::clone(store));
        let inputs = JobInputs { job_id: id, target: target.clone(), addresses };
        let executor = &self.inner.executor;

        if tokio::time::timeout(self.inner.deadline, executor.execute(&inputs, &ledger)).await.is_err() {
            warn!(deadline_secs = self.inner.deadline.as_secs(), "Job deadline exceeded, abandoning running probes.");
        }
        for name in executor.registry().names() {
            if ledger.get(name).is_none() {
                ledger
                    .record(name, ProbeOutcome::failed(ErrorKind::Timeout, "job deadline exceeded"))
                    .await;
            }
        }
        ledger.sync_to_store().await;

        let outcomes = ledger.snapshot();
        let tally = OutcomeTally::of(&outcomes);
        store.set_report(id, merge(&outcomes)).await?;
        store.update_status(id, JobStatus::Completed, None).await?;
        info!(
            status = %JobStatus::Completed,
            succeeded = tally.succeeded,
            empty = tally.empty,
            failed = tally.failed,
            "Job completed."
        );
        Ok(())
    }

    // --- Job Handle ---

    pub async fn status(&self, id: JobId) -> Result<Option<JobStatus>, ReconError> {
        Ok(self.inner.store.get(id).await?.map(|job| job.status))
    }

    pub async fn summary(&self, id: JobId) -> Result<Option<JobSummary>, ReconError> {
        Ok(self.inner.store.get(id).await?.as_ref().map(JobSummary::from))
    }

    /// The merged report once the job is `completed`.
    pub async fn report(&self, id: JobId) -> Result<ReportLookup, ReconError> {
        let Some(job) = self.inner.store.get(id).await? else {
            return Ok(ReportLookup::NotFound);
        };
        Ok(match job.status {
            JobStatus::Completed => match job.report {
                Some(report) => ReportLookup::Ready(report),
                None => ReportLookup::Failed { reason: "completed without a report".into() },
            },
            JobStatus::Failed => ReportLookup::Failed {
                reason: job.failure.unwrap_or_else(|| "unknown failure".into()),
            },
            status => ReportLookup::InProgress(status),
        })
    }

    /// Per-probe outcomes; `None` until the job is terminal.
    pub async fn outcomes(&self, id: JobId) -> Result<Option<BTreeMap<ProbeName, ProbeOutcome>>, ReconError> {
        Ok(self
            .inner
            .store
            .get(id)
            .await?
            .filter(|job| job.status.is_terminal())
            .map(|job| job.outcomes))
    }

    /// Polls until the job is terminal. `None` if the id is unknown.
    pub async fn wait(&self, id: JobId, every: Duration) -> Result<Option<JobStatus>, ReconError> {
        loop {
            match self.status(id).await? {
                Some(status) if status.is_terminal() => return Ok(Some(status)),
                Some(_) => tokio::time::sleep(every).await,
                None => return Ok(None),
            }
        }
    }
}
