// src/core/executor.rs

//! Wave scheduling engine.
//!
//! Probes of one wave run concurrently, bounded by a per-job semaphore, each
//! inside its own timeout and retry loop. The next wave starts only once
//! every probe of the current one has an outcome. Adapter errors, timeouts
//! and panics all end up as a [`ProbeOutcome`]; nothing escapes a wave.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::models::{ErrorKind, JobId, ProbeName, ProbeOutcome};
use crate::core::probe::{ProbeContext, ProbeError};
use crate::core::registry::{ProbeEntry, ProbeRegistry, RegistryError, WavePlan};
use crate::core::store::JobStore;
use crate::core::target::Target;

/// Append-once outcome map owned by a single job.
///
/// Each outcome is kept locally and written through to the store as soon as
/// it is known, so the stored job fills in incrementally.
pub struct OutcomeLedger {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    outcomes: Mutex<BTreeMap<ProbeName, ProbeOutcome>>,
}

impl OutcomeLedger {
    pub fn new(job_id: JobId, store: Arc<dyn JobStore>) -> Self {
        Self { job_id, store, outcomes: Mutex::new(BTreeMap::new()) }
    }

    /// Records an outcome unless one already exists. Returns whether it was new.
    pub async fn record(&self, probe: ProbeName, outcome: ProbeOutcome) -> bool {
        {
            let mut outcomes = self.outcomes.lock().unwrap_or_else(|p| p.into_inner());
            if outcomes.contains_key(&probe) {
                return false;
            }
            outcomes.insert(probe, outcome.clone());
        }
        if let Err(e) = self.store.set_outcome(self.job_id, probe, outcome).await {
            error!(job_id = %self.job_id, probe = %probe, error = %e, "Failed to persist probe outcome.");
        }
        true
    }

    pub fn get(&self, probe: ProbeName) -> Option<ProbeOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&probe)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<ProbeName, ProbeOutcome> {
        self.outcomes.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Writes outcomes the store does not have yet (a write-through may have
    /// been cut off by the job deadline).
    pub async fn sync_to_store(&self) {
        let stored = match self.store.get(self.job_id).await {
            Ok(Some(job)) => job.outcomes,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Could not read job to reconcile outcomes.");
                return;
            }
        };
        for (probe, outcome) in self.snapshot() {
            if stored.contains_key(&probe) {
                continue;
            }
            if let Err(e) = self.store.set_outcome(self.job_id, probe, outcome).await {
                error!(job_id = %self.job_id, probe = %probe, error = %e, "Failed to persist probe outcome.");
            }
        }
    }
}

/// What every probe of a job gets to see, before dependency payloads.
#[derive(Debug, Clone)]
pub struct JobInputs {
    pub job_id: JobId,
    pub target: Target,
    pub addresses: Vec<IpAddr>,
}

pub struct WaveExecutor {
    registry: Arc<ProbeRegistry>,
    plan: WavePlan,
    max_concurrency: usize,
}

impl WaveExecutor {
    /// Validates the registry's dependency graph up front.
    pub fn new(registry: Arc<ProbeRegistry>, max_concurrency: usize) -> Result<Self, RegistryError> {
        let plan = registry.waves()?;
        Ok(Self { registry, plan, max_concurrency: max_concurrency.max(1) })
    }

    pub fn plan(&self) -> &WavePlan {
        &self.plan
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    /// Runs every wave in order. Cancel-safe: dropping the future aborts the
    /// probe tasks still in flight.
    pub async fn execute(&self, inputs: &JobInputs, ledger: &OutcomeLedger) {
        let limiter = Arc::new(Semaphore::new(self.max_concurrency));
        for (index, wave) in self.plan.iter().enumerate() {
            info!(job_id = %inputs.job_id, wave = index, probes = ?wave, "Dispatching wave.");
            self.run_wave(wave, inputs, ledger, &limiter).await;
            debug!(job_id = %inputs.job_id, wave = index, "Wave finished.");
        }
    }

    async fn run_wave(
        &self,
        wave: &[ProbeName],
        inputs: &JobInputs,
        ledger: &OutcomeLedger,
        limiter: &Arc<Semaphore>,
    ) {
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for &name in wave {
            let Some(entry) = self.registry.get(name) else {
                continue;
            };

            let mut dependencies = BTreeMap::new();
            let mut missing = None;
            for &dep in &entry.dependencies {
                match ledger.get(dep) {
                    Some(outcome) if outcome.is_success() => {
                        dependencies.insert(dep, outcome);
                    }
                    _ => {
                        missing = Some(dep);
                        break;
                    }
                }
            }
            if let Some(dep) = missing {
                debug!(job_id = %inputs.job_id, probe = %name, dependency = %dep, "Dependency unavailable, skipping probe.");
                ledger.record(name, ProbeOutcome::dependency_unavailable(dep)).await;
                continue;
            }

            let ctx = ProbeContext {
                target: inputs.target.clone(),
                addresses: inputs.addresses.clone(),
                dependencies,
                timeout: entry.settings.timeout,
            };
            let entry = entry.clone();
            let limiter = Arc::clone(limiter);
            let job_id = inputs.job_id;
            let handle = tasks.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return ProbeOutcome::failed(ErrorKind::Internal, "concurrency limiter closed");
                };
                run_probe(job_id, name, &entry, &ctx).await
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&name) = names.get(&id) {
                        ledger.record(name, outcome).await;
                    }
                }
                Err(e) => {
                    if let Some(&name) = names.get(&e.id()) {
                        error!(job_id = %inputs.job_id, probe = %name, error = %e, "Probe task panicked.");
                        ledger
                            .record(name, ProbeOutcome::failed(ErrorKind::Internal, format!("probe task failed: {e}")))
                            .await;
                    }
                }
            }
        }
    }
}

/// Invokes one adapter under its timeout and retry policy and classifies the result.
pub async fn run_probe(job_id: JobId, name: ProbeName, entry: &ProbeEntry, ctx: &ProbeContext) -> ProbeOutcome {
    let policy = entry.settings.retry;
    let max_attempts = policy.max_attempts.max(1);
    let timeout = entry.settings.timeout;
    let mut attempt = 1;

    loop {
        debug!(job_id = %job_id, probe = %name, attempt, "Running probe.");
        let result = match tokio::time::timeout(timeout, entry.adapter.run(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::transient(
                ErrorKind::Timeout,
                format!("no answer within {}ms", timeout.as_millis()),
            )),
        };

        match result {
            Ok(payload) => {
                info!(job_id = %job_id, probe = %name, attempt, "Probe succeeded.");
                return ProbeOutcome::Success { payload };
            }
            Err(ProbeError::NotFound(detail)) => {
                info!(job_id = %job_id, probe = %name, detail = %detail, "Probe found nothing.");
                return ProbeOutcome::not_found(detail);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(job_id = %job_id, probe = %name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Transient probe error, retrying.");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(ProbeError::Transient { kind, detail } | ProbeError::Terminal { kind, detail }) => {
                warn!(job_id = %job_id, probe = %name, attempt, kind = %kind, detail = %detail, "Probe failed.");
                return ProbeOutcome::Failed { kind, detail };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Job;
    use crate::core::probe::{ProbeAdapter, ProbeSettings, RetryPolicy};
    use crate::core::store::MemoryJobStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use strum::IntoEnumIterator;

    enum Behavior {
        Succeed(serde_json::Value),
        NotFound,
        FailTransient,
        FailTransientTimes(usize),
        FailTerminal,
        Hang,
        Panic,
    }

    struct Scripted {
        name: ProbeName,
        deps: Vec<ProbeName>,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: ProbeName, behavior: Behavior) -> Arc<Self> {
            Self::with_deps(name, &[], behavior)
        }

        fn with_deps(name: ProbeName, deps: &[ProbeName], behavior: Behavior) -> Arc<Self> {
            Arc::new(Self { name, deps: deps.to_vec(), behavior, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProbeAdapter for Scripted {
        fn name(&self) -> ProbeName {
            self.name
        }

        fn dependencies(&self) -> &[ProbeName] {
            &self.deps
        }

        async fn run(&self, _ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed(v) => Ok(v.clone()),
                Behavior::NotFound => Err(ProbeError::not_found("nothing")),
                Behavior::FailTransient => Err(ProbeError::transient(ErrorKind::Upstream, "HTTP 500")),
                Behavior::FailTransientTimes(n) if call < *n => {
                    Err(ProbeError::transient(ErrorKind::ConnectionReset, "reset"))
                }
                Behavior::FailTransientTimes(_) => Ok(json!({"attempt": call + 1})),
                Behavior::FailTerminal => Err(ProbeError::terminal(ErrorKind::Rejected, "HTTP 403")),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Behavior::Panic => panic!("adapter bug"),
            }
        }
    }

    fn settings(attempts: u32) -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(attempts, Duration::from_millis(100)),
        }
    }

    async fn harness(
        adapters: Vec<(Arc<Scripted>, u32)>,
    ) -> (WaveExecutor, OutcomeLedger, JobInputs, Arc<MemoryJobStore>) {
        let mut registry = ProbeRegistry::new();
        for (adapter, attempts) in adapters {
            registry.register(adapter, settings(attempts)).unwrap();
        }
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new(Target::parse("example.test").unwrap(), Utc::now());
        let job_id = store.create(job.clone()).await.unwrap();
        store
            .update_status(job_id, crate::core::models::JobStatus::Running, None)
            .await
            .unwrap();
        let ledger = OutcomeLedger::new(job_id, store.clone());
        let inputs = JobInputs {
            job_id,
            target: job.target,
            addresses: vec!["192.0.2.1".parse().unwrap()],
        };
        (WaveExecutor::new(Arc::new(registry), 4).unwrap(), ledger, inputs, store)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_backoff_until_exhausted() {
        let flaky = Scripted::new(ProbeName::Whois, Behavior::FailTransientTimes(2));
        let broken = Scripted::new(ProbeName::MailServers, Behavior::FailTransient);
        let (executor, ledger, inputs, _) = harness(vec![(flaky.clone(), 3), (broken.clone(), 3)]).await;

        let started = tokio::time::Instant::now();
        executor.execute(&inputs, &ledger).await;

        assert_eq!(flaky.calls(), 3);
        assert_eq!(ledger.get(ProbeName::Whois), Some(ProbeOutcome::Success { payload: json!({"attempt": 3}) }));
        assert_eq!(broken.calls(), 3);
        assert!(matches!(
            ledger.get(ProbeName::MailServers),
            Some(ProbeOutcome::Failed { kind: ErrorKind::Upstream, .. })
        ));
        // 100ms + 200ms of backoff for the exhausted probe.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_and_not_found_are_not_retried() {
        let rejected = Scripted::new(ProbeName::Whois, Behavior::FailTerminal);
        let nothing = Scripted::new(ProbeName::MailServers, Behavior::NotFound);
        let (executor, ledger, inputs, _) = harness(vec![(rejected.clone(), 3), (nothing.clone(), 3)]).await;

        executor.execute(&inputs, &ledger).await;

        assert_eq!(rejected.calls(), 1);
        assert_eq!(nothing.calls(), 1);
        assert_eq!(ledger.get(ProbeName::MailServers), Some(ProbeOutcome::not_found("nothing")));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_is_forced_to_timeout_without_blocking_siblings() {
        let hung = Scripted::new(ProbeName::OpenPorts, Behavior::Hang);
        let fine = Scripted::new(ProbeName::Dns, Behavior::Succeed(json!({"A": ["192.0.2.1"]})));
        let (executor, ledger, inputs, _) = harness(vec![(hung.clone(), 2), (fine, 1)]).await;

        executor.execute(&inputs, &ledger).await;

        assert_eq!(hung.calls(), 2);
        assert!(matches!(
            ledger.get(ProbeName::OpenPorts),
            Some(ProbeOutcome::Failed { kind: ErrorKind::Timeout, .. })
        ));
        assert!(ledger.get(ProbeName::Dns).is_some_and(|o| o.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dependency_skips_dependents_without_invoking_them() {
        let content = Scripted::new(ProbeName::Content, Behavior::NotFound);
        let dependents: Vec<_> = [ProbeName::Metadata, ProbeName::SocialLinks, ProbeName::Technologies, ProbeName::Summary]
            .into_iter()
            .map(|n| Scripted::with_deps(n, &[ProbeName::Content], Behavior::Succeed(json!({}))))
            .collect();
        let mut adapters = vec![(content, 2)];
        adapters.extend(dependents.iter().map(|d| (d.clone(), 1)));
        let (executor, ledger, inputs, store) = harness(adapters).await;

        executor.execute(&inputs, &ledger).await;

        for dependent in &dependents {
            assert_eq!(dependent.calls(), 0, "{} must not run", dependent.name);
            assert_eq!(
                ledger.get(dependent.name),
                Some(ProbeOutcome::dependency_unavailable(ProbeName::Content))
            );
        }
        let stored = store.get(inputs.job_id).await.unwrap().unwrap();
        assert_eq!(stored.outcomes.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_receive_the_dependency_payload() {
        struct Echo;
        #[async_trait]
        impl ProbeAdapter for Echo {
            fn name(&self) -> ProbeName {
                ProbeName::Metadata
            }
            fn dependencies(&self) -> &[ProbeName] {
                &[ProbeName::Content]
            }
            async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
                let body: serde_json::Value = ctx.dependency(ProbeName::Content)?;
                Ok(json!({ "seen": body["body"] }))
            }
        }

        let content = Scripted::new(ProbeName::Content, Behavior::Succeed(json!({"body": "<html/>"})));
        let (executor, ledger, inputs, _) = harness(vec![(content, 1)]).await;
        let mut registry = executor.registry().clone();
        registry.register(Arc::new(Echo), settings(1)).unwrap();
        let executor = WaveExecutor::new(Arc::new(registry), 2).unwrap();
        assert_eq!(executor.plan().len(), 2);

        executor.execute(&inputs, &ledger).await;
        assert_eq!(
            ledger.get(ProbeName::Metadata),
            Some(ProbeOutcome::Success { payload: json!({"seen": "<html/>"}) })
        );
    }

    #[tokio::test]
    async fn panicking_adapter_is_contained() {
        let bad = Scripted::new(ProbeName::Tls, Behavior::Panic);
        let good = Scripted::new(ProbeName::Dns, Behavior::Succeed(json!({})));
        let (executor, ledger, inputs, _) = harness(vec![(bad, 3), (good, 1)]).await;

        executor.execute(&inputs, &ledger).await;

        assert!(matches!(
            ledger.get(ProbeName::Tls),
            Some(ProbeOutcome::Failed { kind: ErrorKind::Internal, .. })
        ));
        assert!(ledger.get(ProbeName::Dns).is_some_and(|o| o.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_probes_never_exceed_the_concurrency_limit() {
        #[derive(Default)]
        struct Gauge {
            live: AtomicUsize,
            peak: AtomicUsize,
        }

        struct Slow {
            name: ProbeName,
            gauge: Arc<Gauge>,
        }

        #[async_trait]
        impl ProbeAdapter for Slow {
            fn name(&self) -> ProbeName {
                self.name
            }
            async fn run(&self, _ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
                let now = self.gauge.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.gauge.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.gauge.live.fetch_sub(1, Ordering::SeqCst);
                Ok(json!({}))
            }
        }

        let gauge = Arc::new(Gauge::default());
        let names: Vec<ProbeName> = ProbeName::iter().collect();
        assert_eq!(names.len(), 11);
        let mut registry = ProbeRegistry::new();
        for &name in &names {
            registry.register(Arc::new(Slow { name, gauge: gauge.clone() }), settings(1)).unwrap();
        }
        let executor = WaveExecutor::new(Arc::new(registry), 3).unwrap();
        assert_eq!(executor.plan().len(), 1);
        let (_, ledger, inputs, _) = harness(vec![]).await;

        let started = tokio::time::Instant::now();
        executor.execute(&inputs, &ledger).await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
        assert_eq!(gauge.live.load(Ordering::SeqCst), 0);
        // Eleven one-second probes through three slots take four rounds.
        assert!(started.elapsed() >= Duration::from_secs(4));
        for name in names {
            assert!(ledger.get(name).is_some_and(|o| o.is_success()), "{name} did not succeed");
        }
    }

    #[tokio::test]
    async fn ledger_is_append_once() {
        let (_, ledger, _, store) = harness(vec![]).await;
        assert!(ledger.record(ProbeName::Dns, ProbeOutcome::not_found("first")).await);
        assert!(!ledger.record(ProbeName::Dns, ProbeOutcome::not_found("second")).await);
        assert_eq!(ledger.get(ProbeName::Dns), Some(ProbeOutcome::not_found("first")));
        let job = store.get(ledger.job_id).await.unwrap().unwrap();
        assert_eq!(job.outcomes.get(&ProbeName::Dns), Some(&ProbeOutcome::not_found("first")));
    }
}
