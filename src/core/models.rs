// src/core/models.rs

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::core::report::Report;
use crate::core::target::Target;

// --- Probe Identity ---

/// Every reconnaissance probe the orchestrator knows about.
///
/// The serialized form (camelCase) doubles as the report section key, so
/// `ProbeName::OpenPorts` lands in the report as `"openPorts"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ProbeName {
    Dns,
    Whois,
    GeoIp,
    OpenPorts,
    Tls,
    MailServers,
    Content,
    Metadata,
    SocialLinks,
    Technologies,
    Summary,
}

/// How aggressively a probe may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Side-effect-free network lookups; cheap to repeat.
    Idempotent,
    /// Full page fetches and LLM calls; retried at most once.
    Expensive,
    /// Pure extraction over an already-fetched payload.
    Local,
}

impl ProbeName {
    pub fn default_timeout(&self) -> Duration {
        match self {
            ProbeName::Dns => Duration::from_secs(10),
            ProbeName::Whois => Duration::from_secs(15),
            ProbeName::GeoIp => Duration::from_secs(10),
            ProbeName::OpenPorts => Duration::from_secs(30),
            ProbeName::Tls => Duration::from_secs(15),
            ProbeName::MailServers => Duration::from_secs(15),
            ProbeName::Content => Duration::from_secs(30),
            ProbeName::Metadata | ProbeName::SocialLinks | ProbeName::Technologies => {
                Duration::from_secs(5)
            }
            ProbeName::Summary => Duration::from_secs(60),
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            ProbeName::Dns
            | ProbeName::Whois
            | ProbeName::GeoIp
            | ProbeName::OpenPorts
            | ProbeName::Tls
            | ProbeName::MailServers => RetryClass::Idempotent,
            ProbeName::Content | ProbeName::Summary => RetryClass::Expensive,
            ProbeName::Metadata | ProbeName::SocialLinks | ProbeName::Technologies => {
                RetryClass::Local
            }
        }
    }
}

// --- Probe Outcomes ---

/// Terminal error classification recorded on a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    Network,
    /// Upstream answered with a 5xx (or 429).
    Upstream,
    /// Upstream answered with a non-retryable 4xx.
    Rejected,
    Parse,
    /// The probe is not configured to run (e.g. missing API key).
    Unavailable,
    /// The adapter panicked or the task was lost.
    Internal,
}

/// Why a probe ran but produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EmptyReason {
    /// The probe ran and legitimately found nothing (no MX, NXDOMAIN, ...).
    NotFound { detail: String },
    /// A declared dependency did not succeed; the adapter was never invoked.
    DependencyUnavailable { dependency: ProbeName },
}

/// Tri-state result of one probe for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ProbeOutcome {
    Success { payload: serde_json::Value },
    Empty { reason: EmptyReason },
    Failed { kind: ErrorKind, detail: String },
}

impl ProbeOutcome {
    pub fn not_found(detail: impl Into<String>) -> Self {
        ProbeOutcome::Empty { reason: EmptyReason::NotFound { detail: detail.into() } }
    }

    pub fn dependency_unavailable(dependency: ProbeName) -> Self {
        ProbeOutcome::Empty { reason: EmptyReason::DependencyUnavailable { dependency } }
    }

    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ProbeOutcome::Failed { kind, detail: detail.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            ProbeOutcome::Success { payload } => Some(payload),
            _ => None,
        }
    }
}

// --- Jobs ---

/// Opaque, caller-visible job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Valid successor states.
    ///
    /// ```text
    /// Pending ──► Running ──► Completed
    ///                  └────► Failed
    /// ```
    pub fn valid_transitions(&self) -> &[JobStatus] {
        match self {
            Self::Pending => &[Self::Running],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Recorded state change (audit trail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid job transition from {from} to {to}")]
pub struct JobTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One orchestrated reconnaissance run for a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub target: Target,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
    #[serde(default)]
    pub outcomes: BTreeMap<ProbeName, ProbeOutcome>,
    #[serde(default)]
    pub report: Option<Report>,
    /// Structural failure reason; only set on `failed`.
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub transitions: Vec<JobTransition>,
}

impl Job {
    pub fn new(target: Target, created_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            target,
            status: JobStatus::Pending,
            created_at,
            completed_at: None,
            addresses: Vec::new(),
            outcomes: BTreeMap::new(),
            report: None,
            failure: None,
            transitions: Vec::new(),
        }
    }

    /// Moves the job along the state machine, stamping `completed_at` on terminal states.
    pub fn transition(
        &mut self,
        to: JobStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(JobTransitionError { from: self.status, to });
        }
        self.transitions.push(JobTransition { from: self.status, to, timestamp: at, reason });
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    fn job() -> Job {
        Job::new(Target::parse("example.test").unwrap(), Utc::now())
    }

    #[test]
    fn probe_names_serialize_as_report_keys() {
        assert_eq!(ProbeName::OpenPorts.to_string(), "openPorts");
        assert_eq!(serde_json::to_string(&ProbeName::MailServers).unwrap(), "\"mailServers\"");
        assert_eq!(ProbeName::from_str("socialLinks").unwrap(), ProbeName::SocialLinks);
        for name in ProbeName::iter() {
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json.trim_matches('"'), name.to_string());
        }
    }

    #[test]
    fn happy_path_lifecycle_is_recorded() {
        let mut job = job();
        job.transition(JobStatus::Running, None, Utc::now()).unwrap();
        assert!(job.completed_at.is_none());
        job.transition(JobStatus::Completed, Some("done".into()), Utc::now()).unwrap();
        assert!(job.completed_at.is_some());
        let visited: Vec<_> = job.transitions.iter().map(|t| t.to).collect();
        assert_eq!(visited, vec![JobStatus::Running, JobStatus::Completed]);
    }

    #[test]
    fn terminal_states_are_never_left() {
        let mut job = job();
        assert!(job.transition(JobStatus::Completed, None, Utc::now()).is_err());
        job.transition(JobStatus::Running, None, Utc::now()).unwrap();
        job.transition(JobStatus::Failed, None, Utc::now()).unwrap();
        for to in [JobStatus::Pending, JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(
                job.transition(to, None, Utc::now()),
                Err(JobTransitionError { from: JobStatus::Failed, to })
            );
        }
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = ProbeOutcome::dependency_unavailable(ProbeName::Content);
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "empty");
        assert_eq!(value["reason"]["kind"], "dependencyUnavailable");
        assert_eq!(value["reason"]["dependency"], "content");
    }
}
