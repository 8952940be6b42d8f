// src/core/probe.rs

//! The capability every probe adapter implements, and the vocabulary the
//! executor uses to classify what an adapter returned.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::core::models::{ErrorKind, ProbeName, ProbeOutcome, RetryClass};
use crate::core::target::Target;

/// Everything an adapter may look at while running.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub target: Target,
    /// Addresses the target resolved to during the precondition check.
    pub addresses: Vec<IpAddr>,
    /// Outcomes of this probe's declared dependencies (always `Success`).
    pub dependencies: BTreeMap<ProbeName, ProbeOutcome>,
    /// Per-attempt time box the executor enforces; adapters may use it to
    /// size their own inner timeouts.
    pub timeout: Duration,
}

impl ProbeContext {
    /// Decodes the success payload of a dependency.
    pub fn dependency<T: DeserializeOwned>(&self, name: ProbeName) -> Result<T, ProbeError> {
        let payload = self
            .dependencies
            .get(&name)
            .and_then(ProbeOutcome::payload)
            .ok_or_else(|| ProbeError::terminal(ErrorKind::Internal, format!("{name} payload missing")))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| ProbeError::terminal(ErrorKind::Parse, format!("{name} payload: {e}")))
    }

    pub fn first_ipv4(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| self.addresses.first())
            .copied()
    }
}

/// What an adapter reports when it does not produce a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    /// Ran fine, nothing there. Becomes `Empty`.
    #[error("not found: {0}")]
    NotFound(String),
    /// Worth another attempt (timeouts, resets, 5xx).
    #[error("{kind}: {detail}")]
    Transient { kind: ErrorKind, detail: String },
    /// Retrying will not help.
    #[error("{kind}: {detail}")]
    Terminal { kind: ErrorKind, detail: String },
}

impl ProbeError {
    pub fn not_found(detail: impl Into<String>) -> Self {
        ProbeError::NotFound(detail.into())
    }

    pub fn transient(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ProbeError::Transient { kind, detail: detail.into() }
    }

    pub fn terminal(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ProbeError::Terminal { kind, detail: detail.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Transient { .. })
    }

    /// Classifies an HTTP client error the way every HTTP-backed probe wants it.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProbeError::transient(ErrorKind::Timeout, e.to_string());
        }
        if let Some(status) = e.status() {
            return ProbeError::from_status(status, e.to_string());
        }
        if e.is_connect() {
            let text = e.to_string().to_ascii_lowercase();
            let kind = if text.contains("refused") {
                ErrorKind::ConnectionRefused
            } else if text.contains("reset") {
                ErrorKind::ConnectionReset
            } else {
                ErrorKind::Network
            };
            return ProbeError::transient(kind, e.to_string());
        }
        if e.is_decode() {
            return ProbeError::terminal(ErrorKind::Parse, e.to_string());
        }
        ProbeError::transient(ErrorKind::Network, e.to_string())
    }

    /// 5xx and 429 are transient, 404 is "nothing there", other 4xx are terminal.
    pub fn from_status(status: reqwest::StatusCode, detail: impl Into<String>) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProbeError::transient(ErrorKind::Upstream, detail)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            ProbeError::not_found(detail)
        } else {
            ProbeError::terminal(ErrorKind::Rejected, detail)
        }
    }

    /// Classifies a raw socket error.
    pub fn from_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match e.kind() {
            Io::TimedOut | Io::WouldBlock => ProbeError::transient(ErrorKind::Timeout, e.to_string()),
            Io::ConnectionRefused => ProbeError::transient(ErrorKind::ConnectionRefused, e.to_string()),
            Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe => {
                ProbeError::transient(ErrorKind::ConnectionReset, e.to_string())
            }
            _ => ProbeError::transient(ErrorKind::Network, e.to_string()),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    pub const fn once() -> Self {
        Self { max_attempts: 1, base_delay: Duration::ZERO }
    }

    pub fn for_class(class: RetryClass) -> Self {
        match class {
            RetryClass::Idempotent => Self::new(3, Duration::from_secs(1)),
            RetryClass::Expensive => Self::new(2, Duration::from_secs(2)),
            RetryClass::Local => Self::once(),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Sum of all backoff sleeps if every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|a| self.backoff(a)).sum()
    }
}

/// Scheduling parameters for one registered probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProbeSettings {
    pub fn for_probe(name: ProbeName) -> Self {
        Self {
            timeout: name.default_timeout(),
            retry: RetryPolicy::for_class(name.retry_class()),
        }
    }

    /// Worst-case wall clock: every attempt times out and every backoff is slept.
    pub fn budget(&self) -> Duration {
        self.timeout.saturating_mul(self.retry.max_attempts.max(1)) + self.retry.total_backoff()
    }
}

/// A reconnaissance probe.
///
/// Implementations must be safe to call concurrently for different targets.
/// The executor time-boxes every call, so an adapter that never returns is
/// cut off and recorded as a timeout.
#[async_trait]
pub trait ProbeAdapter: Send + Sync {
    fn name(&self) -> ProbeName;

    /// Probes whose `Success` payload this one consumes.
    fn dependencies(&self) -> &[ProbeName] {
        &[]
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError>;
}
