// src/core/error.rs

//! Errors that cross the orchestrator boundary.
//!
//! Probe failures never appear here: they are folded into a
//! [`ProbeOutcome`](crate::core::models::ProbeOutcome) by the executor.

use crate::core::registry::RegistryError;
use crate::core::store::StoreError;
use crate::core::target::TargetError;

#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    /// Rejected synchronously by `submit`, before any job exists. Covers
    /// malformed input and, with `ResolutionCheck::OnSubmit`, names that do
    /// not resolve.
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetError),

    #[error("job store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("probe registry misconfigured: {0}")]
    Registry(#[from] RegistryError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}
