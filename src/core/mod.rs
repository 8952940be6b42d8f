// src/core/mod.rs

//! The reconnaissance engine: jobs, probes, the wave executor and the
//! orchestrator that ties them to a store.

pub mod error;
pub mod executor;
pub mod freshness;
pub mod models;
pub mod orchestrator;
pub mod probe;
pub mod probes;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod store;
pub mod target;

pub use error::ReconError;
pub use models::{ErrorKind, Job, JobId, JobStatus, ProbeName, ProbeOutcome};
pub use orchestrator::{JobSummary, Orchestrator, ReportLookup};
pub use report::Report;
pub use target::Target;
