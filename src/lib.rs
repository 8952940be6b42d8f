// src/lib.rs

//! Domain reconnaissance: submit a host, get back a job whose report is
//! assembled from independent probes run in dependency waves.

pub mod config;
pub mod core;
pub mod logging;

pub use crate::config::ReconConfig;
pub use crate::core::{Orchestrator, ReconError};
