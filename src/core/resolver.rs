// src/core/resolver.rs

//! The one structural precondition of a job: the target must resolve.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::core::target::Target;

#[derive(Debug, thiserror::Error)]
#[error("could not resolve '{target}': {detail}")]
pub struct ResolveError {
    pub target: String,
    pub detail: String,
}

#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Returns at least one address, or an error.
    async fn resolve(&self, target: &Target) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the shared hickory resolver.
#[derive(Clone)]
pub struct DnsTargetResolver {
    resolver: TokioAsyncResolver,
}

impl DnsTargetResolver {
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl TargetResolver for DnsTargetResolver {
    async fn resolve(&self, target: &Target) -> Result<Vec<IpAddr>, ResolveError> {
        debug!(target = %target, "Resolving target.");
        let lookup = self.resolver.lookup_ip(target.as_str()).await.map_err(|e| {
            warn!(target = %target, error = %e, "Target did not resolve.");
            ResolveError { target: target.to_string(), detail: e.to_string() }
        })?;
        let mut addresses: Vec<IpAddr> = lookup.iter().collect();
        addresses.sort();
        addresses.dedup();
        if addresses.is_empty() {
            return Err(ResolveError { target: target.to_string(), detail: "no addresses".into() });
        }
        debug!(target = %target, count = addresses.len(), "Target resolved.");
        Ok(addresses)
    }
}
