// src/core/target.rs

use std::fmt;
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single DNS label: alphanumerics and inner hyphens.
static RE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").unwrap());
static RE_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*://").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target is empty")]
    Empty,
    #[error("'{0}' is an IP address, not a domain")]
    IpLiteral(String),
    #[error("'{0}' is not a valid hostname")]
    InvalidHostname(String),
    /// Only raised when resolution is checked at submit time.
    #[error("'{0}' did not resolve to any address")]
    Unresolvable(String),
}

/// A normalized domain name under investigation.
///
/// Lowercase, with scheme, `www.`, path, query, port and trailing dot removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target(String);

impl Target {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let mut host = raw.trim().to_ascii_lowercase();
        if let Some(m) = RE_SCHEME.find(&host) {
            host = host[m.end()..].to_string();
        }
        // Drop everything after the authority.
        if let Some(idx) = host.find(['/', '?', '#']) {
            host.truncate(idx);
        }
        // Userinfo, as in `user@host`.
        if let Some(idx) = host.rfind('@') {
            host = host[idx + 1..].to_string();
        }
        if host.is_empty() {
            return Err(TargetError::Empty);
        }
        if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return Err(TargetError::IpLiteral(host));
        }
        if let Some((name, port)) = host.rsplit_once(':') {
            if port.chars().all(|c| c.is_ascii_digit()) {
                host = name.to_string();
            }
        }
        let host = host.trim_end_matches('.');
        let host = host.strip_prefix("www.").unwrap_or(host);

        if host.parse::<IpAddr>().is_ok() {
            return Err(TargetError::IpLiteral(host.to_string()));
        }
        if !is_plausible_hostname(host) {
            return Err(TargetError::InvalidHostname(host.to_string()));
        }
        Ok(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_plausible_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|l| RE_LABEL.is_match(l)) {
        return false;
    }
    // A purely numeric TLD is never a real domain.
    labels
        .last()
        .is_some_and(|tld| !tld.chars().all(|c| c.is_ascii_digit()))
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Target {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Target::parse(&value)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.0
    }
}
