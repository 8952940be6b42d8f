// src/core/probes/mod.rs

//! Concrete probe adapters and the standard registry wiring them together.

pub mod content;
pub mod dns;
pub mod fingerprint;
pub mod geo_ip;
pub mod mail_routing;
pub mod metadata;
pub mod port_scan;
pub mod social;
pub mod summarizer;
pub mod tls;
pub mod whois;

use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ReconConfig;
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::ProbeError;
use crate::core::registry::{ProbeRegistry, RegistryError};

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A machine-readable observation attached to a probe payload, e.g. `DNS_SPF_MISSING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: String,
}

impl Finding {
    pub fn new(severity: Severity, code: &str) -> Self {
        Self { severity, code: code.to_string() }
    }
}

/// The HTTP client shared by every HTTP-backed probe.
pub fn http_client(config: &ReconConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}

/// GETs a JSON document, classifying transport errors and non-2xx statuses.
pub(crate) async fn fetch_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, ProbeError> {
    debug!(url, "Fetching JSON.");
    let response = client.get(url).send().await.map_err(ProbeError::from_reqwest)?;
    let status = response.status();
    if !status.is_success() {
        warn!(url, %status, "Upstream answered with an error status.");
        return Err(ProbeError::from_status(status, format!("HTTP {status} from {url}")));
    }
    response.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            ProbeError::terminal(ErrorKind::Parse, format!("invalid JSON from {url}: {e}"))
        } else {
            ProbeError::from_reqwest(e)
        }
    })
}

pub(crate) fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value, ProbeError> {
    serde_json::to_value(value).map_err(|e| ProbeError::terminal(ErrorKind::Internal, e.to_string()))
}

/// Registers every probe with the timeouts and retry policies from `config`.
pub fn standard_registry(
    config: &ReconConfig,
    resolver: TokioAsyncResolver,
    client: reqwest::Client,
) -> Result<ProbeRegistry, RegistryError> {
    let settings = |name: ProbeName| config.settings_for(name);

    ProbeRegistry::new()
        .with(Arc::new(dns::DnsProbe::new(resolver)), settings(ProbeName::Dns))?
        .with(
            Arc::new(whois::WhoisProbe::new(client.clone(), &config.whois_url)),
            settings(ProbeName::Whois),
        )?
        .with(
            Arc::new(geo_ip::GeoIpProbe::new(client.clone(), &config.geoip_url)),
            settings(ProbeName::GeoIp),
        )?
        .with(
            Arc::new(port_scan::PortScanProbe::new(config.scan_ports.clone(), config.port_connect_timeout)),
            settings(ProbeName::OpenPorts),
        )?
        .with(Arc::new(tls::TlsProbe), settings(ProbeName::Tls))?
        .with(
            Arc::new(mail_routing::MailRoutingProbe::new(client.clone(), &config.mail_url)),
            settings(ProbeName::MailServers),
        )?
        .with(Arc::new(content::ContentProbe::new(client.clone())), settings(ProbeName::Content))?
        .with(Arc::new(metadata::MetadataProbe), settings(ProbeName::Metadata))?
        .with(Arc::new(social::SocialLinksProbe), settings(ProbeName::SocialLinks))?
        .with(Arc::new(fingerprint::FingerprintProbe), settings(ProbeName::Technologies))?
        .with(
            Arc::new(summarizer::SummarizerProbe::new(client, summarizer::SummarizerSettings::from_config(config))),
            settings(ProbeName::Summary),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_resolver::config::{ResolverConfig, ResolverOpts};
    use strum::IntoEnumIterator;

    #[tokio::test]
    async fn standard_registry_covers_every_probe_in_two_waves() {
        let config = ReconConfig::default();
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let registry = standard_registry(&config, resolver, http_client(&config).unwrap()).unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), ProbeName::iter().collect::<Vec<_>>());
        let waves = registry.waves().unwrap();
        assert_eq!(waves.len(), 2);
        assert!(waves[0].contains(&ProbeName::Content));
        assert_eq!(
            waves[1],
            vec![ProbeName::Metadata, ProbeName::SocialLinks, ProbeName::Technologies, ProbeName::Summary]
        );
    }
}
