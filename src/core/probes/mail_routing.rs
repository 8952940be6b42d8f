// src/core/probes/mail_routing.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{fetch_json, to_payload};
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HostingResponse {
    incoming_mail: ProviderList,
    outgoing_mail: ProviderList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProviderList {
    providers: Vec<RawProvider>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawProvider {
    organization: Option<String>,
    domain: Option<String>,
    country: Option<String>,
    as_number: Option<serde_json::Value>,
    paths: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailProvider {
    pub organization: Option<String>,
    pub domain: Option<String>,
    pub country: Option<String>,
    pub asn: Option<String>,
    /// First routing path, hops joined with " → ".
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailRouting {
    pub incoming: Vec<MailProvider>,
    pub outgoing: Vec<MailProvider>,
}

impl From<RawProvider> for MailProvider {
    fn from(raw: RawProvider) -> Self {
        let asn = raw.as_number.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Self {
            organization: raw.organization,
            domain: raw.domain,
            country: raw.country,
            asn,
            path: raw.paths.into_iter().next().map(|hops| hops.join(" → ")),
        }
    }
}

/// Parses the hosting-checker document. `None` when neither direction lists a provider.
pub fn parse_routing(document: serde_json::Value) -> Result<Option<MailRouting>, serde_json::Error> {
    let response: HostingResponse = serde_json::from_value(document)?;
    let routing = MailRouting {
        incoming: response.incoming_mail.providers.into_iter().map(MailProvider::from).collect(),
        outgoing: response.outgoing_mail.providers.into_iter().map(MailProvider::from).collect(),
    };
    Ok((!routing.incoming.is_empty() || !routing.outgoing.is_empty()).then_some(routing))
}

pub struct MailRoutingProbe {
    client: reqwest::Client,
    base_url: String,
}

impl MailRoutingProbe {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl ProbeAdapter for MailRoutingProbe {
    fn name(&self) -> ProbeName {
        ProbeName::MailServers
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let url = format!("{}/{}", self.base_url, ctx.target);
        let document: serde_json::Value = fetch_json(&self.client, &url).await?;
        let routing = parse_routing(document)
            .map_err(|e| ProbeError::terminal(ErrorKind::Parse, e.to_string()))?
            .ok_or_else(|| ProbeError::not_found(format!("no mail providers for {}", ctx.target)))?;
        info!(
            target = %ctx.target,
            incoming = routing.incoming.len(),
            outgoing = routing.outgoing.len(),
            "Mail routing retrieved."
        );
        to_payload(&routing)
    }
}
