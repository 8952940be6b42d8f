// src/core/probes/whois.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{fetch_json, to_payload};
use crate::core::models::ProbeName;
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all(serialize = "camelCase"))]
pub struct DomainDetails {
    pub domain: Option<String>,
    pub name: Option<String>,
    pub extension: Option<String>,
    pub id: Option<String>,
    pub status: Vec<String>,
    #[serde(alias = "created_date_in_time")]
    pub created: Option<String>,
    #[serde(alias = "updated_date_in_time")]
    pub updated: Option<String>,
    #[serde(alias = "expiration_date_in_time")]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all(serialize = "camelCase"))]
pub struct Registrar {
    pub id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "referral_url")]
    pub site: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all(serialize = "camelCase"))]
pub struct Contact {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// The registration record, split into the usual WHOIS sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhoisRecord {
    pub domain: Option<DomainDetails>,
    pub registrar: Option<Registrar>,
    pub registrant: Option<Contact>,
    pub administrative: Option<Contact>,
    pub technical: Option<Contact>,
    /// Set by the upstream when it has no record.
    #[serde(skip_serializing)]
    pub error: Option<String>,
}

impl WhoisRecord {
    /// A record without a domain section (or with an upstream error) is "nothing found".
    pub fn into_found(self) -> Option<Self> {
        let has_domain = self.domain.as_ref().is_some_and(|d| d.domain.is_some() || d.name.is_some());
        (self.error.is_none() && has_domain).then_some(self)
    }
}

pub struct WhoisProbe {
    client: reqwest::Client,
    base_url: String,
}

impl WhoisProbe {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl ProbeAdapter for WhoisProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Whois
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let url = format!("{}/{}", self.base_url, ctx.target);
        let record: WhoisRecord = fetch_json(&self.client, &url).await?;
        let record = record
            .into_found()
            .ok_or_else(|| ProbeError::not_found(format!("no WHOIS record for {}", ctx.target)))?;
        info!(
            target = %ctx.target,
            registrar = record.registrar.as_ref().and_then(|r| r.name.as_deref()).unwrap_or("-"),
            "WHOIS record retrieved."
        );
        to_payload(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upstream_document_maps_onto_sections() {
        let raw = json!({
            "domain": {
                "domain": "example.test",
                "name": "example",
                "extension": "test",
                "id": "123_DOMAIN",
                "status": ["clientTransferProhibited"],
                "created_date_in_time": "1995-08-14T04:00:00Z",
                "expiration_date_in_time": "2030-08-13T04:00:00Z"
            },
            "registrar": {"name": "Example Registrar", "referral_url": "https://registrar.test"},
            "registrant": {"organization": "Example Org", "country": "US", "postal_code": "00000"}
        });
        let record: WhoisRecord = serde_json::from_value(raw).unwrap();
        let record = record.into_found().unwrap();
        let out = serde_json::to_value(&record).unwrap();

        assert_eq!(out["domain"]["created"], "1995-08-14T04:00:00Z");
        assert_eq!(out["registrar"]["site"], "https://registrar.test");
        assert_eq!(out["registrant"]["postalCode"], "00000");
        assert!(out["technical"].is_null());
        assert!(out.get("error").is_none());
    }

    #[test]
    fn error_documents_count_as_not_found() {
        let record: WhoisRecord = serde_json::from_value(json!({"error": "No WHOIS data"})).unwrap();
        assert!(record.into_found().is_none());
    }
}
