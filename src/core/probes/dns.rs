// src/core/probes/dns.rs

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Finding, Severity, to_payload};
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

/// Record types collected for every target.
const RECORD_TYPES: [RecordType; 8] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::NS,
    RecordType::TXT,
    RecordType::CAA,
    RecordType::SOA,
];

/// A list of common DKIM selectors to check for when a specific one is not known.
const COMMON_DKIM_SELECTORS: &[&str] = &["google", "selector1", "selector2", "default", "dkim"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmarcRecord {
    pub record: String,
    pub policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkimRecord {
    pub selector: String,
    pub record: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSecurity {
    pub spf: Option<String>,
    pub dmarc: Option<DmarcRecord>,
    pub dkim: Vec<DkimRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsReport {
    /// Record type → textual records, only for types that returned something.
    pub records: BTreeMap<String, Vec<String>>,
    pub ptr: Option<String>,
    pub email_security: EmailSecurity,
    pub findings: Vec<Finding>,
}

pub struct DnsProbe {
    resolver: TokioAsyncResolver,
}

impl DnsProbe {
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }

    /// `Ok(vec![])` for "no such record", `Err` for lookup failures.
    async fn lookup(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, ResolveError> {
        match self.resolver.lookup(name, record_type).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|r| r.record_type() == record_type)
                .filter_map(|r| r.data().map(|d| d.to_string()))
                .collect()),
            Err(e) if is_no_records(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn lookup_dmarc(&self, domain: &str) -> Option<DmarcRecord> {
        let name = format!("_dmarc.{domain}");
        match self.lookup(&name, RecordType::TXT).await {
            Ok(records) => records.into_iter().find(|r| r.starts_with("v=DMARC1")).map(|record| DmarcRecord {
                policy: parse_dmarc_policy(&record),
                record,
            }),
            Err(e) => {
                warn!(target = %name, error = %e, "DMARC lookup failed.");
                None
            }
        }
    }

    async fn lookup_dkim(&self, domain: &str) -> Vec<DkimRecord> {
        let mut found = Vec::new();
        for selector in COMMON_DKIM_SELECTORS {
            let name = format!("{selector}._domainkey.{domain}");
            match self.lookup(&name, RecordType::TXT).await {
                Ok(records) => found.extend(
                    records
                        .into_iter()
                        .filter(|r| r.starts_with("v=DKIM1"))
                        .map(|record| DkimRecord { selector: selector.to_string(), record }),
                ),
                Err(e) => debug!(selector, error = %e, "DKIM lookup for this selector failed."),
            }
        }
        found
    }

    async fn lookup_ptr(&self, address: Option<IpAddr>) -> Option<String> {
        let address = address?;
        match self.resolver.reverse_lookup(address).await {
            Ok(names) => names.iter().next().map(|n| n.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!(%address, error = %e, "No PTR record.");
                None
            }
        }
    }
}

#[async_trait]
impl ProbeAdapter for DnsProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Dns
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let domain = ctx.target.as_str();
        info!(target = %domain, "Starting DNS lookups.");

        let (a, aaaa, cname, mx, ns, txt, caa, soa) = tokio::join!(
            self.lookup(domain, RecordType::A),
            self.lookup(domain, RecordType::AAAA),
            self.lookup(domain, RecordType::CNAME),
            self.lookup(domain, RecordType::MX),
            self.lookup(domain, RecordType::NS),
            self.lookup(domain, RecordType::TXT),
            self.lookup(domain, RecordType::CAA),
            self.lookup(domain, RecordType::SOA),
        );
        let lookups = [a, aaaa, cname, mx, ns, txt, caa, soa];
        let mut records = BTreeMap::new();
        let mut failures = Vec::new();
        for (record_type, result) in RECORD_TYPES.iter().zip(lookups) {
            match result {
                Ok(found) if !found.is_empty() => {
                    records.insert(record_type.to_string(), found);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target = %domain, record_type = %record_type, error = %e, "DNS lookup failed.");
                    failures.push(e);
                }
            }
        }

        if records.is_empty() {
            if failures.len() == RECORD_TYPES.len() {
                let e = &failures[0];
                let kind = if matches!(e.kind(), ResolveErrorKind::Timeout) {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Network
                };
                return Err(ProbeError::transient(kind, e.to_string()));
            }
            return Err(ProbeError::not_found(format!("no DNS records for {domain}")));
        }

        let (dmarc, dkim, ptr) = tokio::join!(
            self.lookup_dmarc(domain),
            self.lookup_dkim(domain),
            self.lookup_ptr(ctx.first_ipv4()),
        );
        let spf = records
            .get("TXT")
            .and_then(|txt| txt.iter().find(|r| r.starts_with("v=spf1")).cloned());

        let mut report = DnsReport {
            ptr,
            email_security: EmailSecurity { spf, dmarc, dkim },
            records,
            findings: Vec::new(),
        };
        report.findings = analyze(&report);
        info!(target = %domain, types = report.records.len(), findings = report.findings.len(), "DNS lookups finished.");

        to_payload(&report)
    }
}

fn is_no_records(e: &ResolveError) -> bool {
    matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// Extracts the `p=` tag of a DMARC record.
pub fn parse_dmarc_policy(record: &str) -> Option<String> {
    record
        .split(';')
        .map(str::trim)
        .find_map(|tag| tag.strip_prefix("p="))
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
}

/// Email-authentication posture findings.
pub fn analyze(report: &DnsReport) -> Vec<Finding> {
    let mut findings = Vec::new();
    let email = &report.email_security;

    match &email.dmarc {
        None => findings.push(Finding::new(Severity::Critical, "DNS_DMARC_MISSING")),
        Some(d) if d.policy.as_deref() == Some("none") => {
            findings.push(Finding::new(Severity::Warning, "DNS_DMARC_POLICY_NONE"))
        }
        Some(_) => {}
    }

    match email.spf.as_deref() {
        None => findings.push(Finding::new(Severity::Warning, "DNS_SPF_MISSING")),
        Some(spf) if spf.ends_with("~all") => findings.push(Finding::new(Severity::Info, "DNS_SPF_POLICY_SOFTFAIL")),
        Some(spf) if spf.ends_with("?all") => findings.push(Finding::new(Severity::Info, "DNS_SPF_POLICY_NEUTRAL")),
        Some(_) => {}
    }

    if email.dkim.is_empty() {
        findings.push(Finding::new(Severity::Info, "DNS_DKIM_MISSING"));
    }
    if !report.records.contains_key("CAA") {
        findings.push(Finding::new(Severity::Info, "DNS_CAA_MISSING"));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.code.as_str()).collect()
    }

    #[test]
    fn dmarc_policy_is_extracted() {
        assert_eq!(parse_dmarc_policy("v=DMARC1; p=reject; rua=mailto:x@example.test").as_deref(), Some("reject"));
        assert_eq!(parse_dmarc_policy("v=DMARC1;p=None").as_deref(), Some("none"));
        assert_eq!(parse_dmarc_policy("v=DMARC1; rua=mailto:x@example.test"), None);
    }

    #[test]
    fn bare_domain_gets_every_missing_finding() {
        let report = DnsReport::default();
        assert_eq!(
            codes(&analyze(&report)),
            vec!["DNS_DMARC_MISSING", "DNS_SPF_MISSING", "DNS_DKIM_MISSING", "DNS_CAA_MISSING"]
        );
    }

    #[test]
    fn weak_policies_are_flagged() {
        let mut report = DnsReport::default();
        report.records.insert("CAA".into(), vec!["0 issue \"letsencrypt.org\"".into()]);
        report.email_security = EmailSecurity {
            spf: Some("v=spf1 include:_spf.example.test ~all".into()),
            dmarc: Some(DmarcRecord { record: "v=DMARC1; p=none".into(), policy: Some("none".into()) }),
            dkim: vec![DkimRecord { selector: "google".into(), record: "v=DKIM1; k=rsa".into() }],
        };
        assert_eq!(codes(&analyze(&report)), vec!["DNS_DMARC_POLICY_NONE", "DNS_SPF_POLICY_SOFTFAIL"]);
    }
}
