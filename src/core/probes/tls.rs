// src/core/probes/tls.rs

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use super::{Finding, Severity, to_payload};
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

const HTTPS_PORT: u16 = 443;
const EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateReport {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub version: u32,
    pub signature_algorithm: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    /// Inside the validity period right now.
    pub is_valid: bool,
    pub subject_alt_names: Vec<String>,
    pub hostname_matches: bool,
    pub findings: Vec<Finding>,
}

/// Reads the certificate the target presents on :443.
///
/// The handshake accepts invalid chains on purpose so an expired or
/// mismatched certificate is still reported rather than hidden behind a
/// handshake error.
pub struct TlsProbe;

#[async_trait]
impl ProbeAdapter for TlsProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Tls
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let host = ctx.target.to_string();
        let address = ctx
            .first_ipv4()
            .ok_or_else(|| ProbeError::terminal(ErrorKind::Internal, "no resolved address"))?;
        let io_timeout = ctx.timeout;
        info!(target = %host, "Starting TLS inspection.");

        debug!("Spawning blocking task for TLS connection.");
        let der = spawn_blocking(move || fetch_peer_certificate(&host, SocketAddr::new(address, HTTPS_PORT), io_timeout))
            .await
            .map_err(|e| {
                error!(panic = %e, "Blocking TLS task failed.");
                ProbeError::terminal(ErrorKind::Internal, format!("TLS task failed: {e}"))
            })??;

        let Some(der) = der else {
            return Err(ProbeError::not_found("server presented no certificate"));
        };
        let report = inspect_certificate(&der, ctx.target.as_str(), Utc::now())?;
        info!(
            subject = %report.subject,
            issuer = %report.issuer,
            days_left = report.days_until_expiry,
            "Certificate parsed."
        );
        to_payload(&report)
    }
}

fn fetch_peer_certificate(host: &str, addr: SocketAddr, io_timeout: Duration) -> Result<Option<Vec<u8>>, ProbeError> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| ProbeError::terminal(ErrorKind::Internal, format!("TLS connector: {e}")))?;

    debug!(%addr, "Connecting TCP stream.");
    let stream = TcpStream::connect_timeout(&addr, io_timeout).map_err(|e| ProbeError::from_io(&e))?;
    stream.set_read_timeout(Some(io_timeout)).map_err(|e| ProbeError::from_io(&e))?;
    stream.set_write_timeout(Some(io_timeout)).map_err(|e| ProbeError::from_io(&e))?;

    debug!(host, "Performing TLS handshake.");
    let stream = connector
        .connect(host, stream)
        .map_err(|e| ProbeError::terminal(ErrorKind::Rejected, format!("TLS handshake failed: {e}")))?;

    match stream.peer_certificate() {
        Ok(Some(cert)) => cert
            .to_der()
            .map(Some)
            .map_err(|e| ProbeError::terminal(ErrorKind::Parse, format!("certificate to DER: {e}"))),
        Ok(None) => Ok(None),
        Err(e) => Err(ProbeError::terminal(ErrorKind::Rejected, format!("peer certificate: {e}"))),
    }
}

/// Parses a DER certificate and evaluates it for `host` at `now`.
pub fn inspect_certificate(der: &[u8], host: &str, now: DateTime<Utc>) -> Result<CertificateReport, ProbeError> {
    let (_, x509) = parse_x509_certificate(der)
        .map_err(|e| ProbeError::terminal(ErrorKind::Parse, format!("X.509 parse error: {e}")))?;

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let not_after = asn1_time_to_chrono_utc(&validity.not_after);

    let mut subject_alt_names = Vec::new();
    if let Ok(Some(san)) = x509.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                subject_alt_names.push(dns.to_ascii_lowercase());
            }
        }
    }

    let mut report = CertificateReport {
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        serial_number: x509.raw_serial_as_string(),
        version: x509.version().0 + 1,
        signature_algorithm: signature_algorithm_name(&x509.signature_algorithm.algorithm.to_id_string()),
        not_before,
        not_after,
        days_until_expiry: not_after.signed_duration_since(now).num_days(),
        is_valid: now > not_before && now < not_after,
        hostname_matches: hostname_matches(host, &subject_alt_names),
        subject_alt_names,
        findings: Vec::new(),
    };
    report.findings = analyze(&report);
    Ok(report)
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "sha1WithRSAEncryption",
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption",
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption",
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption",
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
        "1.3.101.112" => "ed25519",
        other => other,
    }
    .to_string()
}

/// Matches `host` against SAN entries, honoring single-label wildcards.
pub fn hostname_matches(host: &str, names: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    names.iter().any(|name| match name.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => *name == host,
    })
}

pub fn analyze(report: &CertificateReport) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !report.is_valid {
        debug!(expiry_date = %report.not_after, "Certificate outside its validity period.");
        findings.push(Finding::new(Severity::Critical, "SSL_EXPIRED"));
    }
    if (0..=EXPIRY_WARNING_DAYS).contains(&report.days_until_expiry) {
        debug!(days_left = report.days_until_expiry, "Certificate expiring soon.");
        findings.push(Finding::new(Severity::Warning, "SSL_EXPIRING_SOON"));
    }
    if !report.hostname_matches {
        findings.push(Finding::new(Severity::Warning, "SSL_HOSTNAME_MISMATCH"));
    }
    if report.signature_algorithm.starts_with("sha1") {
        findings.push(Finding::new(Severity::Warning, "SSL_WEAK_SIGNATURE"));
    }
    findings
}
