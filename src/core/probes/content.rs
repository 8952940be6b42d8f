// src/core/probes/content.rs

//! Fetches the target's landing page. Its payload feeds every page extractor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Finding, Severity, to_payload};
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

/// Bodies are cut at this size before they land in the report.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityHeaders {
    pub strict_transport_security: Option<String>,
    pub content_security_policy: Option<String>,
    pub x_frame_options: Option<String>,
    pub x_content_type_options: Option<String>,
}

/// The fetched page, as consumed by the extractor probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    /// Lowercase header names; repeated headers joined with ", ".
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<String>,
    pub body: String,
    pub truncated: bool,
    pub security_headers: SecurityHeaders,
    pub findings: Vec<Finding>,
}

impl PageContent {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

pub struct ContentProbe {
    client: reqwest::Client,
}

impl ContentProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<PageContent, ProbeError> {
        debug!(url, "Fetching page.");
        let response = self.client.get(url).send().await.map_err(ProbeError::from_reqwest)?;
        let status = response.status();
        info!(url, %status, "Received HTTP response.");
        if status.is_server_error() {
            return Err(ProbeError::from_status(status, format!("HTTP {status} from {url}")));
        }

        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let (bytes, truncated) = read_capped(response, MAX_BODY_BYTES).await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        let security_headers = security_headers(&headers);
        let findings = analyze_headers(&security_headers);
        Ok(PageContent {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            headers: flatten_headers(&headers),
            cookies: headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect(),
            body,
            truncated,
            security_headers,
            findings,
        })
    }
}

#[async_trait]
impl ProbeAdapter for ContentProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Content
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let https = format!("https://{}/", ctx.target);
        let page = match self.fetch(&https).await {
            Ok(page) => page,
            Err(e @ ProbeError::Transient { kind: ErrorKind::Upstream, .. }) => return Err(e),
            Err(e) => {
                warn!(target = %ctx.target, error = %e, "HTTPS fetch failed, falling back to plain HTTP.");
                self.fetch(&format!("http://{}/", ctx.target)).await?
            }
        };

        if page.body.trim().is_empty() {
            return Err(ProbeError::not_found(format!("{} returned an empty body", page.final_url)));
        }
        info!(
            url = %page.final_url,
            bytes = page.body.len(),
            findings = page.findings.len(),
            "Page fetched."
        );
        to_payload(&page)
    }
}

/// Streams the body, keeping at most `limit` bytes. Stops reading as soon as
/// the limit is passed, so oversized or endless bodies never sit in memory.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<(Vec<u8>, bool), ProbeError> {
    let mut body = Vec::with_capacity(limit.min(64 * 1024));
    while let Some(chunk) = response.chunk().await.map_err(ProbeError::from_reqwest)? {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            debug!(limit, "Body exceeds the cap, truncating.");
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("[Invalid UTF-8]");
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

/// Looks up a header, returning a placeholder for values that are not valid UTF-8.
fn check_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).map(|value| match value.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => {
            warn!(header_name = name, "Header found but contained invalid UTF-8.");
            "[Invalid UTF-8]".to_string()
        }
    })
}

pub fn security_headers(headers: &HeaderMap) -> SecurityHeaders {
    SecurityHeaders {
        strict_transport_security: check_header(headers, "strict-transport-security"),
        content_security_policy: check_header(headers, "content-security-policy"),
        x_frame_options: check_header(headers, "x-frame-options"),
        x_content_type_options: check_header(headers, "x-content-type-options"),
    }
}

pub fn analyze_headers(found: &SecurityHeaders) -> Vec<Finding> {
    let mut findings = Vec::new();
    if found.strict_transport_security.is_none() {
        findings.push(Finding::new(Severity::Warning, "HEADERS_HSTS_MISSING"));
    }
    if found.content_security_policy.is_none() {
        findings.push(Finding::new(Severity::Warning, "HEADERS_CSP_MISSING"));
    }
    if found.x_frame_options.is_none() {
        findings.push(Finding::new(Severity::Warning, "HEADERS_X_FRAME_OPTIONS_MISSING"));
    }
    if found.x_content_type_options.is_none() {
        findings.push(Finding::new(Severity::Info, "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one response that announces a huge body, sends `sent` bytes of
    /// it, then keeps the connection open without finishing.
    async fn endless_page(sent: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: 1073741824\r\n\r\n";
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&vec![b'a'; sent]).await;
            std::future::pending::<()>().await;
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn oversized_bodies_stop_at_the_cap() {
        let url = endless_page(MAX_BODY_BYTES + 512 * 1024).await;
        let probe = ContentProbe::new(reqwest::Client::new());

        let page = tokio::time::timeout(Duration::from_secs(10), probe.fetch(&url))
            .await
            .expect("fetch kept reading past the cap")
            .unwrap();
        assert!(page.truncated);
        assert_eq!(page.body.len(), MAX_BODY_BYTES);
        assert_eq!(page.status, 200);
    }

    #[test]
    fn missing_security_headers_are_reported() {
        let mut headers = HeaderMap::new();
        headers.insert("strict-transport-security", HeaderValue::from_static("max-age=63072000"));
        headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));

        let found = security_headers(&headers);
        assert_eq!(found.strict_transport_security.as_deref(), Some("max-age=63072000"));
        let codes: Vec<_> = analyze_headers(&found).into_iter().map(|f| f.code).collect();
        assert_eq!(codes, vec!["HEADERS_CSP_MISSING", "HEADERS_X_FRAME_OPTIONS_MISSING"]);
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("vary", HeaderValue::from_static("accept"));
        headers.append("vary", HeaderValue::from_static("origin"));
        headers.insert("Server", HeaderValue::from_static("nginx/1.25.3"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat["vary"], "accept, origin");
        let page = PageContent { headers: flat, ..PageContent::default() };
        assert_eq!(page.header("Server"), Some("nginx/1.25.3"));
    }
}
