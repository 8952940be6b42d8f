// src/core/probes/social.rs

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::content::PageContent;
use super::to_payload;
use crate::core::models::ProbeName;
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

/// Platforms whose profile links are collected, keyed by host.
pub const SOCIAL_PLATFORMS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "pinterest.com",
    "tiktok.com",
    "threads.net",
    "reddit.com",
    "wa.me",
];

/// Which platform a host belongs to. Subdomains count (`m.facebook.com`),
/// look-alikes do not (`notx.com`).
fn platform_for(host: &str) -> Option<&'static str> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    SOCIAL_PLATFORMS
        .iter()
        .copied()
        .find(|p| host == *p || host.ends_with(&format!(".{p}")))
}

/// Canonical form of a profile link: `https://` + host without `www.` + path,
/// no query, fragment or trailing slash, lowercase.
pub fn normalize_link(link: &Url) -> Option<String> {
    let host = link.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = link.path().trim_end_matches('/').to_ascii_lowercase();
    Some(format!("https://{host}{path}"))
}

/// Groups every social anchor of `html` by platform. Relative links are
/// resolved against `base`. Platforms without links are left out.
pub fn extract(html: &str, base: Option<&Url>) -> BTreeMap<String, Vec<String>> {
    let doc = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return BTreeMap::new();
    };

    let mut found: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for anchor in doc.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else { continue };
        let resolved = match base {
            Some(base) => base.join(href.trim()),
            None => Url::parse(href.trim()),
        };
        let Ok(link) = resolved else { continue };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        let Some(platform) = link.host_str().and_then(platform_for) else { continue };
        if let Some(normalized) = normalize_link(&link) {
            found.entry(platform.to_string()).or_default().insert(normalized);
        }
    }

    found.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
}

pub struct SocialLinksProbe;

#[async_trait]
impl ProbeAdapter for SocialLinksProbe {
    fn name(&self) -> ProbeName {
        ProbeName::SocialLinks
    }

    fn dependencies(&self) -> &[ProbeName] {
        &[ProbeName::Content]
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let page: PageContent = ctx.dependency(ProbeName::Content)?;
        let base = Url::parse(&page.final_url).ok();
        let links = extract(&page.body, base.as_ref());
        debug!(platforms = links.len(), "Social links extracted.");
        // An empty map is a real answer: the page was read and links none.
        to_payload(&links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_grouped_normalized_and_deduplicated() {
        let html = r#"
            <a href="https://www.Facebook.com/ExamplePage/?ref=footer">fb</a>
            <a href="http://facebook.com/examplepage#top">fb again</a>
            <a href="https://x.com/example">x</a>
            <a href="https://notx.com/example">not social</a>
            <a href="/about">about</a>
            <a href="mailto:hi@example.test">mail</a>
            <a href="https://wa.me/15550100">chat</a>
        "#;
        let base = Url::parse("https://example.test/").unwrap();
        let links = extract(html, Some(&base));

        assert_eq!(links.len(), 3);
        assert_eq!(links["facebook.com"], vec!["https://facebook.com/examplepage"]);
        assert_eq!(links["x.com"], vec!["https://x.com/example"]);
        assert_eq!(links["wa.me"], vec!["https://wa.me/15550100"]);
    }

    #[test]
    fn pages_without_social_links_give_an_empty_map() {
        let links = extract("<html><body><a href='/contact'>Contact</a></body></html>", None);
        assert!(links.is_empty());
        assert_eq!(serde_json::to_value(&links).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn subdomains_belong_to_their_platform() {
        assert_eq!(platform_for("m.facebook.com"), Some("facebook.com"));
        assert_eq!(platform_for("www.linkedin.com"), Some("linkedin.com"));
        assert_eq!(platform_for("facebook.com.evil.test"), None);
    }
}
