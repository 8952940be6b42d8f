// src/core/probes/metadata.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::content::PageContent;
use super::to_payload;
use crate::core::models::ProbeName;
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub author: Option<String>,
    pub viewport: Option<String>,
    pub charset: Option<String>,
    pub robots: Option<String>,
    pub canonical: Option<String>,
    pub favicon: Option<String>,
    pub language: Option<String>,
    pub generator: Option<String>,
    pub open_graph: BTreeMap<String, String>,
    pub twitter: BTreeMap<String, String>,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_attr(doc: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    doc.select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `<meta>` content by attribute value, compared case-insensitively.
fn meta_by(doc: &Html, attr: &str, value: &str) -> Option<String> {
    let sel = selector(&format!("meta[{attr}]"))?;
    doc.select(&sel)
        .find(|el| el.value().attr(attr).is_some_and(|v| v.trim().eq_ignore_ascii_case(value)))
        .and_then(|el| el.value().attr("content"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn meta_name(doc: &Html, name: &str) -> Option<String> {
    meta_by(doc, "name", name)
}

/// Collects `<meta>` tags whose `attr` starts with `prefix`.
fn prefixed_meta(doc: &Html, attr: &str, prefix: &str) -> BTreeMap<String, String> {
    let Some(sel) = selector(&format!("meta[{attr}^='{prefix}']")) else {
        return BTreeMap::new();
    };
    doc.select(&sel)
        .filter_map(|el| Some((el.value().attr(attr)?.to_string(), el.value().attr("content")?.to_string())))
        .collect()
}

/// Pulls the head metadata out of an HTML document.
pub fn extract(html: &str) -> PageMetadata {
    let doc = Html::parse_document(html);

    let title = selector("title")
        .and_then(|sel| doc.select(&sel).next().map(|t| t.text().collect::<String>()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty());

    let charset = first_attr(&doc, "meta[charset]", "charset").or_else(|| {
        meta_by(&doc, "http-equiv", "content-type").and_then(|c| {
            c.split(';')
                .find_map(|part| part.trim().strip_prefix("charset=").map(str::to_string))
        })
    });

    PageMetadata {
        title,
        description: meta_name(&doc, "description"),
        keywords: meta_name(&doc, "keywords"),
        author: meta_name(&doc, "author"),
        viewport: meta_name(&doc, "viewport"),
        charset,
        robots: meta_name(&doc, "robots"),
        canonical: first_attr(&doc, "link[rel='canonical']", "href"),
        favicon: first_attr(&doc, "link[rel~='icon']", "href"),
        language: first_attr(&doc, "html[lang]", "lang"),
        generator: meta_name(&doc, "generator"),
        open_graph: prefixed_meta(&doc, "property", "og:"),
        twitter: prefixed_meta(&doc, "name", "twitter:"),
    }
}

pub struct MetadataProbe;

#[async_trait]
impl ProbeAdapter for MetadataProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Metadata
    }

    fn dependencies(&self) -> &[ProbeName] {
        &[ProbeName::Content]
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let page: PageContent = ctx.dependency(ProbeName::Content)?;
        let metadata = extract(&page.body);
        debug!(title = ?metadata.title, og_tags = metadata.open_graph.len(), "Metadata extracted.");
        to_payload(&metadata)
    }
}
