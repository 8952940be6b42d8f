// src/core/probes/summarizer.rs

//! Asks an OpenAI-compatible chat endpoint to summarize the landing page.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::content::PageContent;
use super::to_payload;
use crate::config::ReconConfig;
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```json(.*?)```").unwrap());
static BARE_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Page text is cut to this many characters before it is sent.
    pub max_chars: usize,
}

impl SummarizerSettings {
    pub fn from_config(config: &ReconConfig) -> Self {
        Self {
            url: config.summarizer_url.clone(),
            model: config.summarizer_model.clone(),
            api_key: config.summarizer_api_key.clone(),
            max_chars: config.summarizer_max_chars,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, alias = "site category", alias = "site_category", alias = "siteCategory")]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// The readable text of a page, whitespace collapsed, at most `max_chars` characters.
pub fn visible_text(html: &str, max_chars: usize) -> String {
    let doc = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();
    collect_text(doc.root_element(), &mut words);

    let mut text = String::new();
    for word in words {
        let needed = word.chars().count() + usize::from(!text.is_empty());
        if text.chars().count() + needed > max_chars {
            break;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(word);
    }
    text
}

fn collect_text<'a>(element: ElementRef<'a>, words: &mut Vec<&'a str>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => words.extend(text.split_whitespace()),
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, words);
                }
            }
            _ => {}
        }
    }
}

/// Pulls the summary object out of the model reply: a ```json fenced block
/// when there is one, otherwise the outermost `{...}`.
pub fn parse_reply(reply: &str) -> Option<SiteSummary> {
    let candidate = FENCED_JSON
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .or_else(|| BARE_OBJECT.find(reply))?
        .as_str()
        .trim();
    serde_json::from_str::<SiteSummary>(candidate).ok().filter(|s| !s.summary.trim().is_empty())
}

fn prompt(host: &str, text: &str) -> String {
    format!(
        "Summarize the website {host} from the page text below. Answer with a ```json block \
         holding an object with the keys \"summary\" (paragraphs appended in one string), \
         \"keywords\" (array of strings) and \"site category\" (string).\n\n{text}"
    )
}

pub struct SummarizerProbe {
    client: reqwest::Client,
    settings: SummarizerSettings,
}

impl SummarizerProbe {
    pub fn new(client: reqwest::Client, settings: SummarizerSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl ProbeAdapter for SummarizerProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Summary
    }

    fn dependencies(&self) -> &[ProbeName] {
        &[ProbeName::Content]
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            return Err(ProbeError::terminal(ErrorKind::Unavailable, "no summarizer API key configured"));
        };
        let page: PageContent = ctx.dependency(ProbeName::Content)?;
        let text = visible_text(&page.body, self.settings.max_chars);
        if text.is_empty() {
            return Err(ProbeError::not_found("page has no readable text"));
        }
        debug!(chars = text.len(), model = %self.settings.model, "Requesting summary.");

        let body = json!({
            "model": self.settings.model,
            "messages": [{"role": "user", "content": prompt(ctx.target.as_str(), &text)}],
            "temperature": 1,
            "max_tokens": 1024,
        });
        let response = self
            .client
            .post(&self.settings.url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProbeError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Summarizer answered with an error status.");
            return Err(ProbeError::from_status(status, format!("HTTP {status} from summarizer")));
        }
        let chat: ChatResponse = response.json().await.map_err(ProbeError::from_reqwest)?;
        let reply = chat
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| ProbeError::terminal(ErrorKind::Parse, "summarizer reply had no content"))?;

        let summary = parse_reply(&reply)
            .ok_or_else(|| ProbeError::terminal(ErrorKind::Parse, "summarizer reply held no summary object"))?;
        info!(keywords = summary.keywords.len(), category = ?summary.category, "Summary received.");
        to_payload(&summary)
    }
}
