// src/core/probes/fingerprint.rs

//! Technology detection over the fetched page: headers, cookies, the
//! generator tag, script and stylesheet URLs, and the raw body.

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::content::PageContent;
use super::to_payload;
use crate::core::models::ProbeName;
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

/// Where a rule looks.
#[derive(Debug, Clone, Copy)]
enum Source {
    Header(&'static str),
    Cookie,
    Generator,
    ScriptSrc,
    LinkHref,
    Body,
}

/// A detection rule. The first capture group, when present, is the version.
struct Rule {
    tech: &'static str,
    category: &'static str,
    source: Source,
    pattern: Regex,
}

macro_rules! rules {
    ($( $tech:literal, $category:literal, $source:expr, $pattern:literal; )*) => {
        vec![$(
            Rule {
                tech: $tech,
                category: $category,
                source: $source,
                pattern: Regex::new($pattern).unwrap(),
            },
        )*]
    };
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use Source::*;
    rules! {
        "Nginx", "Web Server", Header("server"), r"(?i)nginx(?:/([\d.]+))?";
        "Nginx", "Web Server", Body, r"<hr><center>nginx</center>";
        "Apache", "Web Server", Header("server"), r"Apache(?:/([\d.]+))?";
        "Apache", "Web Server", Body, r"Apache Server at";
        "Microsoft IIS", "Web Server", Header("server"), r"Microsoft-IIS/([\d.]+)";
        "LiteSpeed", "Web Server", Header("server"), r"LiteSpeed";
        "Caddy", "Web Server", Header("server"), r"^Caddy";
        "Cloudflare", "CDN / WAF", Header("server"), r"(?i)cloudflare";
        "Cloudflare", "CDN / WAF", Header("cf-ray"), r".";
        "Fastly", "CDN / WAF", Header("x-served-by"), r"cache-";
        "Amazon CloudFront", "CDN / WAF", Header("via"), r"CloudFront";
        "Vercel", "Hosting", Header("x-vercel-id"), r".";
        "Netlify", "Hosting", Header("x-nf-request-id"), r".";
        "WordPress", "CMS", Generator, r"WordPress ?([\d.]+)?";
        "WordPress", "CMS", Body, r"/wp-content/|/wp-includes/";
        "Joomla", "CMS", Generator, r"Joomla!";
        "Drupal", "CMS", Generator, r"Drupal ?([\d.]+)?";
        "Drupal", "CMS", Header("x-generator"), r"Drupal ?([\d.]+)?";
        "Ghost", "CMS", Generator, r"Ghost ?([\d.]+)?";
        "Wix", "Website Builder", Generator, r"Wix\.com";
        "Squarespace", "Website Builder", Body, r"static\.squarespace\.com";
        "Shopify", "E-commerce", Header("x-shopid"), r".";
        "Shopify", "E-commerce", ScriptSrc, r"cdn\.shopify\.com";
        "Magento", "E-commerce", Cookie, r"(?i)mage-cache|magento";
        "PHP", "Language", Header("x-powered-by"), r"PHP/([\d.]+)";
        "PHP", "Language", Cookie, r"PHPSESSID";
        "ASP.NET", "Framework", Header("x-aspnet-version"), r"([\d.]+)";
        "ASP.NET", "Framework", Header("x-powered-by"), r"ASP\.NET";
        "Java", "Language", Cookie, r"JSESSIONID";
        "Django", "Framework", Cookie, r"csrftoken";
        "Ruby on Rails", "Framework", Cookie, r"_rails_session|_session_id";
        "Express", "Framework", Header("x-powered-by"), r"^Express$";
        "Next.js", "JS Framework", Header("x-powered-by"), r"Next\.js ?([\d.]+)?";
        "Next.js", "JS Framework", ScriptSrc, r"/_next/static/";
        "Nuxt.js", "JS Framework", Body, r"__NUXT__|/_nuxt/";
        "Angular", "JS Framework", Body, r#"ng-version="([\d.]+)""#;
        "Svelte", "JS Framework", Body, r#"class=["'][^"']*svelte-"#;
        "Gatsby", "JS Framework", Body, r#"id=["']___gatsby["']"#;
        "Astro", "JS Framework", Generator, r"Astro v([\d.]+)";
        "React", "JS Library", Body, r"react-dom|data-reactroot|react\.production";
        "Vue.js", "JS Library", Body, r"data-v-app|__VUE__|data-v-[0-9a-f]{8}";
        "jQuery", "JS Library", ScriptSrc, r"jquery[-.]?([\d.]+\d)?(?:\.slim)?(?:\.min)?\.js";
        "Bootstrap", "UI Framework", LinkHref, r"bootstrap(?:@([\d.]+\d))?[^\s]*\.css";
        "Tailwind CSS", "UI Framework", LinkHref, r"tailwind";
        "Font Awesome", "UI Framework", LinkHref, r"font-?awesome";
        "Google Analytics", "Analytics", ScriptSrc, r"google-analytics\.com/|googletagmanager\.com/";
        "Google Tag Manager", "Tag Manager", Body, r"googletagmanager\.com/gtm\.js";
        "Hotjar", "Analytics", Body, r"static\.hotjar\.com";
        "reCAPTCHA", "Security", ScriptSrc, r"google\.com/recaptcha";
    }
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub version: Option<String>,
}

/// Everything a rule may look at, extracted once per page.
struct Evidence<'a> {
    page: &'a PageContent,
    cookies: String,
    generator: Option<String>,
    scripts: Vec<String>,
    stylesheets: Vec<String>,
}

impl<'a> Evidence<'a> {
    fn gather(page: &'a PageContent) -> Self {
        let doc = Html::parse_document(&page.body);
        let attrs = |css: &str, attr: &str| -> Vec<String> {
            match Selector::parse(css) {
                Ok(sel) => doc.select(&sel).filter_map(|el| el.value().attr(attr).map(str::to_string)).collect(),
                Err(e) => {
                    warn!(selector = css, error = ?e, "Invalid selector.");
                    Vec::new()
                }
            }
        };
        let generator = attrs("meta[name='generator']", "content").into_iter().next();
        let scripts = attrs("script[src]", "src");
        let stylesheets = attrs("link[href]", "href");
        Self { page, cookies: page.cookies.join("; "), generator, scripts, stylesheets }
    }

    /// Candidate texts for a source.
    fn texts(&self, source: Source) -> Vec<&str> {
        match source {
            Source::Header(name) => self.page.header(name).into_iter().collect(),
            Source::Cookie => vec![self.cookies.as_str()],
            Source::Generator => self.generator.as_deref().into_iter().collect(),
            Source::ScriptSrc => self.scripts.iter().map(String::as_str).collect(),
            Source::LinkHref => self.stylesheets.iter().map(String::as_str).collect(),
            Source::Body => vec![self.page.body.as_str()],
        }
    }
}

/// Runs every rule against the page. One entry per technology, sorted by
/// name; a version found by any matching rule wins over none.
pub fn detect(page: &PageContent) -> Vec<Technology> {
    let evidence = Evidence::gather(page);
    let mut found: BTreeMap<&str, Technology> = BTreeMap::new();

    for rule in RULES.iter() {
        let hit = evidence.texts(rule.source).into_iter().find_map(|text| {
            rule.pattern
                .captures(text)
                .map(|caps| caps.get(1).map(|m| m.as_str().to_string()).filter(|v| !v.is_empty()))
        });
        let Some(version) = hit else { continue };
        debug!(tech = rule.tech, version = ?version, "Rule matched.");

        let entry = found.entry(rule.tech).or_insert_with(|| Technology {
            name: rule.tech.to_string(),
            category: rule.category.to_string(),
            version: None,
        });
        if entry.version.is_none() {
            entry.version = version;
        }
    }
    found.into_values().collect()
}

pub struct FingerprintProbe;

#[async_trait]
impl ProbeAdapter for FingerprintProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Technologies
    }

    fn dependencies(&self) -> &[ProbeName] {
        &[ProbeName::Content]
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let page: PageContent = ctx.dependency(ProbeName::Content)?;
        let technologies = detect(&page);
        debug!(total_rules = RULES.len(), count = technologies.len(), "Fingerprinting finished.");
        to_payload(&technologies)
    }
}
