// src/config.rs

//! Orchestrator configuration.
//!
//! Built once at process start and passed by `Arc` to everything that needs
//! it. Nothing in the library reads the environment on its own.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strum::IntoEnumIterator;

use crate::core::models::ProbeName;
use crate::core::probe::ProbeSettings;

const ENV_PREFIX: &str = "VANGUARD_RECON_";

/// Ports probed by the port scan unless overridden.
pub const DEFAULT_SCAN_PORTS: [u16; 21] = [
    21, 22, 23, 25, 53, 80, 110, 139, 143, 161, 389, 443, 3306, 3389, 5432, 5900, 8080, 6379, 6660, 6667, 9200,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// When the "target resolves" precondition is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionCheck {
    /// `submit` returns at once; an unresolvable target makes the job `failed`.
    #[default]
    InBackground,
    /// `submit` resolves first and rejects unresolvable targets synchronously.
    OnSubmit,
}

#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Maximum age of a completed job that may be served again.
    pub staleness_window: chrono::Duration,
    /// Probe tasks allowed to run at once within one job.
    pub max_concurrency: usize,
    /// Added to the sum of probe budgets to form the job deadline.
    pub deadline_margin: Duration,
    /// Fixed job deadline; replaces the computed one when set.
    pub job_deadline: Option<Duration>,
    pub resolution_check: ResolutionCheck,
    /// Directory for the JSON job store. In-memory store when unset.
    pub data_dir: Option<PathBuf>,
    /// Per-probe overrides of timeout and retry policy.
    pub probe_settings: BTreeMap<ProbeName, ProbeSettings>,

    pub user_agent: String,
    pub whois_url: String,
    pub geoip_url: String,
    pub mail_url: String,
    pub summarizer_url: String,
    pub summarizer_model: String,
    pub summarizer_api_key: Option<String>,
    /// Page text sent to the summarizer is cut to this many characters.
    pub summarizer_max_chars: usize,

    pub scan_ports: Vec<u16>,
    pub port_connect_timeout: Duration,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            staleness_window: chrono::Duration::days(7),
            max_concurrency: 8,
            deadline_margin: Duration::from_secs(10),
            job_deadline: None,
            resolution_check: ResolutionCheck::InBackground,
            data_dir: None,
            probe_settings: ProbeName::iter().map(|p| (p, ProbeSettings::for_probe(p))).collect(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            whois_url: "https://who-dat.as93.net".to_string(),
            geoip_url: "http://ip-api.com/json".to_string(),
            mail_url: "https://hosting-checker.net/api/hosting".to_string(),
            summarizer_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            summarizer_model: "llama-3.1-8b-instant".to_string(),
            summarizer_api_key: None,
            summarizer_max_chars: 6000,
            scan_ports: DEFAULT_SCAN_PORTS.to_vec(),
            port_connect_timeout: Duration::from_secs(1),
        }
    }
}

impl ReconConfig {
    /// Reads `VANGUARD_RECON_*` variables on top of the defaults.
    ///
    /// Unparsable numbers fall back to their default; values that would break
    /// the orchestrator (a concurrency limit of zero, a negative or overflowing
    /// staleness window) are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(days) = parse::<i64>(var("STALENESS_DAYS")) {
            config.staleness_window = chrono::Duration::try_days(days)
                .filter(|_| days >= 0)
                .ok_or_else(|| ConfigError::Invalid {
                    var: format!("{ENV_PREFIX}STALENESS_DAYS"),
                    reason: format!("{days} is not a usable number of days"),
                })?;
        }
        if let Some(raw) = var("MAX_CONCURRENCY") {
            match raw.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        var: format!("{ENV_PREFIX}MAX_CONCURRENCY"),
                        reason: "must be at least 1".into(),
                    });
                }
                Ok(n) => config.max_concurrency = n,
                Err(_) => {}
            }
        }
        config.job_deadline = parse::<u64>(var("JOB_DEADLINE_SECS")).map(Duration::from_secs);
        if let Some(secs) = parse::<u64>(var("DEADLINE_MARGIN_SECS")) {
            config.deadline_margin = Duration::from_secs(secs);
        }
        if var("RESOLVE_ON_SUBMIT").is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on")) {
            config.resolution_check = ResolutionCheck::OnSubmit;
        }
        config.data_dir = var("DATA_DIR").map(PathBuf::from);

        for (name, slot) in [
            ("WHOIS_URL", &mut config.whois_url),
            ("GEOIP_URL", &mut config.geoip_url),
            ("MAIL_URL", &mut config.mail_url),
            ("SUMMARIZER_URL", &mut config.summarizer_url),
            ("SUMMARIZER_MODEL", &mut config.summarizer_model),
            ("USER_AGENT", &mut config.user_agent),
        ] {
            if let Some(value) = var(name) {
                *slot = value.trim().trim_end_matches('/').to_string();
            }
        }
        config.summarizer_api_key = var("SUMMARIZER_API_KEY").map(|k| k.trim().to_string());

        Ok(config)
    }

    /// Timeout and retry policy for one probe.
    pub fn settings_for(&self, name: ProbeName) -> ProbeSettings {
        self.probe_settings
            .get(&name)
            .copied()
            .unwrap_or_else(|| ProbeSettings::for_probe(name))
    }

    pub fn with_probe_settings(mut self, name: ProbeName, settings: ProbeSettings) -> Self {
        self.probe_settings.insert(name, settings);
        self
    }
}

fn parse<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}
