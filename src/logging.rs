// src/logging.rs

//! File logging for the terminal front-end. The library only emits events;
//! this subscriber is installed once by the binary.

use std::path::PathBuf;

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use time::UtcOffset;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", *PROJECT_NAME);
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "vanguard-rs", env!("CARGO_PKG_NAME"))
}

/// Where the log file and, by default, persisted jobs live.
pub fn get_data_dir() -> PathBuf {
    match project_directory() {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => PathBuf::from(".").join(".data"),
    }
}

/// `RUST_LOG`, else `VANGUARD_RECON_LOGLEVEL`, else info for this crate.
fn filter_directive(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("RUST_LOG")
        .or_else(|| lookup(&LOG_ENV))
        .unwrap_or_else(|| format!("{}=info", env!("CARGO_CRATE_NAME")))
}

/// Installs the file subscriber. Call once, before the runtime is busy, so
/// the local offset can still be read.
pub fn initialize_logging() -> Result<PathBuf> {
    let directory = get_data_dir();
    std::fs::create_dir_all(&directory)?;
    let log_path = directory.join(LOG_FILE.as_str());
    let log_file = std::fs::File::create(&log_path)?;

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(offset, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"));

    let file_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_timer(timer)
        .with_target(false)
        .with_ansi(false)
        .with_filter(EnvFilter::new(filter_directive(|var| std::env::var(var).ok())));

    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_the_crate() {
        assert_eq!(PROJECT_NAME.as_str(), "VANGUARD_RECON");
        assert_eq!(LOG_ENV.as_str(), "VANGUARD_RECON_LOGLEVEL");
        assert_eq!(LOG_FILE.as_str(), "vanguard-recon.log");
    }

    #[test]
    fn rust_log_wins_over_the_project_variable() {
        let both = |var: &str| match var {
            "RUST_LOG" => Some("debug".to_string()),
            "VANGUARD_RECON_LOGLEVEL" => Some("warn".to_string()),
            _ => None,
        };
        assert_eq!(filter_directive(both), "debug");

        let project_only = |var: &str| (var == "VANGUARD_RECON_LOGLEVEL").then(|| "warn".to_string());
        assert_eq!(filter_directive(project_only), "warn");
        assert_eq!(filter_directive(|_| None), "vanguard_recon=info");
    }
}
