//! Application configuration management

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::library::{EpisodeStatus, Indexer};

/// Console log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path or `sqlite://` URL
    pub database_url: String,

    /// Root directories shows are added under; the first one is the default
    pub root_dirs: Vec<PathBuf>,

    /// Cache directory (artwork)
    pub cache_path: PathBuf,

    /// Create a show's directory when adding it and it doesn't exist
    pub create_missing_show_dirs: bool,

    /// Status given to aired episodes of newly added shows
    pub default_episode_status: EpisodeStatus,

    /// Quality profile given to newly added shows
    pub default_quality: String,

    /// Language requested from indexers
    pub indexer_language: String,

    /// Cooldown between refreshes of each scene exception source
    pub exception_refresh_interval: Duration,

    /// Custom scene exception list per indexer
    pub custom_exception_urls: HashMap<Indexer, String>,

    /// XEM base URL
    pub xem_url: String,

    /// Fetch anime aliases from the AniDB title dump
    pub anidb_enabled: bool,

    /// AniDB title dump URL
    pub anidb_titles_url: String,

    /// Optional webhook receiving library events
    pub notify_webhook_url: Option<String>,

    /// Cron expression for the daily show updater
    pub show_update_cron: String,

    /// Cron expression for the scene exception refresh
    pub exception_refresh_cron: String,

    pub log_format: LogFormat,

    /// Upper bound on how long the idle queue worker sleeps between checks
    pub queue_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/showkeeper.db".to_string());

        let root_dirs = env::var("ROOT_DIRS")
            .map(|v| parse_list(&v).into_iter().map(PathBuf::from).collect())
            .unwrap_or_else(|_| vec![PathBuf::from("./data/tv")]);

        let default_episode_status = env::var("DEFAULT_EPISODE_STATUS")
            .unwrap_or_else(|_| "skipped".to_string())
            .parse()
            .context("Invalid DEFAULT_EPISODE_STATUS")?;

        let exception_refresh_hours: u64 = env::var("EXCEPTION_REFRESH_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .context("Invalid EXCEPTION_REFRESH_HOURS")?;

        let queue_poll_interval_ms: u64 = env::var("QUEUE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("Invalid QUEUE_POLL_INTERVAL_MS")?;

        let mut custom_exception_urls = HashMap::new();
        for indexer in Indexer::ALL {
            let var = format!("CUSTOM_EXCEPTIONS_URL_{}", indexer.slug().to_uppercase());
            if let Ok(url) = env::var(&var)
                && !url.trim().is_empty()
            {
                custom_exception_urls.insert(indexer, url);
            }
        }

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Ok(Self {
            database_url,
            root_dirs,

            cache_path: env::var("CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/cache")),

            create_missing_show_dirs: env_flag("CREATE_MISSING_SHOW_DIRS", true),

            default_episode_status,

            default_quality: env::var("DEFAULT_QUALITY").unwrap_or_else(|_| "any".to_string()),

            indexer_language: env::var("INDEXER_LANGUAGE").unwrap_or_else(|_| "en".to_string()),

            exception_refresh_interval: Duration::from_secs(exception_refresh_hours * 60 * 60),

            custom_exception_urls,

            xem_url: env::var("XEM_URL").unwrap_or_else(|_| "https://thexem.info".to_string()),

            anidb_enabled: env_flag("ANIDB_ENABLED", true),

            anidb_titles_url: env::var("ANIDB_TITLES_URL").unwrap_or_else(|_| {
                "https://anidb.net/api/anime-titles.xml.gz".to_string()
            }),

            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),

            show_update_cron: env::var("SHOW_UPDATE_CRON")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            exception_refresh_cron: env::var("EXCEPTION_REFRESH_CRON")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),

            log_format,

            queue_poll_interval: Duration::from_millis(queue_poll_interval_ms),
        })
    }

    /// Default root directory for new shows
    pub fn default_root_dir(&self) -> Option<PathBuf> {
        self.root_dirs.first().cloned()
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// Split a comma or semicolon separated list, dropping empty entries
fn parse_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("/tv; /anime ,,/kids"),
            vec!["/tv".to_string(), "/anime".to_string(), "/kids".to_string()]
        );
        assert!(parse_list("  ").is_empty());
    }
}
