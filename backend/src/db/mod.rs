//! Database connection and operations

pub mod episodes;
pub mod scene_exceptions;
pub mod sqlite_helpers;
pub mod tv_shows;

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::warn;

pub use episodes::{EpisodeRecord, EpisodeRepository, SeasonEpisodes};
pub use scene_exceptions::{NewSceneException, SceneExceptionRecord, SceneExceptionRepository};
pub use tv_shows::{TvShowRecord, TvShowRepository};

use crate::library::Show;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if needed) the SQLite database at `url` and run migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            if let Some(parent) = std::path::Path::new(url).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            format!("sqlite://{}", url)
        };

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid database url {}", url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database with migrations applied.
    ///
    /// Uses a single connection that never expires, since every new SQLite
    /// memory connection would see an empty database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a TV show repository
    pub fn tv_shows(&self) -> TvShowRepository {
        TvShowRepository::new(self.pool.clone())
    }

    /// Get an episode repository
    pub fn episodes(&self) -> EpisodeRepository {
        EpisodeRepository::new(self.pool.clone())
    }

    /// Get a scene exception repository
    pub fn scene_exceptions(&self) -> SceneExceptionRepository {
        SceneExceptionRepository::new(self.pool.clone())
    }

    /// Persist a show's attributes, then its episodes.
    ///
    /// Each half is its own transaction.
    pub async fn save_show(&self, show: &Show) -> Result<()> {
        self.tv_shows().upsert(show).await?;
        self.episodes()
            .upsert_many(&show.key, show.episodes.values())
            .await?;
        Ok(())
    }

    /// Load every show with its episodes.
    ///
    /// Rows that fail to convert are logged and skipped.
    pub async fn load_library(&self) -> Result<Vec<Show>> {
        let mut shows = Vec::new();
        for record in self.tv_shows().list_all().await? {
            let name = record.name.clone();
            let mut show = match record.into_show() {
                Ok(show) => show,
                Err(e) => {
                    warn!(show = %name, error = %e, "Skipping unreadable show row");
                    continue;
                }
            };
            for ep in self.episodes().list_by_show(&show.key).await? {
                match ep.into_episode() {
                    Ok(ep) => {
                        show.episodes.insert((ep.season, ep.episode), ep);
                    }
                    Err(e) => warn!(show = %show.key, error = %e, "Skipping unreadable episode row"),
                }
            }
            shows.push(show);
        }
        Ok(shows)
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
