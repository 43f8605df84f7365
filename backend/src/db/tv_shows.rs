//! TV Show database repository

use std::path::PathBuf;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::sqlite_helpers::{bool_to_int, int_to_bool, json_to_vec, now_iso8601, vec_to_json};
use crate::library::{Indexer, Show, ShowFlags, ShowKey};

/// TV Show record from database
#[derive(Debug, Clone)]
pub struct TvShowRecord {
    pub indexer: i64,
    pub indexer_id: i64,
    pub name: String,
    pub location: String,
    pub language: String,
    pub default_ep_status: String,
    pub quality: String,
    pub paused: bool,
    pub anime: bool,
    pub scene: bool,
    pub subtitles: bool,
    pub season_folders: bool,
    pub status: Option<String>,
    pub network: Option<String>,
    pub genres: Vec<String>,
    pub runtime: Option<i64>,
    pub imdb_id: Option<String>,
    pub rating: Option<f64>,
    pub poster_url: Option<String>,
    pub fanart_url: Option<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for TvShowRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let genres: String = row.try_get("genres")?;
        Ok(Self {
            indexer: row.try_get("indexer")?,
            indexer_id: row.try_get("indexer_id")?,
            name: row.try_get("name")?,
            location: row.try_get("location")?,
            language: row.try_get("language")?,
            default_ep_status: row.try_get("default_ep_status")?,
            quality: row.try_get("quality")?,
            paused: int_to_bool(row.try_get("paused")?),
            anime: int_to_bool(row.try_get("anime")?),
            scene: int_to_bool(row.try_get("scene")?),
            subtitles: int_to_bool(row.try_get("subtitles")?),
            season_folders: int_to_bool(row.try_get("season_folders")?),
            status: row.try_get("status")?,
            network: row.try_get("network")?,
            genres: json_to_vec(&genres),
            runtime: row.try_get("runtime")?,
            imdb_id: row.try_get("imdb_id")?,
            rating: row.try_get("rating")?,
            poster_url: row.try_get("poster_url")?,
            fanart_url: row.try_get("fanart_url")?,
        })
    }
}

impl TvShowRecord {
    pub fn key(&self) -> Result<ShowKey> {
        let indexer = Indexer::from_id(self.indexer)
            .with_context(|| format!("Unknown indexer id {}", self.indexer))?;
        let indexer_id = u32::try_from(self.indexer_id)
            .with_context(|| format!("Invalid indexer_id {}", self.indexer_id))?;
        Ok(ShowKey::new(indexer, indexer_id))
    }

    /// Build a show without episodes
    pub fn into_show(self) -> Result<Show> {
        let key = self.key()?;
        let mut show = Show::new(key, self.name, PathBuf::from(self.location));
        show.language = self.language;
        show.default_ep_status = self.default_ep_status.parse()?;
        show.quality = self.quality;
        show.flags = ShowFlags {
            paused: self.paused,
            anime: self.anime,
            scene: self.scene,
            subtitles: self.subtitles,
            season_folders: self.season_folders,
        };
        show.status = self.status;
        show.network = self.network;
        show.genres = self.genres;
        show.runtime = self.runtime.and_then(|r| u32::try_from(r).ok());
        show.imdb_id = self.imdb_id;
        show.rating = self.rating;
        show.poster_url = self.poster_url;
        show.fanart_url = self.fanart_url;
        Ok(show)
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT indexer, indexer_id, name, location, language, default_ep_status,
           quality, paused, anime, scene, subtitles, season_folders, status,
           network, genres, runtime, imdb_id, rating, poster_url, fanart_url
    FROM tv_shows
"#;

pub struct TvShowRepository {
    pool: SqlitePool,
}

impl TvShowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get all TV shows
    pub async fn list_all(&self) -> Result<Vec<TvShowRecord>> {
        let records = sqlx::query_as::<_, TvShowRecord>(&format!(
            "{} ORDER BY name COLLATE NOCASE",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get a TV show by its identity
    pub async fn get(&self, key: &ShowKey) -> Result<Option<TvShowRecord>> {
        let record = sqlx::query_as::<_, TvShowRecord>(&format!(
            "{} WHERE indexer = ? AND indexer_id = ?",
            SELECT_COLUMNS
        ))
        .bind(key.indexer.id())
        .bind(i64::from(key.indexer_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert or update the show attributes (episodes are stored separately)
    pub async fn upsert(&self, show: &Show) -> Result<()> {
        let now = now_iso8601();
        sqlx::query(
            r#"
            INSERT INTO tv_shows (
                indexer, indexer_id, name, location, language, default_ep_status,
                quality, paused, anime, scene, subtitles, season_folders, status,
                network, genres, runtime, imdb_id, rating, poster_url, fanart_url,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (indexer, indexer_id) DO UPDATE SET
                name = excluded.name,
                location = excluded.location,
                language = excluded.language,
                default_ep_status = excluded.default_ep_status,
                quality = excluded.quality,
                paused = excluded.paused,
                anime = excluded.anime,
                scene = excluded.scene,
                subtitles = excluded.subtitles,
                season_folders = excluded.season_folders,
                status = excluded.status,
                network = excluded.network,
                genres = excluded.genres,
                runtime = excluded.runtime,
                imdb_id = excluded.imdb_id,
                rating = excluded.rating,
                poster_url = excluded.poster_url,
                fanart_url = excluded.fanart_url,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(show.key.indexer.id())
        .bind(i64::from(show.key.indexer_id))
        .bind(&show.name)
        .bind(show.location.to_string_lossy().to_string())
        .bind(&show.language)
        .bind(show.default_ep_status.as_str())
        .bind(&show.quality)
        .bind(bool_to_int(show.flags.paused))
        .bind(bool_to_int(show.flags.anime))
        .bind(bool_to_int(show.flags.scene))
        .bind(bool_to_int(show.flags.subtitles))
        .bind(bool_to_int(show.flags.season_folders))
        .bind(&show.status)
        .bind(&show.network)
        .bind(vec_to_json(&show.genres))
        .bind(show.runtime.map(i64::from))
        .bind(&show.imdb_id)
        .bind(show.rating)
        .bind(&show.poster_url)
        .bind(&show.fanart_url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save show {}", show.key))?;

        Ok(())
    }

    /// Delete a show and all of its episodes in one transaction
    pub async fn delete(&self, key: &ShowKey) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tv_episodes WHERE indexer = ? AND indexer_id = ?")
            .bind(key.indexer.id())
            .bind(i64::from(key.indexer_id))
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM tv_shows WHERE indexer = ? AND indexer_id = ?")
            .bind(key.indexer.id())
            .bind(i64::from(key.indexer_id))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::library::EpisodeStatus;

    #[tokio::test]
    async fn test_upsert_and_reload() {
        let db = Database::connect_in_memory().await.unwrap();
        let key = ShowKey::new(Indexer::Tvdb, 81189);
        let mut show = Show::new(key, "Breaking Bad", "/tv/Breaking Bad");
        show.default_ep_status = EpisodeStatus::Wanted;
        show.genres = vec!["Drama".to_string()];
        show.flags.anime = true;

        db.tv_shows().upsert(&show).await.unwrap();
        show.name = "Breaking Bad (2008)".to_string();
        db.tv_shows().upsert(&show).await.unwrap();

        let all = db.tv_shows().list_all().await.unwrap();
        assert_eq!(all.len(), 1);

        let loaded = all.into_iter().next().unwrap().into_show().unwrap();
        assert_eq!(loaded, show);
    }

    #[tokio::test]
    async fn test_delete_missing_show() {
        let db = Database::connect_in_memory().await.unwrap();
        let deleted = db
            .tv_shows()
            .delete(&ShowKey::new(Indexer::TvMaze, 5))
            .await
            .unwrap();
        assert!(!deleted);
    }
}
