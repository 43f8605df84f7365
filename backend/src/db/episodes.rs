//! Episode database repository

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::sqlite_helpers::{date_to_str, json_to_vec, now_iso8601, str_to_date_opt, vec_to_json};
use crate::library::{Episode, ShowKey};

/// Episode record from database
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub season: i32,
    pub episode: i32,
    pub name: String,
    pub airdate: Option<String>,
    pub status: String,
    pub location: Option<String>,
    pub subtitles: Vec<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for EpisodeRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let subtitles: String = row.try_get("subtitles")?;
        Ok(Self {
            season: row.try_get("season")?,
            episode: row.try_get("episode")?,
            name: row.try_get("name")?,
            airdate: row.try_get("airdate")?,
            status: row.try_get("status")?,
            location: row.try_get("location")?,
            subtitles: json_to_vec(&subtitles),
        })
    }
}

impl EpisodeRecord {
    pub fn into_episode(self) -> Result<Episode> {
        Ok(Episode {
            season: self.season,
            episode: self.episode,
            name: self.name,
            airdate: str_to_date_opt(self.airdate.as_deref()),
            status: self.status.parse()?,
            location: self.location.map(PathBuf::from),
            subtitles: self.subtitles,
        })
    }
}

/// Episodes grouped as `season -> episode -> record`
pub type SeasonEpisodes = BTreeMap<i32, BTreeMap<i32, EpisodeRecord>>;

pub struct EpisodeRepository {
    pool: SqlitePool,
}

impl EpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get all episodes for a TV show
    pub async fn list_by_show(&self, key: &ShowKey) -> Result<Vec<EpisodeRecord>> {
        let records = sqlx::query_as::<_, EpisodeRecord>(
            r#"
            SELECT season, episode, name, airdate, status, location, subtitles
            FROM tv_episodes
            WHERE indexer = ? AND indexer_id = ?
            ORDER BY season, episode
            "#,
        )
        .bind(key.indexer.id())
        .bind(i64::from(key.indexer_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Load episodes grouped by season, optionally restricted to some seasons
    pub async fn load_episodes(
        &self,
        key: &ShowKey,
        seasons: Option<&[i32]>,
    ) -> Result<SeasonEpisodes> {
        let mut grouped = SeasonEpisodes::new();
        for record in self.list_by_show(key).await? {
            if let Some(seasons) = seasons
                && !seasons.contains(&record.season)
            {
                continue;
            }
            grouped
                .entry(record.season)
                .or_default()
                .insert(record.episode, record);
        }
        Ok(grouped)
    }

    /// Write all given episodes of a show in one transaction
    pub async fn upsert_many<'a, I>(&self, key: &ShowKey, episodes: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Episode>,
    {
        let now = now_iso8601();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for ep in episodes {
            sqlx::query(
                r#"
                INSERT INTO tv_episodes (
                    indexer, indexer_id, season, episode, name, airdate,
                    status, location, subtitles, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (indexer, indexer_id, season, episode) DO UPDATE SET
                    name = excluded.name,
                    airdate = excluded.airdate,
                    status = excluded.status,
                    location = excluded.location,
                    subtitles = excluded.subtitles,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key.indexer.id())
            .bind(i64::from(key.indexer_id))
            .bind(ep.season)
            .bind(ep.episode)
            .bind(&ep.name)
            .bind(ep.airdate.map(date_to_str))
            .bind(ep.status.as_str())
            .bind(ep.location.as_ref().map(|p| p.to_string_lossy().to_string()))
            .bind(vec_to_json(&ep.subtitles))
            .bind(&now)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!("Failed to save {} S{:02}E{:02}", key, ep.season, ep.episode)
            })?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Permanently delete one episode; returns false if it didn't exist
    pub async fn delete(&self, key: &ShowKey, season: i32, episode: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM tv_episodes
            WHERE indexer = ? AND indexer_id = ? AND season = ? AND episode = ?
            "#,
        )
        .bind(key.indexer.id())
        .bind(i64::from(key.indexer_id))
        .bind(season)
        .bind(episode)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::library::{EpisodeStatus, Indexer};

    fn episode(season: i32, number: i32) -> Episode {
        Episode {
            season,
            episode: number,
            name: format!("Episode {}", number),
            airdate: chrono::NaiveDate::from_ymd_opt(2020, 1, number as u32),
            status: EpisodeStatus::Skipped,
            location: None,
            subtitles: vec!["en".to_string()],
        }
    }

    #[tokio::test]
    async fn test_load_episodes_by_season() {
        let db = Database::connect_in_memory().await.unwrap();
        let key = ShowKey::new(Indexer::TvMaze, 42);
        let episodes = vec![episode(1, 1), episode(1, 2), episode(2, 1)];
        db.episodes().upsert_many(&key, &episodes).await.unwrap();

        let all = db.episodes().load_episodes(&key, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&1].len(), 2);

        let season_two = db.episodes().load_episodes(&key, Some(&[2])).await.unwrap();
        assert_eq!(season_two.keys().copied().collect::<Vec<_>>(), vec![2]);

        let restored = season_two[&2][&1].clone().into_episode().unwrap();
        assert_eq!(restored, episode(2, 1));
    }

    #[tokio::test]
    async fn test_delete_episode() {
        let db = Database::connect_in_memory().await.unwrap();
        let key = ShowKey::new(Indexer::TvMaze, 42);
        db.episodes().upsert_many(&key, &[episode(1, 1)]).await.unwrap();

        assert!(db.episodes().delete(&key, 1, 1).await.unwrap());
        assert!(!db.episodes().delete(&key, 1, 1).await.unwrap());
        assert!(db.episodes().list_by_show(&key).await.unwrap().is_empty());
    }
}
