//! Scene exception database repository
//!
//! Stores alternate show names per season and the last refresh time of each
//! remote exception source.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::sqlite_helpers::{bool_to_int, int_to_bool};
use crate::library::Indexer;

/// Scene exception record from database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneExceptionRecord {
    pub indexer: i64,
    pub indexer_id: i64,
    pub show_name: String,
    pub season: i32,
    pub custom: bool,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SceneExceptionRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        Ok(Self {
            indexer: row.try_get("indexer")?,
            indexer_id: row.try_get("indexer_id")?,
            show_name: row.try_get("show_name")?,
            season: row.try_get("season")?,
            custom: int_to_bool(row.try_get("custom")?),
        })
    }
}

/// Input for inserting a scene exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSceneException {
    pub indexer: Indexer,
    pub indexer_id: u32,
    pub show_name: String,
    pub season: i32,
    pub custom: bool,
}

pub struct SceneExceptionRepository {
    pool: SqlitePool,
}

impl SceneExceptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All stored exceptions
    pub async fn list_all(&self) -> Result<Vec<SceneExceptionRecord>> {
        let records = sqlx::query_as::<_, SceneExceptionRecord>(
            r#"
            SELECT indexer, indexer_id, show_name, season, custom
            FROM scene_exceptions
            ORDER BY indexer_id, season, show_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Aliases stored for `(indexer_id, season)` under any indexer
    pub async fn list_slice(&self, indexer_id: u32, season: i32) -> Result<Vec<String>> {
        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT show_name
            FROM scene_exceptions
            WHERE indexer_id = ? AND season = ?
            ORDER BY show_name
            "#,
        )
        .bind(i64::from(indexer_id))
        .bind(season)
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    /// Replace every alias of one `(indexer, indexer_id, season)` slice
    pub async fn replace_slice(
        &self,
        indexer: Indexer,
        indexer_id: u32,
        season: i32,
        aliases: &[String],
        custom: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM scene_exceptions WHERE indexer = ? AND indexer_id = ? AND season = ?",
        )
        .bind(indexer.id())
        .bind(i64::from(indexer_id))
        .bind(season)
        .execute(&mut *tx)
        .await?;

        for alias in aliases {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO scene_exceptions (indexer, indexer_id, show_name, season, custom)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(indexer.id())
            .bind(i64::from(indexer_id))
            .bind(alias)
            .bind(season)
            .bind(bool_to_int(custom))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to replace scene exceptions for {}", indexer_id))?;
        Ok(())
    }

    /// Insert exceptions in one transaction, skipping ones already stored.
    /// Returns how many rows were actually new.
    pub async fn insert_batch(&self, rows: &[NewSceneException]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO scene_exceptions (indexer, indexer_id, show_name, season, custom)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.indexer.id())
            .bind(i64::from(row.indexer_id))
            .bind(&row.show_name)
            .bind(row.season)
            .bind(bool_to_int(row.custom))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to store scene exceptions")?;
        Ok(inserted)
    }

    /// Epoch seconds of the last successful refresh of a source
    pub async fn last_refresh(&self, source: &str) -> Result<Option<i64>> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_refreshed FROM scene_exceptions_refresh WHERE list = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    pub async fn set_last_refresh(&self, source: &str, epoch_secs: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scene_exceptions_refresh (list, last_refreshed)
            VALUES (?, ?)
            ON CONFLICT (list) DO UPDATE SET last_refreshed = excluded.last_refreshed
            "#,
        )
        .bind(source)
        .bind(epoch_secs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
