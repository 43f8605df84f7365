//! TVMaze API client for TV show metadata
//!
//! TVMaze is a free API that doesn't require authentication.
//! Base URL: https://api.tvmaze.com
//!
//! Besides its own ids, TVMaze can resolve TheTVDB ids, so the same client
//! backs both indexers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::indexer::{IndexerApi, IndexerEpisode, IndexerError, IndexerShow, RatingsProvider};
use crate::library::{Indexer, ShowKey};

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// TVMaze API client
pub struct TvMazeClient {
    client: Client,
    base_url: String,
}

/// Show details from TVMaze
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeShow {
    pub id: u32,
    pub name: String,
    pub language: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub status: Option<String>,
    pub runtime: Option<u32>,
    #[serde(rename = "averageRuntime")]
    pub average_runtime: Option<u32>,
    pub network: Option<TvMazeNetwork>,
    #[serde(rename = "webChannel")]
    pub web_channel: Option<TvMazeNetwork>,
    pub image: Option<TvMazeImage>,
    pub summary: Option<String>,
    pub rating: Option<TvMazeRating>,
    pub externals: Option<TvMazeExternals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeNetwork {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeImage {
    pub medium: Option<String>,
    pub original: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeRating {
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeExternals {
    pub tvrage: Option<u32>,
    pub thetvdb: Option<u32>,
    pub imdb: Option<String>,
}

/// Episode from TVMaze
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeEpisode {
    pub id: u32,
    pub name: Option<String>,
    pub season: u32,
    pub number: Option<u32>,
    pub airdate: Option<String>,
}

impl TvMazeClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.tvmaze.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get show details by TVMaze ID, `None` if TVMaze doesn't know it
    pub async fn get_show(&self, tvmaze_id: u32) -> Result<Option<TvMazeShow>> {
        info!(tvmaze_id = tvmaze_id, "Fetching show from TVMaze");

        let url = format!("{}/shows/{}", self.base_url, tvmaze_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch show from TVMaze")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            anyhow::bail!("TVMaze get show failed with status: {}", response.status());
        }

        let show: TvMazeShow = response
            .json()
            .await
            .context("Failed to parse TVMaze show")?;

        Ok(Some(show))
    }

    /// Get all episodes for a show
    pub async fn get_episodes(&self, tvmaze_id: u32) -> Result<Vec<TvMazeEpisode>> {
        info!(tvmaze_id = tvmaze_id, "Fetching episodes from TVMaze");

        let url = format!("{}/shows/{}/episodes", self.base_url, tvmaze_id);
        let response = self
            .client
            .get(&url)
            .query(&[("specials", "1")])
            .send()
            .await
            .context("Failed to fetch episodes from TVMaze")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "TVMaze get episodes failed with status: {}",
                response.status()
            );
        }

        let episodes: Vec<TvMazeEpisode> = response
            .json()
            .await
            .context("Failed to parse TVMaze episodes")?;

        debug!(count = episodes.len(), "TVMaze returned episodes");
        Ok(episodes)
    }

    /// Look up show by TVDB ID
    pub async fn lookup_by_tvdb(&self, tvdb_id: u32) -> Result<Option<TvMazeShow>> {
        self.lookup(&[("thetvdb", tvdb_id.to_string())]).await
    }

    /// Look up show by IMDB ID
    pub async fn lookup_by_imdb(&self, imdb_id: &str) -> Result<Option<TvMazeShow>> {
        self.lookup(&[("imdb", imdb_id.to_string())]).await
    }

    async fn lookup(&self, query: &[(&str, String)]) -> Result<Option<TvMazeShow>> {
        let url = format!("{}/lookup/shows", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .context("Failed to look up show on TVMaze")?;

        if response.status().is_client_error() {
            return Ok(None);
        }

        if !response.status().is_success() {
            anyhow::bail!("TVMaze lookup failed with status: {}", response.status());
        }

        let show: TvMazeShow = response
            .json()
            .await
            .context("Failed to parse TVMaze show")?;

        Ok(Some(show))
    }
}

impl Default for TvMazeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TvMazeShow {
    /// Get the network name
    pub fn network_name(&self) -> Option<&str> {
        self.network
            .as_ref()
            .or(self.web_channel.as_ref())
            .map(|n| n.name.as_str())
    }

    /// Get clean summary (strip HTML tags)
    pub fn clean_summary(&self) -> Option<String> {
        self.summary
            .as_ref()
            .map(|s| HTML_TAG.replace_all(s, "").trim().to_string())
    }

    /// Get IMDB ID if available
    pub fn imdb_id(&self) -> Option<&str> {
        self.externals.as_ref().and_then(|e| e.imdb.as_deref())
    }
}

/// Convert TVMaze data into the indexer-neutral form.
///
/// Episodes without a number (unnumbered specials) are dropped.
pub fn to_indexer_show(show: &TvMazeShow, episodes: &[TvMazeEpisode]) -> IndexerShow {
    IndexerShow {
        name: show.name.clone(),
        language: show.language.clone(),
        status: show.status.clone(),
        network: show.network_name().map(str::to_string),
        genres: show.genres.clone(),
        runtime: show.runtime.or(show.average_runtime),
        imdb_id: show.imdb_id().map(str::to_string),
        poster_url: show
            .image
            .as_ref()
            .and_then(|i| i.original.clone().or_else(|| i.medium.clone())),
        fanart_url: None,
        episodes: episodes
            .iter()
            .filter_map(|ep| {
                Some(IndexerEpisode {
                    season: i32::try_from(ep.season).ok()?,
                    episode: i32::try_from(ep.number?).ok()?,
                    name: ep.name.clone().unwrap_or_default(),
                    airdate: ep
                        .airdate
                        .as_deref()
                        .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
                })
            })
            .collect(),
    }
}

/// [`IndexerApi`] backed by TVMaze, for either TVMaze or TheTVDB ids
pub struct TvMazeIndexer {
    client: Arc<TvMazeClient>,
    indexer: Indexer,
}

impl TvMazeIndexer {
    pub fn new(client: Arc<TvMazeClient>, indexer: Indexer) -> Self {
        Self { client, indexer }
    }

    fn transport(&self, e: anyhow::Error) -> IndexerError {
        IndexerError::Transport {
            indexer: self.indexer,
            message: format!("{:#}", e),
        }
    }
}

#[async_trait]
impl IndexerApi for TvMazeIndexer {
    async fn load_show(&self, key: &ShowKey, _language: &str) -> Result<IndexerShow, IndexerError> {
        let show = match key.indexer {
            Indexer::TvMaze => self.client.get_show(key.indexer_id).await,
            Indexer::Tvdb => self.client.lookup_by_tvdb(key.indexer_id).await,
            Indexer::Tmdb => Ok(None),
        }
        .map_err(|e| self.transport(e))?;

        let show = show.ok_or_else(|| IndexerError::AttributeNotFound {
            indexer: self.indexer,
            key: *key,
            attribute: "show".to_string(),
        })?;

        let episodes = self
            .client
            .get_episodes(show.id)
            .await
            .map_err(|e| self.transport(e))?;

        let data = to_indexer_show(&show, &episodes);
        if data.name.trim().is_empty() {
            return Err(IndexerError::ShowIncomplete {
                indexer: self.indexer,
                key: *key,
                reason: "show has no name".to_string(),
            });
        }
        Ok(data)
    }
}

#[async_trait]
impl RatingsProvider for TvMazeClient {
    async fn load_rating(&self, imdb_id: &str) -> Result<Option<f64>> {
        let show = self.lookup_by_imdb(imdb_id).await?;
        Ok(show.and_then(|s| s.rating).and_then(|r| r.average))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_JSON: &str = r#"{
        "id": 82,
        "name": "Game of Thrones",
        "language": "English",
        "genres": ["Drama", "Fantasy"],
        "status": "Ended",
        "runtime": 60,
        "averageRuntime": 61,
        "network": {"id": 8, "name": "HBO", "country": {"name": "United States", "code": "US"}},
        "webChannel": null,
        "image": {"medium": "https://img/medium.jpg", "original": "https://img/original.jpg"},
        "summary": "<p>Seven noble families fight.</p>",
        "rating": {"average": 8.9},
        "externals": {"tvrage": 24493, "thetvdb": 121361, "imdb": "tt0944947"}
    }"#;

    const EPISODES_JSON: &str = r#"[
        {"id": 4952, "name": "Winter is Coming", "season": 1, "number": 1, "airdate": "2011-04-17"},
        {"id": 4953, "name": "The Kingsroad", "season": 1, "number": 2, "airdate": ""},
        {"id": 9999, "name": "Special", "season": 1, "number": null, "airdate": "2011-05-01"}
    ]"#;

    #[test]
    fn test_to_indexer_show() {
        let show: TvMazeShow = serde_json::from_str(SHOW_JSON).unwrap();
        let episodes: Vec<TvMazeEpisode> = serde_json::from_str(EPISODES_JSON).unwrap();

        let data = to_indexer_show(&show, &episodes);
        assert_eq!(data.name, "Game of Thrones");
        assert_eq!(data.network.as_deref(), Some("HBO"));
        assert_eq!(data.imdb_id.as_deref(), Some("tt0944947"));
        assert_eq!(data.poster_url.as_deref(), Some("https://img/original.jpg"));
        assert_eq!(data.episodes.len(), 2);
        assert_eq!(data.episodes[1].airdate, None);
        assert_eq!(show.clean_summary().as_deref(), Some("Seven noble families fight."));
    }
}
