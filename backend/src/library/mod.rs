//! Library domain model
//!
//! Shows, episodes and the identifiers used to address them. The in-memory
//! show list lives in [`LibraryContext`]; the database is the durable copy.

pub mod context;
pub mod name_cache;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::services::indexer::{IndexerEpisode, IndexerShow};

pub use context::{ExceptionTarget, LibraryContext};
pub use name_cache::NameCache;

/// Season number meaning "applies to every season"
pub const ALL_SEASONS: i32 = -1;

/// External metadata provider a show is keyed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indexer {
    Tvdb,
    #[serde(rename = "tvmaze")]
    TvMaze,
    Tmdb,
}

impl Indexer {
    pub const ALL: [Indexer; 3] = [Indexer::Tvdb, Indexer::TvMaze, Indexer::Tmdb];

    /// Numeric id used in the database
    pub fn id(&self) -> i64 {
        match self {
            Indexer::Tvdb => 1,
            Indexer::TvMaze => 3,
            Indexer::Tmdb => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Indexer::Tvdb),
            3 => Some(Indexer::TvMaze),
            4 => Some(Indexer::Tmdb),
            _ => None,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Indexer::Tvdb => "tvdb",
            Indexer::TvMaze => "tvmaze",
            Indexer::Tmdb => "tmdb",
        }
    }

    /// Origin name understood by the XEM mapping service
    pub fn xem_origin(&self) -> Option<&'static str> {
        match self {
            Indexer::Tvdb => Some("tvdb"),
            _ => None,
        }
    }
}

impl fmt::Display for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Indexer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tvdb" => Ok(Indexer::Tvdb),
            "tvmaze" => Ok(Indexer::TvMaze),
            "tmdb" => Ok(Indexer::Tmdb),
            other => Err(anyhow!("Unknown indexer '{}'", other)),
        }
    }
}

/// Identity of a show: unique per `(indexer, indexer_id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShowKey {
    pub indexer: Indexer,
    pub indexer_id: u32,
}

impl ShowKey {
    pub fn new(indexer: Indexer, indexer_id: u32) -> Self {
        Self { indexer, indexer_id }
    }
}

impl fmt::Display for ShowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.indexer.slug(), self.indexer_id)
    }
}

/// Episode status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Unaired,
    Skipped,
    Wanted,
    Snatched,
    Downloaded,
    Archived,
    Ignored,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Unaired => "unaired",
            EpisodeStatus::Skipped => "skipped",
            EpisodeStatus::Wanted => "wanted",
            EpisodeStatus::Snatched => "snatched",
            EpisodeStatus::Downloaded => "downloaded",
            EpisodeStatus::Archived => "archived",
            EpisodeStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unaired" => Ok(EpisodeStatus::Unaired),
            "skipped" => Ok(EpisodeStatus::Skipped),
            "wanted" => Ok(EpisodeStatus::Wanted),
            "snatched" => Ok(EpisodeStatus::Snatched),
            "downloaded" => Ok(EpisodeStatus::Downloaded),
            "archived" => Ok(EpisodeStatus::Archived),
            "ignored" => Ok(EpisodeStatus::Ignored),
            other => Err(anyhow!("Unknown episode status '{}'", other)),
        }
    }
}

/// Per-show behaviour flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowFlags {
    pub paused: bool,
    pub anime: bool,
    pub scene: bool,
    pub subtitles: bool,
    pub season_folders: bool,
}

/// A single episode of a show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub season: i32,
    pub episode: i32,
    pub name: String,
    pub airdate: Option<NaiveDate>,
    pub status: EpisodeStatus,
    pub location: Option<PathBuf>,
    pub subtitles: Vec<String>,
}

impl Episode {
    /// Status a freshly discovered episode starts with
    pub fn initial_status(
        season: i32,
        airdate: Option<NaiveDate>,
        default_status: EpisodeStatus,
        today: NaiveDate,
    ) -> EpisodeStatus {
        if season == 0 {
            return EpisodeStatus::Skipped;
        }
        match airdate {
            Some(date) if date <= today => default_status,
            _ => EpisodeStatus::Unaired,
        }
    }
}

/// A show in the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub key: ShowKey,
    pub name: String,
    pub location: PathBuf,
    pub language: String,
    pub default_ep_status: EpisodeStatus,
    pub quality: String,
    pub flags: ShowFlags,
    pub status: Option<String>,
    pub network: Option<String>,
    pub genres: Vec<String>,
    pub runtime: Option<u32>,
    pub imdb_id: Option<String>,
    pub rating: Option<f64>,
    pub poster_url: Option<String>,
    pub fanart_url: Option<String>,
    /// Episodes keyed by `(season, episode)`
    pub episodes: BTreeMap<(i32, i32), Episode>,
}

impl Show {
    pub fn new(key: ShowKey, name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            key,
            name: name.into(),
            location: location.into(),
            language: "en".to_string(),
            default_ep_status: EpisodeStatus::Skipped,
            quality: "any".to_string(),
            flags: ShowFlags {
                season_folders: true,
                ..Default::default()
            },
            status: None,
            network: None,
            genres: Vec::new(),
            runtime: None,
            imdb_id: None,
            rating: None,
            poster_url: None,
            fanart_url: None,
            episodes: BTreeMap::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("ended"))
    }

    /// Copy show level attributes from a fresh indexer response
    pub fn apply_indexer_data(&mut self, data: &IndexerShow) {
        if !data.name.trim().is_empty() {
            self.name = data.name.clone();
        }
        self.status = data.status.clone();
        self.network = data.network.clone();
        self.genres = data.genres.clone();
        self.runtime = data.runtime;
        if data.imdb_id.is_some() {
            self.imdb_id = data.imdb_id.clone();
        }
        if data.poster_url.is_some() {
            self.poster_url = data.poster_url.clone();
        }
        if data.fanart_url.is_some() {
            self.fanart_url = data.fanart_url.clone();
        }
    }

    /// Merge indexer episodes into the show.
    ///
    /// New episodes get their initial status from the show's default status;
    /// existing ones keep their status unless they were unaired and have aired
    /// since. When `seasons` is given, only those seasons are touched.
    /// Returns the number of newly added episodes.
    pub fn merge_indexer_episodes(
        &mut self,
        episodes: &[IndexerEpisode],
        seasons: Option<&[i32]>,
        today: NaiveDate,
    ) -> usize {
        let mut added = 0;
        for ep in episodes {
            if let Some(seasons) = seasons
                && !seasons.contains(&ep.season)
            {
                continue;
            }
            match self.episodes.get_mut(&(ep.season, ep.episode)) {
                Some(existing) => {
                    existing.name = ep.name.clone();
                    existing.airdate = ep.airdate;
                    if existing.status == EpisodeStatus::Unaired {
                        existing.status = Episode::initial_status(
                            ep.season,
                            ep.airdate,
                            self.default_ep_status,
                            today,
                        );
                    }
                }
                None => {
                    self.episodes.insert(
                        (ep.season, ep.episode),
                        Episode {
                            season: ep.season,
                            episode: ep.episode,
                            name: ep.name.clone(),
                            airdate: ep.airdate,
                            status: Episode::initial_status(
                                ep.season,
                                ep.airdate,
                                self.default_ep_status,
                                today,
                            ),
                            location: None,
                            subtitles: Vec::new(),
                        },
                    );
                    added += 1;
                }
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer_episode(season: i32, episode: i32, airdate: Option<&str>) -> IndexerEpisode {
        IndexerEpisode {
            season,
            episode,
            name: format!("Episode {}", episode),
            airdate: airdate.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        }
    }

    #[test]
    fn test_show_key_display() {
        let key = ShowKey::new(Indexer::Tvdb, 81189);
        assert_eq!(key.to_string(), "tvdb81189");
        assert_eq!(Indexer::from_id(key.indexer.id()), Some(Indexer::Tvdb));
    }

    #[test]
    fn test_initial_status() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let past = NaiveDate::from_ymd_opt(2024, 1, 1);
        let future = NaiveDate::from_ymd_opt(2025, 1, 1);

        assert_eq!(
            Episode::initial_status(1, past, EpisodeStatus::Wanted, today),
            EpisodeStatus::Wanted
        );
        assert_eq!(
            Episode::initial_status(1, future, EpisodeStatus::Wanted, today),
            EpisodeStatus::Unaired
        );
        assert_eq!(
            Episode::initial_status(1, None, EpisodeStatus::Wanted, today),
            EpisodeStatus::Unaired
        );
        assert_eq!(
            Episode::initial_status(0, past, EpisodeStatus::Wanted, today),
            EpisodeStatus::Skipped
        );
    }

    #[test]
    fn test_merge_respects_season_filter() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut show = Show::new(ShowKey::new(Indexer::TvMaze, 1), "Show", "/tv/Show");
        show.default_ep_status = EpisodeStatus::Wanted;

        let episodes = vec![
            indexer_episode(1, 1, Some("2024-01-01")),
            indexer_episode(2, 1, Some("2024-02-01")),
        ];
        let added = show.merge_indexer_episodes(&episodes, Some(&[2]), today);

        assert_eq!(added, 1);
        assert!(show.episodes.contains_key(&(2, 1)));
        assert!(!show.episodes.contains_key(&(1, 1)));
        assert_eq!(show.episodes[&(2, 1)].status, EpisodeStatus::Wanted);
    }

    #[test]
    fn test_merge_promotes_aired_unaired_episodes() {
        let mut show = Show::new(ShowKey::new(Indexer::TvMaze, 1), "Show", "/tv/Show");
        show.default_ep_status = EpisodeStatus::Wanted;
        let episodes = vec![indexer_episode(1, 1, Some("2024-03-01"))];

        let before = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        show.merge_indexer_episodes(&episodes, None, before);
        assert_eq!(show.episodes[&(1, 1)].status, EpisodeStatus::Unaired);

        let after = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let added = show.merge_indexer_episodes(&episodes, None, after);
        assert_eq!(added, 0);
        assert_eq!(show.episodes[&(1, 1)].status, EpisodeStatus::Wanted);
    }
}
