//! Indexer client boundary
//!
//! The show queue only talks to metadata providers through [`IndexerApi`].
//! Errors are typed so callers can tell a flaky network from a show that
//! genuinely can't be added.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::library::{Indexer, ShowKey};

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("unable to reach {indexer}: {message}")]
    Transport { indexer: Indexer, message: String },

    #[error("{indexer} has no {attribute} for {key}")]
    AttributeNotFound {
        indexer: Indexer,
        key: ShowKey,
        attribute: String,
    },

    #[error("{key} is not available on {indexer} in language '{language}'")]
    ShowNotFoundInLanguage {
        indexer: Indexer,
        key: ShowKey,
        language: String,
    },

    #[error("{indexer} returned incomplete data for {key}: {reason}")]
    ShowIncomplete {
        indexer: Indexer,
        key: ShowKey,
        reason: String,
    },

    #[error("{key} is already in the library")]
    ShowAlreadyInLibrary { key: ShowKey },
}

/// Show metadata as returned by an indexer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexerShow {
    pub name: String,
    pub language: Option<String>,
    pub status: Option<String>,
    pub network: Option<String>,
    pub genres: Vec<String>,
    pub runtime: Option<u32>,
    pub imdb_id: Option<String>,
    pub poster_url: Option<String>,
    pub fanart_url: Option<String>,
    pub episodes: Vec<IndexerEpisode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexerEpisode {
    pub season: i32,
    pub episode: i32,
    pub name: String,
    pub airdate: Option<NaiveDate>,
}

#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// Load a show with all of its episodes
    async fn load_show(&self, key: &ShowKey, language: &str) -> Result<IndexerShow, IndexerError>;
}

/// Optional ratings lookup used during updates.
///
/// Failures here are never fatal for the caller.
#[async_trait]
pub trait RatingsProvider: Send + Sync {
    async fn load_rating(&self, imdb_id: &str) -> anyhow::Result<Option<f64>>;
}

/// Indexer clients by indexer
#[derive(Default, Clone)]
pub struct IndexerRegistry {
    clients: HashMap<Indexer, Arc<dyn IndexerApi>>,
}

impl IndexerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, indexer: Indexer, client: Arc<dyn IndexerApi>) {
        self.clients.insert(indexer, client);
    }

    pub fn with(mut self, indexer: Indexer, client: Arc<dyn IndexerApi>) -> Self {
        self.register(indexer, client);
        self
    }

    pub fn get(&self, indexer: Indexer) -> Option<Arc<dyn IndexerApi>> {
        self.clients.get(&indexer).cloned()
    }
}
