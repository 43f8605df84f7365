//! Scene exception cache
//!
//! Alternate show names per season, gathered from several remote sources and
//! persisted in the database. The in-memory map is a derived view: every
//! refresh rebuilds it from the store.

pub mod sources;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

pub use sources::{
    AniDbSource, CustomExceptionSource, ExceptionSource, FetchedExceptions, XemSource,
};

use crate::db::{Database, NewSceneException};
use crate::library::{ALL_SEASONS, Indexer, LibraryContext, ShowKey};
use crate::services::text_utils::full_sanitize_scene_name;

/// Default time between two refreshes of the same source
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// `indexer_id -> season -> aliases`.
///
/// Keyed by id alone, so a slice holds the aliases of every indexer sharing
/// that id.
type ExceptionMap = HashMap<u32, BTreeMap<i32, BTreeSet<String>>>;

/// Result of a reverse lookup: `(indexer_id, season)`.
///
/// A total miss yields the single pair `(None, None)`.
pub type NameMatch = (Option<u32>, Option<i32>);

struct SourceRecord {
    source: Arc<dyn ExceptionSource>,
    cooldown: Duration,
}

/// What a refresh pass did, per source
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Rows that were new to the store
    pub inserted: u64,
}

pub struct SceneExceptionCache {
    db: Database,
    library: Arc<LibraryContext>,
    exceptions: RwLock<ExceptionMap>,
    sources: Vec<SourceRecord>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SceneExceptionCache {
    pub fn new(db: Database, library: Arc<LibraryContext>) -> Self {
        Self {
            db,
            library,
            exceptions: RwLock::new(ExceptionMap::new()),
            sources: Vec::new(),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Register a source; sources are merged in registration order
    pub fn with_source(mut self, source: Arc<dyn ExceptionSource>, cooldown: Duration) -> Self {
        self.sources.push(SourceRecord { source, cooldown });
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|r| r.source.name().to_string())
            .collect()
    }

    /// Replace the in-memory map with the store's contents
    pub async fn load_from_store(&self) -> Result<usize> {
        let _guard = self.refresh_lock.lock().await;
        self.reload().await
    }

    /// Caller holds `refresh_lock`
    async fn reload(&self) -> Result<usize> {
        let records = self.db.scene_exceptions().list_all().await?;
        let count = records.len();

        let mut map = ExceptionMap::new();
        for record in records {
            let Ok(indexer_id) = u32::try_from(record.indexer_id) else {
                warn!(indexer_id = record.indexer_id, "Skipping exception with invalid id");
                continue;
            };
            map.entry(indexer_id)
                .or_default()
                .entry(record.season)
                .or_default()
                .insert(record.show_name);
        }

        *self.exceptions.write() = map;
        debug!(count, "Scene exception cache loaded");
        Ok(count)
    }

    /// Aliases for `(indexer_id, season)`, falling back to the all-seasons
    /// set when the season has none
    pub fn get_scene_exceptions(&self, indexer_id: u32, season: i32) -> BTreeSet<String> {
        let exceptions = self.exceptions.read();
        let Some(seasons) = exceptions.get(&indexer_id) else {
            return BTreeSet::new();
        };

        match seasons.get(&season) {
            Some(aliases) if !aliases.is_empty() => aliases.clone(),
            _ if season != ALL_SEASONS => seasons.get(&ALL_SEASONS).cloned().unwrap_or_default(),
            _ => BTreeSet::new(),
        }
    }

    pub fn get_all_scene_exceptions(&self, indexer_id: u32) -> BTreeMap<i32, BTreeSet<String>> {
        self.exceptions
            .read()
            .get(&indexer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Seasons that have season specific aliases
    pub fn seasons_with_exceptions(&self, indexer_id: u32) -> Vec<i32> {
        self.exceptions
            .read()
            .get(&indexer_id)
            .map(|seasons| {
                seasons
                    .iter()
                    .filter(|(season, aliases)| **season != ALL_SEASONS && !aliases.is_empty())
                    .map(|(season, _)| *season)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reverse lookup of an alias.
    ///
    /// Exact case-insensitive matches win; otherwise sanitized forms are
    /// compared. Matches are ordered by season, then indexer id. When nothing
    /// matches the result is `[(None, None)]`, never empty.
    pub fn get_scene_exceptions_by_name(&self, name: &str) -> Vec<NameMatch> {
        let exceptions = self.exceptions.read();
        let lowered = name.to_lowercase();

        let mut matches = collect_matches(&exceptions, |alias| alias.to_lowercase() == lowered);
        if matches.is_empty() {
            let sanitized = full_sanitize_scene_name(name);
            if !sanitized.is_empty() {
                matches =
                    collect_matches(&exceptions, |alias| full_sanitize_scene_name(alias) == sanitized);
            }
        }

        if matches.is_empty() {
            debug!(name = %name, "No scene exception matches name");
            return vec![(None, None)];
        }
        matches
            .into_iter()
            .map(|(season, indexer_id)| (Some(indexer_id), Some(season)))
            .collect()
    }

    /// Replace every alias of one season slice with `aliases`.
    ///
    /// The stored rows are replaced in one transaction, then the cache entry
    /// is repopulated from what the store holds for that id and season, which
    /// keeps aliases other indexers contributed under the same id.
    pub async fn update_scene_exceptions(
        &self,
        indexer_id: u32,
        indexer: Indexer,
        aliases: &[String],
        season: i32,
    ) -> Result<()> {
        let aliases: Vec<String> = aliases
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let _guard = self.refresh_lock.lock().await;
        let repo = self.db.scene_exceptions();
        repo.replace_slice(indexer, indexer_id, season, &aliases, true)
            .await
            .with_context(|| format!("Failed to update scene exceptions for {}", indexer_id))?;
        let stored = repo.list_slice(indexer_id, season).await?;

        {
            let mut exceptions = self.exceptions.write();
            let seasons = exceptions.entry(indexer_id).or_default();
            seasons.remove(&season);
            if !stored.is_empty() {
                seasons.insert(season, stored.into_iter().collect());
            }
            if seasons.is_empty() {
                exceptions.remove(&indexer_id);
            }
        }

        info!(indexer = %indexer, indexer_id, season, count = aliases.len(), "Scene exceptions updated");
        self.rebuild_name_cache(&ShowKey::new(indexer, indexer_id));
        Ok(())
    }

    /// Whether `source` is due for a refresh
    pub async fn should_refresh(&self, source: &str, cooldown: Duration) -> Result<bool> {
        let Some(last) = self.db.scene_exceptions().last_refresh(source).await? else {
            return Ok(true);
        };
        let elapsed = Utc::now().timestamp() - last;
        Ok(elapsed < 0 || elapsed as u64 >= cooldown.as_secs())
    }

    pub async fn set_last_refresh(&self, source: &str) -> Result<()> {
        self.db
            .scene_exceptions()
            .set_last_refresh(source, Utc::now().timestamp())
            .await
    }

    /// Refresh from all registered sources.
    ///
    /// Each source is gated by its own cooldown unless `force` is set. A
    /// failing source is logged and contributes nothing; its cooldown stays
    /// unset so it is retried on the next pass. Results are merged in
    /// registration order, stored in one batch and the cache is rebuilt from
    /// the store.
    pub async fn retrieve_exceptions(&self, force: bool) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;
        let mut report = RefreshReport::default();
        let targets = self.library.exception_targets();

        let mut due_sources = Vec::new();
        for record in &self.sources {
            let name = record.source.name().to_string();

            let due = match self.should_refresh(&name, record.cooldown).await {
                Ok(due) => due,
                Err(e) => {
                    warn!(source = %name, error = %e, "Could not read refresh record, refreshing anyway");
                    true
                }
            };
            if !force && !due {
                debug!(source = %name, "Scene exception source not due");
                report.skipped.push(name);
                continue;
            }
            due_sources.push((name, record.source.clone()));
        }

        // Fetched concurrently, merged in registration order
        let targets = Arc::new(targets);
        let mut fetches = Vec::with_capacity(due_sources.len());
        for (name, source) in due_sources {
            let targets = Arc::clone(&targets);
            fetches.push(async move {
                let fetched = source.fetch(&targets).await;
                (name, fetched)
            });
        }
        let results: Vec<(String, Result<FetchedExceptions>)> = join_all(fetches).await;

        let mut merged: BTreeMap<ShowKey, Vec<(String, i32)>> = BTreeMap::new();
        for (name, fetched) in results {
            match fetched {
                Ok(fetched) => {
                    let count: usize = fetched.values().map(Vec::len).sum();
                    info!(source = %name, shows = fetched.len(), aliases = count, "Scene exceptions fetched");
                    merge_fetched(&mut merged, fetched);
                    report.refreshed.push(name);
                }
                Err(e) => {
                    error!(source = %name, error = ?e, "Scene exception source failed");
                    report.failed.push(name);
                }
            }
        }

        if report.refreshed.is_empty() {
            return Ok(report);
        }

        let rows: Vec<NewSceneException> = merged
            .into_iter()
            .flat_map(|(key, aliases)| {
                aliases
                    .into_iter()
                    .map(move |(show_name, season)| NewSceneException {
                        indexer: key.indexer,
                        indexer_id: key.indexer_id,
                        show_name,
                        season,
                        custom: false,
                    })
            })
            .collect();
        report.inserted = self.db.scene_exceptions().insert_batch(&rows).await?;

        for name in &report.refreshed {
            if let Err(e) = self.set_last_refresh(name).await {
                warn!(source = %name, error = %e, "Failed to record scene exception refresh");
            }
        }

        self.reload().await?;
        for show in self.library.list_shows() {
            self.library.name_cache().build_for_show(&show, self);
        }

        info!(
            refreshed = ?report.refreshed,
            failed = ?report.failed,
            inserted = report.inserted,
            "Scene exception refresh complete"
        );
        Ok(report)
    }

    fn rebuild_name_cache(&self, key: &ShowKey) {
        if let Some(show) = self.library.get_show(key) {
            self.library.name_cache().build_for_show(&show, self);
        }
    }
}

/// Sorted `(season, indexer_id)` pairs whose alias satisfies `matches`
fn collect_matches<F>(exceptions: &ExceptionMap, matches: F) -> Vec<(i32, u32)>
where
    F: Fn(&str) -> bool,
{
    let mut found: Vec<(i32, u32)> = exceptions
        .iter()
        .flat_map(|(indexer_id, seasons)| {
            seasons
                .iter()
                .filter(|(_, aliases)| aliases.iter().any(|a| matches(a)))
                .map(move |(season, _)| (*season, *indexer_id))
        })
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}

/// Later sources add to earlier ones; identical rows collapse
fn merge_fetched(merged: &mut BTreeMap<ShowKey, Vec<(String, i32)>>, fetched: FetchedExceptions) {
    for (key, aliases) in fetched {
        let entry = merged.entry(key).or_default();
        for alias in aliases {
            if !entry.contains(&alias) {
                entry.push(alias);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ExceptionTarget;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, Semaphore};

    struct StaticSource {
        name: &'static str,
        result: Option<FetchedExceptions>,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn ok(name: &'static str, key: ShowKey, aliases: &[(&str, i32)]) -> Arc<Self> {
            let mut fetched = FetchedExceptions::new();
            fetched.insert(
                key,
                aliases.iter().map(|(a, s)| (a.to_string(), *s)).collect(),
            );
            Arc::new(Self {
                name,
                result: Some(fetched),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ExceptionSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _targets: &[ExceptionTarget]) -> Result<FetchedExceptions> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or_else(|| anyhow::anyhow!("{} is down", self.name))
        }
    }

    /// Blocks inside `fetch` until a permit is added to `gate`
    struct GatedSource {
        key: ShowKey,
        gate: Arc<Semaphore>,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl ExceptionSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        async fn fetch(&self, _targets: &[ExceptionTarget]) -> Result<FetchedExceptions> {
            self.started.notify_one();
            self.gate.acquire().await?.forget();
            let mut fetched = FetchedExceptions::new();
            fetched.insert(self.key, vec![("Fetched Alias".to_string(), ALL_SEASONS)]);
            Ok(fetched)
        }
    }

    async fn cache() -> SceneExceptionCache {
        let db = Database::connect_in_memory().await.unwrap();
        SceneExceptionCache::new(db, Arc::new(LibraryContext::new()))
    }

    #[tokio::test]
    async fn test_round_trip_and_idempotent_reads() {
        let cache = cache().await;
        cache
            .update_scene_exceptions(100, Indexer::Tvdb, &["Alt Name".to_string()], 1)
            .await
            .unwrap();

        let first = cache.get_scene_exceptions(100, 1);
        assert_eq!(first, BTreeSet::from(["Alt Name".to_string()]));
        assert_eq!(cache.get_scene_exceptions(100, 1), first);
    }

    #[tokio::test]
    async fn test_falls_back_to_all_seasons() {
        let cache = cache().await;
        cache
            .update_scene_exceptions(7, Indexer::Tvdb, &["X".to_string()], ALL_SEASONS)
            .await
            .unwrap();

        assert_eq!(cache.get_scene_exceptions(7, 2), BTreeSet::from(["X".to_string()]));
        assert!(cache.get_scene_exceptions(8, 2).is_empty());
    }

    #[tokio::test]
    async fn test_returned_set_is_a_copy() {
        let cache = cache().await;
        cache
            .update_scene_exceptions(7, Indexer::Tvdb, &["X".to_string()], 1)
            .await
            .unwrap();

        let mut copy = cache.get_scene_exceptions(7, 1);
        copy.insert("Y".to_string());
        assert_eq!(cache.get_scene_exceptions(7, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_whole_slice() {
        let cache = cache().await;
        cache
            .update_scene_exceptions(7, Indexer::Tvdb, &["A".to_string(), "B".to_string()], 1)
            .await
            .unwrap();
        cache
            .update_scene_exceptions(7, Indexer::Tvdb, &["C".to_string()], 1)
            .await
            .unwrap();

        assert_eq!(cache.get_scene_exceptions(7, 1), BTreeSet::from(["C".to_string()]));
        assert_eq!(cache.seasons_with_exceptions(7), vec![1]);

        cache.load_from_store().await.unwrap();
        assert_eq!(cache.get_scene_exceptions(7, 1), BTreeSet::from(["C".to_string()]));
    }

    #[tokio::test]
    async fn test_lookup_by_name() {
        let cache = cache().await;
        cache
            .update_scene_exceptions(5, Indexer::Tvdb, &["Show: Redux".to_string()], 2)
            .await
            .unwrap();
        cache
            .update_scene_exceptions(5, Indexer::Tvdb, &["show: redux".to_string()], 1)
            .await
            .unwrap();

        assert_eq!(
            cache.get_scene_exceptions_by_name("SHOW: REDUX"),
            vec![(Some(5), Some(1)), (Some(5), Some(2))]
        );
        assert_eq!(
            cache.get_scene_exceptions_by_name("Show.Redux"),
            vec![(Some(5), Some(1)), (Some(5), Some(2))]
        );
        assert_eq!(
            cache.get_scene_exceptions_by_name("totally unknown name xyz"),
            vec![(None, None)]
        );
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_others() {
        let key = ShowKey::new(Indexer::Tvdb, 42);
        let custom = StaticSource::failing("custom_exceptions");
        let xem = StaticSource::ok("xem", key, &[("Xem Alias", -1)]);
        let anidb = StaticSource::ok("anidb", key, &[("Anime Alias", -1), ("Xem Alias", -1)]);

        let cache = cache()
            .await
            .with_source(custom.clone(), DEFAULT_REFRESH_COOLDOWN)
            .with_source(xem.clone(), DEFAULT_REFRESH_COOLDOWN)
            .with_source(anidb.clone(), DEFAULT_REFRESH_COOLDOWN);

        let report = cache.retrieve_exceptions(false).await.unwrap();
        assert_eq!(report.failed, vec!["custom_exceptions".to_string()]);
        assert_eq!(report.refreshed, vec!["xem".to_string(), "anidb".to_string()]);
        assert_eq!(report.inserted, 2);
        assert_eq!(
            cache.get_scene_exceptions(42, ALL_SEASONS),
            BTreeSet::from(["Anime Alias".to_string(), "Xem Alias".to_string()])
        );

        // Successful sources are now cooling down, the failed one is retried
        let report = cache.retrieve_exceptions(false).await.unwrap();
        assert_eq!(report.skipped, vec!["xem".to_string(), "anidb".to_string()]);
        assert_eq!(custom.calls.load(Ordering::SeqCst), 2);
        assert_eq!(xem.calls.load(Ordering::SeqCst), 1);

        cache.retrieve_exceptions(true).await.unwrap();
        assert_eq!(xem.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_runs_on_spawned_task() {
        let key = ShowKey::new(Indexer::Tvdb, 9);
        let cache = Arc::new(
            cache()
                .await
                .with_source(StaticSource::ok("xem", key, &[("Spawned", -1)]), DEFAULT_REFRESH_COOLDOWN),
        );

        let background = cache.clone();
        let report = tokio::spawn(async move { background.retrieve_exceptions(true).await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.refreshed, vec!["xem".to_string()]);
        assert_eq!(cache.get_scene_exceptions(9, 1), BTreeSet::from(["Spawned".to_string()]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_waits_for_running_refresh() {
        let key = ShowKey::new(Indexer::Tvdb, 42);
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            key,
            gate: gate.clone(),
            started: started.clone(),
        });
        let cache = Arc::new(cache().await.with_source(source, DEFAULT_REFRESH_COOLDOWN));

        let refreshing = cache.clone();
        let refresh = tokio::spawn(async move { refreshing.retrieve_exceptions(true).await });
        started.notified().await;

        let updating = cache.clone();
        let update = tokio::spawn(async move {
            updating
                .update_scene_exceptions(42, Indexer::Tvdb, &["Manual".to_string()], 1)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!update.is_finished());

        gate.add_permits(1);
        refresh.await.unwrap().unwrap();
        update.await.unwrap().unwrap();

        // The refresh's reload must not have clobbered the manual slice
        assert_eq!(cache.get_scene_exceptions(42, 1), BTreeSet::from(["Manual".to_string()]));
        assert_eq!(
            cache.get_scene_exceptions(42, ALL_SEASONS),
            BTreeSet::from(["Fetched Alias".to_string()])
        );
        cache.load_from_store().await.unwrap();
        assert_eq!(cache.get_scene_exceptions(42, 1), BTreeSet::from(["Manual".to_string()]));
    }

    #[tokio::test]
    async fn test_update_keeps_other_indexers_aliases() {
        let cache = cache().await;
        cache
            .db
            .scene_exceptions()
            .insert_batch(&[NewSceneException {
                indexer: Indexer::TvMaze,
                indexer_id: 5,
                show_name: "Maze Alias".to_string(),
                season: 1,
                custom: false,
            }])
            .await
            .unwrap();
        cache.load_from_store().await.unwrap();

        cache
            .update_scene_exceptions(5, Indexer::Tvdb, &["Tvdb Alias".to_string()], 1)
            .await
            .unwrap();

        let expected = BTreeSet::from(["Maze Alias".to_string(), "Tvdb Alias".to_string()]);
        assert_eq!(cache.get_scene_exceptions(5, 1), expected);
        cache.load_from_store().await.unwrap();
        assert_eq!(cache.get_scene_exceptions(5, 1), expected);
    }
}
