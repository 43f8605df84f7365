//! Process-wide library state
//!
//! Owns the in-memory show list, the recently deleted set and the name cache.
//! One instance is created at startup and shared by the show queue, the scene
//! exception cache and the scheduler.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use super::{NameCache, Show, ShowKey};

/// What an exception source needs to know about a library show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTarget {
    pub key: ShowKey,
    pub name: String,
    pub anime: bool,
}

#[derive(Default)]
pub struct LibraryContext {
    shows: RwLock<HashMap<ShowKey, Show>>,
    recently_deleted: Mutex<HashSet<ShowKey>>,
    name_cache: NameCache,
}

impl LibraryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_show(&self, key: &ShowKey) -> Option<Show> {
        self.shows.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ShowKey) -> bool {
        self.shows.read().contains_key(key)
    }

    /// Insert or replace a show
    pub fn insert(&self, show: Show) {
        self.shows.write().insert(show.key, show);
    }

    pub fn remove(&self, key: &ShowKey) -> Option<Show> {
        self.shows.write().remove(key)
    }

    /// Apply `f` to the stored show; returns false when the show is unknown
    pub fn update<F>(&self, key: &ShowKey, f: F) -> bool
    where
        F: FnOnce(&mut Show),
    {
        match self.shows.write().get_mut(key) {
            Some(show) => {
                f(show);
                true
            }
            None => false,
        }
    }

    /// All shows, sorted by name
    pub fn list_shows(&self) -> Vec<Show> {
        let mut shows: Vec<Show> = self.shows.read().values().cloned().collect();
        shows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        shows
    }

    pub fn len(&self) -> usize {
        self.shows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shows.read().is_empty()
    }

    pub fn exception_targets(&self) -> Vec<ExceptionTarget> {
        self.shows
            .read()
            .values()
            .map(|show| ExceptionTarget {
                key: show.key,
                name: show.name.clone(),
                anime: show.flags.anime,
            })
            .collect()
    }

    /// Remember a removed show so stale watch lists don't re-add it
    pub fn record_deleted(&self, key: ShowKey) {
        self.recently_deleted.lock().insert(key);
    }

    pub fn is_recently_deleted(&self, key: &ShowKey) -> bool {
        self.recently_deleted.lock().contains(key)
    }

    /// Clear the deleted marker, e.g. after an explicit re-add
    pub fn forget_deleted(&self, key: &ShowKey) {
        self.recently_deleted.lock().remove(key);
    }

    pub fn name_cache(&self) -> &NameCache {
        &self.name_cache
    }

    /// Resolve a release or folder name to a library show
    pub fn find_show_by_name(&self, name: &str) -> Option<Show> {
        let key = self.name_cache.lookup(name)?;
        self.get_show(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Indexer;

    #[test]
    fn test_update_unknown_show_returns_false() {
        let ctx = LibraryContext::new();
        let key = ShowKey::new(Indexer::Tvdb, 1);
        assert!(!ctx.update(&key, |s| s.flags.paused = true));

        ctx.insert(Show::new(key, "Show", "/tv/Show"));
        assert!(ctx.update(&key, |s| s.flags.paused = true));
        assert!(ctx.get_show(&key).unwrap().flags.paused);
    }

    #[test]
    fn test_recently_deleted() {
        let ctx = LibraryContext::new();
        let key = ShowKey::new(Indexer::Tvdb, 7);
        ctx.record_deleted(key);
        assert!(ctx.is_recently_deleted(&key));
        ctx.forget_deleted(&key);
        assert!(!ctx.is_recently_deleted(&key));
    }
}
