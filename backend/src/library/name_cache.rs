//! Sanitized name to show lookup
//!
//! Built from each show's own name plus its scene exceptions, so release names
//! using an alias still resolve to the right show.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::{Show, ShowKey};
use crate::services::scene_exceptions::SceneExceptionCache;
use crate::services::text_utils::full_sanitize_scene_name;

#[derive(Default)]
pub struct NameCache {
    names: RwLock<HashMap<String, ShowKey>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the entries belonging to `show`
    pub fn build_for_show(&self, show: &Show, exceptions: &SceneExceptionCache) {
        let mut candidates = vec![show.name.clone()];
        for aliases in exceptions
            .get_all_scene_exceptions(show.key.indexer_id)
            .into_values()
        {
            candidates.extend(aliases);
        }

        let mut names = self.names.write();
        names.retain(|_, key| *key != show.key);
        for candidate in candidates {
            let sanitized = full_sanitize_scene_name(&candidate);
            if !sanitized.is_empty() {
                names.insert(sanitized, show.key);
            }
        }
        debug!(show = %show.key, "Name cache rebuilt for show");
    }

    pub fn clear_show(&self, key: &ShowKey) {
        self.names.write().retain(|_, k| k != key);
    }

    pub fn lookup(&self, name: &str) -> Option<ShowKey> {
        self.names
            .read()
            .get(&full_sanitize_scene_name(name))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}
