//! Queue item bodies
//!
//! Every item re-reads the show from the library when it starts. Each
//! database write is its own transaction, so an error part way through
//! leaves earlier writes intact and later ones undone.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::items::{AddShowOptions, ShowQueueItem};
use super::{ShowQueue, ShowQueueDeps, ShowQueueError};
use crate::library::{EpisodeStatus, Show, ShowFlags, ShowKey};
use crate::services::indexer::{IndexerApi, IndexerError, IndexerShow};
use crate::services::notifications::{NotificationEvent, notify_best_effort};
use crate::services::scanner;
use crate::services::text_utils::sanitize_path_component;

pub(super) async fn execute(queue: &ShowQueue, item: &ShowQueueItem) -> Result<()> {
    let deps = queue.deps();
    match item {
        ShowQueueItem::Add { show, options } => run_add(deps, *show, options).await,
        ShowQueueItem::Update { show } => run_update(queue, *show, None).await,
        ShowQueueItem::SeasonUpdate { show, seasons } => {
            run_update(queue, *show, Some(seasons.as_slice())).await
        }
        ShowQueueItem::Refresh { show, .. } => run_refresh(deps, *show).await,
        ShowQueueItem::Rename { show } => run_rename(deps, *show).await,
        ShowQueueItem::Subtitle { show } => run_subtitles(deps, *show).await,
        ShowQueueItem::Remove { show, full } => run_remove(deps, *show, *full).await,
    }
}

fn library_show(deps: &ShowQueueDeps, key: ShowKey) -> Result<Show> {
    deps.library
        .get_show(&key)
        .ok_or_else(|| ShowQueueError::ShowNotFound(key).into())
}

fn indexer_client(
    deps: &ShowQueueDeps,
    key: ShowKey,
) -> Result<std::sync::Arc<dyn IndexerApi>> {
    deps.indexers
        .get(key.indexer)
        .ok_or_else(|| anyhow!("No client configured for {}", key.indexer))
}

/// Run the blocking directory scan off the async runtime
async fn scan(show: Show) -> Result<(Show, Option<scanner::ScanResult>)> {
    tokio::task::spawn_blocking(move || {
        let mut show = show;
        let result = scanner::scan_show_directory(&mut show);
        (show, result)
    })
    .await
    .context("Directory scan panicked")
}

async fn load_rating(deps: &ShowQueueDeps, show: &mut Show) {
    let (Some(ratings), Some(imdb_id)) = (&deps.ratings, show.imdb_id.clone()) else {
        return;
    };
    match ratings.load_rating(&imdb_id).await {
        Ok(rating) => show.rating = rating,
        Err(e) => warn!(show = %show.key, error = %e, "Failed to load rating, continuing"),
    }
}

fn rebuild_name_cache(deps: &ShowQueueDeps, show: &Show) {
    deps.library
        .name_cache()
        .build_for_show(show, &deps.scene_exceptions);
}

// ---------------------------------------------------------------------------
// Add
// ---------------------------------------------------------------------------

async fn run_add(deps: &ShowQueueDeps, key: ShowKey, options: &AddShowOptions) -> Result<()> {
    info!(show = %key, "Adding show");

    if deps.library.contains(&key) {
        let e = IndexerError::ShowAlreadyInLibrary { key };
        add_failed(deps, key, &e.to_string()).await;
        return Err(e.into());
    }

    let show = match prepare_show(deps, key, options).await {
        Ok(show) => show,
        Err(e) => {
            add_failed(deps, key, &format!("{:#}", e)).await;
            return Err(e);
        }
    };

    deps.library.insert(show.clone());
    match finish_add(deps, show).await {
        Ok(show) => {
            info!(show = %key, name = %show.name, episodes = show.episodes.len(), "Show added");
            notify_best_effort(
                &deps.notifier,
                NotificationEvent::ShowAdded {
                    show: key,
                    name: show.name.clone(),
                },
            )
            .await;
            Ok(())
        }
        Err(e) => {
            rollback_add(deps, key).await;
            add_failed(deps, key, &format!("{:#}", e)).await;
            Err(e)
        }
    }
}

/// Everything before the show becomes visible; nothing to undo on failure
async fn prepare_show(deps: &ShowQueueDeps, key: ShowKey, options: &AddShowOptions) -> Result<Show> {
    let settings = &deps.settings;
    let language = options
        .language
        .clone()
        .unwrap_or_else(|| settings.language.clone());

    let data = indexer_client(deps, key)?
        .load_show(&key, &language)
        .await?;
    if data.name.trim().is_empty() {
        return Err(IndexerError::ShowIncomplete {
            indexer: key.indexer,
            key,
            reason: "show has no name".to_string(),
        }
        .into());
    }

    let location = match &options.show_dir {
        Some(dir) => dir.clone(),
        None => options
            .root_dir
            .clone()
            .unwrap_or_else(|| settings.root_dir.clone())
            .join(sanitize_path_component(&data.name)),
    };
    ensure_show_dir(&location, settings.create_missing_show_dirs).await?;

    let mut show = Show::new(key, data.name.clone(), location);
    show.language = language;
    show.default_ep_status = options.default_status.unwrap_or(settings.default_status);
    show.quality = options
        .quality
        .clone()
        .unwrap_or_else(|| settings.default_quality.clone());
    show.flags = ShowFlags {
        paused: options.paused,
        anime: options.anime,
        scene: options.scene,
        subtitles: options.subtitles,
        season_folders: options.season_folders.unwrap_or(true),
    };
    show.apply_indexer_data(&data);
    let added = show.merge_indexer_episodes(&data.episodes, None, Utc::now().date_naive());
    debug!(show = %key, episodes = added, "Episodes loaded from indexer");

    Ok(show)
}

async fn ensure_show_dir(location: &Path, create: bool) -> Result<()> {
    if location.is_dir() {
        return Ok(());
    }
    if !create {
        anyhow::bail!("Show folder {} doesn't exist", location.display());
    }
    tokio::fs::create_dir_all(location)
        .await
        .with_context(|| format!("Failed to create show folder {}", location.display()))?;
    info!(location = %location.display(), "Created show folder");
    Ok(())
}

/// Steps after the show is in the library; failures here are rolled back
async fn finish_add(deps: &ShowQueueDeps, show: Show) -> Result<Show> {
    let mut show = show;
    load_rating(deps, &mut show).await;

    let (show, _) = scan(show).await?;
    deps.db
        .save_show(&show)
        .await
        .with_context(|| format!("Failed to save {}", show.key))?;
    deps.library.insert(show.clone());

    if let Err(e) = deps.images.replace_images(&show).await {
        warn!(show = %show.key, error = %e, "Failed to cache artwork");
    }
    rebuild_name_cache(deps, &show);

    if show.default_ep_status == EpisodeStatus::Wanted {
        deps.backlog.request_backlog(&show);
    }
    Ok(show)
}

async fn rollback_add(deps: &ShowQueueDeps, key: ShowKey) {
    warn!(show = %key, "Removing partially added show");
    deps.library.remove(&key);
    deps.library.name_cache().clear_show(&key);
    if let Err(e) = deps.db.tv_shows().delete(&key).await {
        error!(show = %key, error = %e, "Failed to remove partially added show from database");
    }
    if let Err(e) = deps.images.remove_images(&key).await {
        warn!(show = %key, error = %e, "Failed to remove artwork of partially added show");
    }
}

async fn add_failed(deps: &ShowQueueDeps, key: ShowKey, reason: &str) {
    error!(show = %key, reason = %reason, "Unable to add show");
    notify_best_effort(
        &deps.notifier,
        NotificationEvent::ShowAddFailed {
            show: key,
            reason: reason.to_string(),
        },
    )
    .await;
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

async fn run_update(queue: &ShowQueue, key: ShowKey, seasons: Option<&[i32]>) -> Result<()> {
    let deps = queue.deps();
    let mut show = library_show(deps, key)?;
    info!(show = %key, seasons = ?seasons, "Updating show");

    let data = indexer_client(deps, key)?
        .load_show(&key, &show.language)
        .await
        .with_context(|| format!("Unable to load {} from {}", key, key.indexer))?;

    show.apply_indexer_data(&data);
    load_rating(deps, &mut show).await;
    show.merge_indexer_episodes(&data.episodes, seasons, Utc::now().date_naive());

    deps.db
        .tv_shows()
        .upsert(&show)
        .await
        .with_context(|| format!("Failed to save {}", key))?;

    let deleted = delete_stale_episodes(deps, &mut show, &data, seasons).await?;
    deps.db
        .episodes()
        .upsert_many(&key, show.episodes.values())
        .await
        .with_context(|| format!("Failed to save episodes of {}", key))?;
    deps.library.insert(show.clone());

    if let Err(e) = deps.images.replace_images(&show).await {
        warn!(show = %key, error = %e, "Failed to refresh artwork");
    }
    rebuild_name_cache(deps, &show);

    info!(show = %key, episodes = show.episodes.len(), deleted, "Show updated");

    if let Err(e) = queue.refresh_show(key, true) {
        warn!(show = %key, error = %e, "Could not queue refresh after update");
    }
    Ok(())
}

/// Delete local episodes the indexer no longer lists.
///
/// Only the given seasons are considered when `seasons` is set. A failed
/// delete is logged and the episode kept.
async fn delete_stale_episodes(
    deps: &ShowQueueDeps,
    show: &mut Show,
    data: &IndexerShow,
    seasons: Option<&[i32]>,
) -> Result<usize> {
    let in_scope = |season: i32| seasons.is_none_or(|s| s.contains(&season));

    let remote: BTreeSet<(i32, i32)> = data
        .episodes
        .iter()
        .filter(|ep| in_scope(ep.season))
        .map(|ep| (ep.season, ep.episode))
        .collect();

    let stored = deps.episodes_in_store(&show.key, seasons).await?;
    let local: BTreeSet<(i32, i32)> = show
        .episodes
        .keys()
        .copied()
        .filter(|(season, _)| in_scope(*season))
        .chain(stored)
        .collect();

    let mut deleted = 0;
    for numbering in local.difference(&remote) {
        let (season, episode) = *numbering;
        match deps.db.episodes().delete(&show.key, season, episode).await {
            Ok(_) => {
                show.episodes.remove(numbering);
                deleted += 1;
                info!(show = %show.key, season, episode, "Deleted episode no longer on indexer");
            }
            Err(e) => {
                warn!(show = %show.key, season, episode, error = %e, "Failed to delete episode");
            }
        }
    }
    Ok(deleted)
}

impl ShowQueueDeps {
    async fn episodes_in_store(
        &self,
        key: &ShowKey,
        seasons: Option<&[i32]>,
    ) -> Result<Vec<(i32, i32)>> {
        let grouped = self.db.episodes().load_episodes(key, seasons).await?;
        Ok(grouped
            .into_iter()
            .flat_map(|(season, episodes)| episodes.into_keys().map(move |ep| (season, ep)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Refresh, rename, subtitles
// ---------------------------------------------------------------------------

async fn run_refresh(deps: &ShowQueueDeps, key: ShowKey) -> Result<()> {
    let show = library_show(deps, key)?;
    debug!(show = %key, "Refreshing show from disk");

    let (show, result) = scan(show).await?;
    if result.is_none() {
        return Ok(());
    }

    deps.db
        .episodes()
        .upsert_many(&key, show.episodes.values())
        .await
        .with_context(|| format!("Failed to save episodes of {}", key))?;
    deps.library.insert(show);
    Ok(())
}

async fn run_rename(deps: &ShowQueueDeps, key: ShowKey) -> Result<()> {
    let show = library_show(deps, key)?;
    info!(show = %key, "Renaming episode files");

    let (show, renamed) = tokio::task::spawn_blocking(move || {
        let mut show = show;
        let renamed = scanner::rename_episode_files(&mut show);
        (show, renamed)
    })
    .await
    .context("Rename panicked")?;

    // Files renamed before an error have already moved on disk
    deps.db
        .episodes()
        .upsert_many(&key, show.episodes.values())
        .await
        .with_context(|| format!("Failed to save episodes of {}", key))?;
    deps.library.insert(show);
    renamed?;
    Ok(())
}

async fn run_subtitles(deps: &ShowQueueDeps, key: ShowKey) -> Result<()> {
    let mut show = library_show(deps, key)?;
    if !show.flags.subtitles {
        debug!(show = %key, "Subtitles disabled for show");
        return Ok(());
    }

    let changed = deps.subtitles.download_subtitles(&mut show).await?;
    if changed > 0 {
        deps.db
            .episodes()
            .upsert_many(&key, show.episodes.values())
            .await
            .with_context(|| format!("Failed to save episodes of {}", key))?;
        deps.library.insert(show);
    }
    info!(show = %key, changed, "Subtitles checked");
    Ok(())
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

async fn run_remove(deps: &ShowQueueDeps, key: ShowKey, full: bool) -> Result<()> {
    let Some(show) = deps.library.get_show(&key) else {
        info!(show = %key, "Show already gone, nothing to remove");
        return Ok(());
    };
    info!(show = %key, full, "Removing show");

    deps.db
        .tv_shows()
        .delete(&key)
        .await
        .with_context(|| format!("Failed to delete {}", key))?;
    deps.library.remove(&key);
    deps.library.name_cache().clear_show(&key);

    if let Err(e) = deps.images.remove_images(&key).await {
        warn!(show = %key, error = %e, "Failed to remove cached artwork");
    }

    if full && show.location.is_dir() {
        match tokio::fs::remove_dir_all(&show.location).await {
            Ok(()) => info!(show = %key, location = %show.location.display(), "Deleted show folder"),
            Err(e) => warn!(show = %key, error = %e, "Failed to delete show folder"),
        }
    }

    notify_best_effort(
        &deps.notifier,
        NotificationEvent::ShowRemoved {
            show: key,
            name: show.name.clone(),
            full,
        },
    )
    .await;
    Ok(())
}
