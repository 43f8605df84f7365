//! Show queue
//!
//! The only way to change a show. Every operation becomes a
//! [`ShowQueueItem`] on a single-worker [`PriorityQueue`]; the public methods
//! validate the request against what is queued or running for that show
//! before anything is enqueued. A show's state is never stored, it is read
//! off the queue.

mod execute;
pub mod items;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use items::{
    ActionKind, AddShowOptions, ShowActivity, ShowQueueItem, ShowState, show_activity,
};

use super::artwork::ImageCache;
use super::backlog::BacklogSearcher;
use super::indexer::{IndexerRegistry, RatingsProvider};
use super::notifications::Notifier;
use super::queue::{PriorityQueue, QueueConfig, QueueError, QueueItem, QueueSnapshot};
use super::scene_exceptions::SceneExceptionCache;
use super::subtitles::SubtitleProvider;
use crate::db::Database;
use crate::library::{EpisodeStatus, LibraryContext, ShowKey};

#[derive(Debug, Error)]
pub enum ShowQueueError {
    #[error("can't add {key}: {reason}")]
    CantAddShow { key: ShowKey, reason: String },

    #[error("can't update {key}: {reason}")]
    CantUpdateShow { key: ShowKey, reason: String },

    #[error("can't refresh {key}: {reason}")]
    CantRefreshShow { key: ShowKey, reason: String },

    #[error("can't remove {key}: {reason}")]
    CantRemoveShow { key: ShowKey, reason: String },

    #[error("{0} is being removed")]
    ShowBeingRemoved(ShowKey),

    #[error("{0} is not in the library")]
    ShowNotFound(ShowKey),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type ShowQueueResult<T> = Result<T, ShowQueueError>;
pub type ShowQueueEntry = Arc<QueueItem<ShowQueueItem>>;

/// Defaults applied by queue items
#[derive(Debug, Clone)]
pub struct ShowQueueSettings {
    /// Root folder new shows are created under
    pub root_dir: PathBuf,
    pub create_missing_show_dirs: bool,
    pub language: String,
    pub default_status: EpisodeStatus,
    pub default_quality: String,
    pub poll_interval: Duration,
}

impl Default for ShowQueueSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/tv"),
            create_missing_show_dirs: true,
            language: "en".to_string(),
            default_status: EpisodeStatus::Skipped,
            default_quality: "any".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Collaborators the queue items call into
#[derive(Clone)]
pub struct ShowQueueDeps {
    pub library: Arc<LibraryContext>,
    pub db: Database,
    pub indexers: IndexerRegistry,
    pub scene_exceptions: Arc<SceneExceptionCache>,
    pub images: Arc<dyn ImageCache>,
    pub notifier: Arc<dyn Notifier>,
    pub subtitles: Arc<dyn SubtitleProvider>,
    pub backlog: Arc<dyn BacklogSearcher>,
    pub ratings: Option<Arc<dyn RatingsProvider>>,
    pub settings: ShowQueueSettings,
}

struct ShowQueueInner {
    queue: Arc<PriorityQueue<ShowQueueItem>>,
    deps: ShowQueueDeps,
    /// Serializes validate-then-enqueue
    submit: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ShowQueue {
    inner: Arc<ShowQueueInner>,
}

impl ShowQueue {
    pub fn new(deps: ShowQueueDeps) -> Self {
        let config = QueueConfig {
            poll_interval: deps.settings.poll_interval,
        };
        Self {
            inner: Arc::new(ShowQueueInner {
                queue: Arc::new(PriorityQueue::new("show_queue", config)),
                deps,
                submit: Mutex::new(()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn deps(&self) -> &ShowQueueDeps {
        &self.inner.deps
    }

    fn queue(&self) -> &PriorityQueue<ShowQueueItem> {
        &self.inner.queue
    }

    /// Start the worker; calling it again is a no-op
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return;
        }

        let show_queue = self.clone();
        let handle = self.inner.queue.start(move |item: ShowQueueEntry| {
            let show_queue = show_queue.clone();
            async move { execute::execute(&show_queue, item.job()).await }
        });
        *worker = Some(handle);
    }

    /// Stop after the running item; queued items stay unprocessed
    pub async fn shutdown(&self) {
        self.queue().shutdown();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Show queue worker ended abnormally");
        }
    }

    pub fn pause(&self) {
        self.queue().pause();
    }

    pub fn resume(&self) {
        self.queue().resume();
    }

    pub fn is_paused(&self) -> bool {
        self.queue().is_paused()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue().snapshot()
    }

    pub fn queued_items(&self) -> Vec<ShowQueueEntry> {
        self.queue().queued_items()
    }

    pub fn current_item(&self) -> Option<ShowQueueEntry> {
        self.queue().current_item()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn is_running(&self, show: &ShowKey, kind: ActionKind) -> bool {
        self.queue().is_being_processed(|item| item.matches(show, kind))
    }

    fn is_queued(&self, show: &ShowKey, kind: ActionKind) -> bool {
        self.queue().is_in_queue(|item| item.matches(show, kind))
    }

    pub fn is_being_added(&self, show: &ShowKey) -> bool {
        self.is_running(show, ActionKind::Add)
    }

    pub fn is_in_add_queue(&self, show: &ShowKey) -> bool {
        self.is_queued(show, ActionKind::Add)
    }

    pub fn is_being_updated(&self, show: &ShowKey) -> bool {
        self.is_running(show, ActionKind::Update)
    }

    pub fn is_in_update_queue(&self, show: &ShowKey) -> bool {
        self.is_queued(show, ActionKind::Update)
    }

    pub fn is_being_refreshed(&self, show: &ShowKey) -> bool {
        self.is_running(show, ActionKind::Refresh)
    }

    pub fn is_in_refresh_queue(&self, show: &ShowKey) -> bool {
        self.is_queued(show, ActionKind::Refresh)
    }

    pub fn is_being_renamed(&self, show: &ShowKey) -> bool {
        self.is_running(show, ActionKind::Rename)
    }

    pub fn is_in_rename_queue(&self, show: &ShowKey) -> bool {
        self.is_queued(show, ActionKind::Rename)
    }

    pub fn is_being_subtitled(&self, show: &ShowKey) -> bool {
        self.is_running(show, ActionKind::Subtitle)
    }

    pub fn is_in_subtitle_queue(&self, show: &ShowKey) -> bool {
        self.is_queued(show, ActionKind::Subtitle)
    }

    pub fn is_being_removed(&self, show: &ShowKey) -> bool {
        self.is_running(show, ActionKind::Remove)
    }

    pub fn is_in_remove_queue(&self, show: &ShowKey) -> bool {
        self.is_queued(show, ActionKind::Remove)
    }

    fn removal_pending(&self, show: &ShowKey) -> bool {
        self.is_being_removed(show) || self.is_in_remove_queue(show)
    }

    fn add_pending(&self, show: &ShowKey) -> bool {
        self.is_being_added(show) || self.is_in_add_queue(show)
    }

    /// Shows with an add queued or running
    pub fn loading_shows(&self) -> Vec<ShowKey> {
        let mut keys: Vec<ShowKey> = self
            .current_item()
            .into_iter()
            .chain(self.queued_items())
            .filter(|item| item.job().kind() == ActionKind::Add)
            .map(|item| item.job().show())
            .collect();
        keys.dedup();
        keys
    }

    pub fn activity(&self, show: &ShowKey) -> ShowActivity {
        let queued = self.queued_items();
        let current = self.current_item();
        show_activity(
            queued.iter().map(|item| item.job()),
            current.as_ref().map(|item| item.job()),
            show,
        )
    }

    pub fn show_state(&self, show: &ShowKey) -> ShowState {
        self.activity(show).state()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Queue adding a show.
    ///
    /// Whether the show is already in the library is checked when the item
    /// runs. Accepting the add clears a recent deletion record; a removal
    /// queued after this point records it again.
    pub fn add_show(&self, show: ShowKey, options: AddShowOptions) -> ShowQueueResult<ShowQueueEntry> {
        let _guard = self.inner.submit.lock();

        if self.removal_pending(&show) {
            return Err(ShowQueueError::CantAddShow {
                key: show,
                reason: "show is being removed".to_string(),
            });
        }
        if self.add_pending(&show) {
            return Err(ShowQueueError::CantAddShow {
                key: show,
                reason: "show is already being added".to_string(),
            });
        }

        let item = self.queue().add_item(ShowQueueItem::Add { show, options })?;
        self.inner.deps.library.forget_deleted(&show);
        info!(show = %show, "Show add queued");
        Ok(item)
    }

    /// Queue a full update, or a season update when `seasons` is given
    pub fn update_show(
        &self,
        show: ShowKey,
        seasons: Option<Vec<i32>>,
    ) -> ShowQueueResult<ShowQueueEntry> {
        let _guard = self.inner.submit.lock();

        let reject = |reason: &str| ShowQueueError::CantUpdateShow {
            key: show,
            reason: reason.to_string(),
        };

        if self.add_pending(&show) {
            return Err(reject("show is still being added"));
        }
        if !self.inner.deps.library.contains(&show) {
            return Err(ShowQueueError::ShowNotFound(show));
        }
        if self.removal_pending(&show) {
            return Err(reject("show is being removed"));
        }
        if self.is_being_updated(&show) {
            return Err(reject("show is already being updated"));
        }
        if self.is_in_update_queue(&show) {
            return Err(reject("show is already queued to be updated"));
        }

        let job = match seasons {
            Some(seasons) => ShowQueueItem::SeasonUpdate { show, seasons },
            None => ShowQueueItem::Update { show },
        };
        let item = self.queue().add_item(job)?;
        info!(show = %show, item = %item.name(), "Show update queued");
        Ok(item)
    }

    /// Queue a rescan of the show's directory.
    ///
    /// Returns `Ok(None)` without queuing when an update is pending, since the
    /// update ends with a refresh. `force` skips both that check and the
    /// already-refreshing check.
    pub fn refresh_show(
        &self,
        show: ShowKey,
        force: bool,
    ) -> ShowQueueResult<Option<ShowQueueEntry>> {
        let _guard = self.inner.submit.lock();

        let reject = |reason: &str| ShowQueueError::CantRefreshShow {
            key: show,
            reason: reason.to_string(),
        };

        if self.removal_pending(&show) {
            return Err(reject("show is being removed"));
        }
        if self.add_pending(&show) {
            return Err(reject("show is still being added"));
        }
        if !self.inner.deps.library.contains(&show) {
            return Err(ShowQueueError::ShowNotFound(show));
        }

        if !force {
            if self.is_being_refreshed(&show) || self.is_in_refresh_queue(&show) {
                return Err(reject("show is already being refreshed or queued"));
            }
            if self.is_being_updated(&show) || self.is_in_update_queue(&show) {
                debug!(show = %show, "Update pending, skipping refresh");
                return Ok(None);
            }
        }

        match self.queue().add_item(ShowQueueItem::Refresh { show, force }) {
            Ok(item) => {
                debug!(show = %show, force, "Show refresh queued");
                Ok(Some(item))
            }
            Err(QueueError::Duplicate(_)) if force => {
                debug!(show = %show, "Refresh already queued");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn rename_show_episodes(&self, show: ShowKey) -> ShowQueueResult<ShowQueueEntry> {
        self.enqueue_simple(ShowQueueItem::Rename { show })
    }

    pub fn download_subtitles(&self, show: ShowKey) -> ShowQueueResult<ShowQueueEntry> {
        self.enqueue_simple(ShowQueueItem::Subtitle { show })
    }

    fn enqueue_simple(&self, job: ShowQueueItem) -> ShowQueueResult<ShowQueueEntry> {
        let _guard = self.inner.submit.lock();
        let show = job.show();

        if self.removal_pending(&show) {
            return Err(ShowQueueError::ShowBeingRemoved(show));
        }
        if !self.inner.deps.library.contains(&show) {
            return Err(ShowQueueError::ShowNotFound(show));
        }

        let item = self.queue().add_item(job)?;
        debug!(show = %show, item = %item.name(), "Show item queued");
        Ok(item)
    }

    /// Queue removal of a show at the highest priority.
    ///
    /// Other queued items for the show are dropped first; a running one is
    /// left to finish. `full` also deletes the show folder.
    pub fn remove_show(&self, show: ShowKey, full: bool) -> ShowQueueResult<ShowQueueEntry> {
        let _guard = self.inner.submit.lock();

        let reject = |reason: &str| ShowQueueError::CantRemoveShow {
            key: show,
            reason: reason.to_string(),
        };

        if !self.inner.deps.library.contains(&show) && !self.add_pending(&show) {
            return Err(reject("show is not in the library"));
        }
        if self.is_being_removed(&show) {
            return Err(reject("show is already being removed"));
        }
        if self.is_in_remove_queue(&show) {
            return Err(reject("show is already queued to be removed"));
        }

        let evicted = self.queue().remove_queued(|item| item.show() == show);
        if !evicted.is_empty() {
            info!(show = %show, count = evicted.len(), "Dropped queued items of removed show");
        }

        self.inner.deps.library.record_deleted(show);
        let item = self.queue().add_item(ShowQueueItem::Remove { show, full })?;
        info!(show = %show, full, "Show removal queued");
        Ok(item)
    }
}
