//! Services behind the show queue and the scene exception cache

pub mod artwork;
pub mod backlog;
pub mod filename_parser;
pub mod indexer;
pub mod logging;
pub mod notifications;
pub mod queue;
pub mod scanner;
pub mod scene_exceptions;
pub mod show_queue;
pub mod subtitles;
pub mod text_utils;
pub mod tvmaze;

pub use artwork::{ArtworkCache, ImageCache};
pub use backlog::{BacklogRequester, BacklogSearcher, spawn_backlog_logger};
pub use indexer::{IndexerApi, IndexerError, IndexerRegistry, RatingsProvider};
pub use logging::init_tracing;
pub use notifications::{LogNotifier, NotificationEvent, Notifier, WebhookNotifier};
pub use queue::{PriorityQueue, QueueConfig, QueueError, QueueItem, QueueJob};
pub use scene_exceptions::SceneExceptionCache;
pub use show_queue::{ShowQueue, ShowQueueDeps, ShowQueueError, ShowQueueSettings};
pub use subtitles::{SidecarSubtitleScanner, SubtitleProvider};
pub use tvmaze::{TvMazeClient, TvMazeIndexer};
