//! Showkeeper - show queue and scene exception service
//!
//! Loads the library, starts the show queue worker and the scheduled jobs,
//! and runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use showkeeper::config::Config;
use showkeeper::db::Database;
use showkeeper::jobs::{self, ScheduleConfig};
use showkeeper::library::{Indexer, LibraryContext};
use showkeeper::services::indexer::IndexerRegistry;
use showkeeper::services::notifications::Notifier;
use showkeeper::services::scene_exceptions::{
    AniDbSource, CustomExceptionSource, SceneExceptionCache, XemSource,
};
use showkeeper::services::{
    ArtworkCache, BacklogRequester, LogNotifier, ShowQueue, ShowQueueDeps, ShowQueueSettings,
    SidecarSubtitleScanner, TvMazeClient, TvMazeIndexer, WebhookNotifier, init_tracing,
    spawn_backlog_logger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    init_tracing(config.log_format);
    tracing::info!("Starting Showkeeper");

    let db = Database::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    // Library
    let library = Arc::new(LibraryContext::new());
    for show in db.load_library().await? {
        library.insert(show);
    }
    tracing::info!(shows = library.len(), "Library loaded");

    // Scene exceptions
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("Showkeeper/0.1")
        .build()?;
    let cooldown = config.exception_refresh_interval;

    let mut scene_exceptions = SceneExceptionCache::new(db.clone(), library.clone());
    if !config.custom_exception_urls.is_empty() {
        let urls = config
            .custom_exception_urls
            .iter()
            .map(|(indexer, url)| (*indexer, url.clone()))
            .collect();
        scene_exceptions = scene_exceptions
            .with_source(Arc::new(CustomExceptionSource::new(http.clone(), urls)), cooldown);
    }
    scene_exceptions =
        scene_exceptions.with_source(Arc::new(XemSource::new(http.clone(), &config.xem_url)), cooldown);
    if config.anidb_enabled {
        scene_exceptions = scene_exceptions.with_source(
            Arc::new(AniDbSource::new(http.clone(), &config.anidb_titles_url)),
            cooldown,
        );
    }
    let scene_exceptions = Arc::new(scene_exceptions);
    let loaded = scene_exceptions.load_from_store().await?;
    tracing::info!(
        exceptions = loaded,
        sources = ?scene_exceptions.source_names(),
        "Scene exceptions loaded"
    );

    for show in library.list_shows() {
        library.name_cache().build_for_show(&show, &scene_exceptions);
    }

    // Collaborators
    let tvmaze = Arc::new(TvMazeClient::new());
    let indexers = IndexerRegistry::new()
        .with(Indexer::TvMaze, Arc::new(TvMazeIndexer::new(tvmaze.clone(), Indexer::TvMaze)))
        .with(Indexer::Tvdb, Arc::new(TvMazeIndexer::new(tvmaze.clone(), Indexer::Tvdb)));

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let cancel = CancellationToken::new();
    let (backlog, backlog_rx) = BacklogRequester::channel();
    let backlog_task = spawn_backlog_logger(backlog_rx, cancel.clone());

    let settings = ShowQueueSettings {
        root_dir: config.default_root_dir().unwrap_or_default(),
        create_missing_show_dirs: config.create_missing_show_dirs,
        language: config.indexer_language.clone(),
        default_status: config.default_episode_status,
        default_quality: config.default_quality.clone(),
        poll_interval: config.queue_poll_interval,
    };

    let show_queue = ShowQueue::new(ShowQueueDeps {
        library: library.clone(),
        db: db.clone(),
        indexers,
        scene_exceptions: scene_exceptions.clone(),
        images: Arc::new(ArtworkCache::new(&config.cache_path)),
        notifier,
        subtitles: Arc::new(SidecarSubtitleScanner),
        backlog: Arc::new(backlog),
        ratings: Some(tvmaze),
        settings,
    });
    show_queue.start();
    tracing::info!("Show queue started");

    let schedule = ScheduleConfig {
        exception_refresh_cron: config.exception_refresh_cron.clone(),
        show_update_cron: config.show_update_cron.clone(),
    };
    let mut scheduler = jobs::start_scheduler(
        &schedule,
        library.clone(),
        scene_exceptions.clone(),
        show_queue.clone(),
    )
    .await?;

    // Initial exception refresh; cooldowns keep restarts cheap
    let startup_exceptions = scene_exceptions.clone();
    tokio::spawn(async move {
        if let Err(e) = startup_exceptions.retrieve_exceptions(false).await {
            tracing::warn!(error = %e, "Startup scene exception refresh failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Failed to stop job scheduler");
    }
    show_queue.shutdown().await;
    cancel.cancel();
    if let Err(e) = backlog_task.await {
        tracing::warn!(error = %e, "Backlog consumer ended abnormally");
    }

    tracing::info!("Showkeeper stopped");
    Ok(())
}
