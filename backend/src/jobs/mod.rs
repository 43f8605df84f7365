//! Background job scheduling

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::library::LibraryContext;
use crate::services::{SceneExceptionCache, ShowQueue};

/// Cron expressions for the scheduled jobs
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub exception_refresh_cron: String,
    pub show_update_cron: String,
}

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    schedule: &ScheduleConfig,
    library: Arc<LibraryContext>,
    scene_exceptions: Arc<SceneExceptionCache>,
    show_queue: ShowQueue,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Scene exceptions; each source enforces its own cooldown
    let exceptions = scene_exceptions.clone();
    let exception_job = Job::new_async(schedule.exception_refresh_cron.as_str(), move |_uuid, _l| {
        let exceptions = exceptions.clone();
        Box::pin(async move {
            debug!("Running scene exception refresh");
            if let Err(e) = exceptions.retrieve_exceptions(false).await {
                tracing::error!("Scene exception refresh error: {}", e);
            }
        })
    })?;
    scheduler.add(exception_job).await?;

    // Daily show update
    let update_job = Job::new_async(schedule.show_update_cron.as_str(), move |_uuid, _l| {
        let library = library.clone();
        let show_queue = show_queue.clone();
        Box::pin(async move {
            info!("Running scheduled show update");
            let queued = queue_show_updates(&library, &show_queue);
            info!(queued, "Scheduled show update queued");
        })
    })?;
    scheduler.add(update_job).await?;

    scheduler.start().await?;
    info!("Job scheduler started");

    Ok(scheduler)
}

/// Queue an update for every continuing, unpaused show.
///
/// Shows that already have an update pending are skipped.
pub fn queue_show_updates(library: &LibraryContext, show_queue: &ShowQueue) -> usize {
    let mut queued = 0;
    for show in library.list_shows() {
        if show.flags.paused || show.is_ended() {
            continue;
        }
        match show_queue.update_show(show.key, None) {
            Ok(_) => queued += 1,
            Err(e) => warn!(show = %show.key, error = %e, "Skipping scheduled update"),
        }
    }
    queued
}
