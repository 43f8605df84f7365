//! Backlog search requests
//!
//! Adding a show whose episodes default to wanted asks for a backlog search.
//! Requests go over a channel; search providers themselves live elsewhere, so
//! the bundled consumer only logs what would be searched.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::library::{EpisodeStatus, Show, ShowKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogRequest {
    pub show: ShowKey,
    pub name: String,
    /// `(season, episode)` of every wanted episode
    pub wanted: Vec<(i32, i32)>,
}

impl BacklogRequest {
    pub fn for_show(show: &Show) -> Self {
        Self {
            show: show.key,
            name: show.name.clone(),
            wanted: show
                .episodes
                .values()
                .filter(|ep| ep.status == EpisodeStatus::Wanted)
                .map(|ep| (ep.season, ep.episode))
                .collect(),
        }
    }
}

pub trait BacklogSearcher: Send + Sync {
    fn request_backlog(&self, show: &Show);
}

/// Sends backlog requests to a consumer task
#[derive(Clone)]
pub struct BacklogRequester {
    tx: mpsc::UnboundedSender<BacklogRequest>,
}

impl BacklogRequester {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BacklogRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BacklogSearcher for BacklogRequester {
    fn request_backlog(&self, show: &Show) {
        let request = BacklogRequest::for_show(show);
        if request.wanted.is_empty() {
            debug!(show = %show.key, "Nothing wanted, no backlog search");
            return;
        }
        if self.tx.send(request).is_err() {
            warn!(show = %show.key, "Backlog consumer is gone, request dropped");
        }
    }
}

/// Consume requests until cancelled or every requester is dropped
pub fn spawn_backlog_logger(
    mut rx: mpsc::UnboundedReceiver<BacklogRequest>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    info!(
                        show = %request.show,
                        name = %request.name,
                        wanted = request.wanted.len(),
                        "Backlog search requested"
                    );
                }
            }
        }
        debug!("Backlog consumer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Episode, Indexer};

    #[tokio::test]
    async fn test_only_wanted_episodes_requested() {
        let (requester, mut rx) = BacklogRequester::channel();
        let mut show = Show::new(ShowKey::new(Indexer::Tvdb, 3), "Show", "/tv/Show");

        requester.request_backlog(&show);
        assert!(rx.try_recv().is_err());

        for (number, status) in [(1, EpisodeStatus::Wanted), (2, EpisodeStatus::Skipped)] {
            show.episodes.insert(
                (1, number),
                Episode {
                    season: 1,
                    episode: number,
                    name: String::new(),
                    airdate: None,
                    status,
                    location: None,
                    subtitles: Vec::new(),
                },
            );
        }
        requester.request_backlog(&show);
        let request = rx.recv().await.unwrap();
        assert_eq!(request.wanted, vec![(1, 1)]);
    }
}
