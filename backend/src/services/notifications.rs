//! Show lifecycle notifications
//!
//! Notifications are best effort: the show queue logs delivery failures and
//! carries on.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::library::ShowKey;

/// Event sent to notifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    ShowAdded { show: ShowKey, name: String },
    ShowAddFailed { show: ShowKey, reason: String },
    ShowRemoved { show: ShowKey, name: String, full: bool },
}

impl NotificationEvent {
    pub fn show(&self) -> ShowKey {
        match self {
            NotificationEvent::ShowAdded { show, .. }
            | NotificationEvent::ShowAddFailed { show, .. }
            | NotificationEvent::ShowRemoved { show, .. } => *show,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}

/// Deliver `event`, logging instead of failing
pub async fn notify_best_effort(notifier: &Arc<dyn Notifier>, event: NotificationEvent) {
    if let Err(e) = notifier.notify(&event).await {
        warn!(show = %event.show(), error = %e, "Notification failed");
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        match event {
            NotificationEvent::ShowAdded { show, name } => {
                info!(show = %show, name = %name, "Show added")
            }
            NotificationEvent::ShowAddFailed { show, reason } => {
                warn!(show = %show, reason = %reason, "Show could not be added")
            }
            NotificationEvent::ShowRemoved { show, name, full } => {
                info!(show = %show, name = %name, full, "Show removed")
            }
        }
        Ok(())
    }
}

/// Posts each event as JSON to a webhook, and logs it
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        LogNotifier.notify(event).await?;

        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("Failed to send webhook notification")?;

        if !response.status().is_success() {
            anyhow::bail!("Webhook returned status {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Indexer;

    #[test]
    fn test_event_serialization() {
        let event = NotificationEvent::ShowAddFailed {
            show: ShowKey::new(Indexer::Tvdb, 1),
            reason: "no name".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "show_add_failed");
        assert_eq!(json["show"]["indexer"], "tvdb");
        assert_eq!(json["reason"], "no name");
    }
}
