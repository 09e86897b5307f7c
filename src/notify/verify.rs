use async_trait::async_trait;
use std::sync::Arc;

use super::scheduler::{FireGate, Verdict};
use super::sync::{NotificationSource, SyncStateStore};
use crate::core::notification::{ScheduledNotificationInfo, ServerNotification};

/// Re-checks a reminder against the server right before it is shown.
///
/// A reminder the server no longer lists is suppressed. When the server
/// cannot be reached the reminder is shown anyway.
pub struct PreFireVerifier {
    source: Arc<dyn NotificationSource>,
    state: Arc<SyncStateStore>,
}

impl PreFireVerifier {
    pub fn new(source: Arc<dyn NotificationSource>, state: Arc<SyncStateStore>) -> Self {
        Self { source, state }
    }

    pub async fn verify(&self, identifier: &str) -> Verdict {
        let within = self.state.horizon().days();
        match self.source.fetch_notifications(within).await {
            Ok(current) => {
                if current
                    .iter()
                    .map(ServerNotification::identifier)
                    .any(|id| id == identifier)
                {
                    Verdict::Present
                } else {
                    log::info!("Reminder {} is no longer active on the server", identifier);
                    Verdict::Suppress
                }
            }
            Err(e) => {
                log::warn!("Could not verify {} before firing: {}", identifier, e);
                Verdict::Present
            }
        }
    }
}

#[async_trait]
impl FireGate for PreFireVerifier {
    async fn check(&self, info: &ScheduledNotificationInfo) -> Verdict {
        self.verify(&info.identifier).await
    }
}
