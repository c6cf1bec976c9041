//! Conversation read tracking.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rota_store::{CommunicationQuery, CommunicationType, RecordStore};

use crate::config::MessagingConfig;
use crate::error::{require_non_blank, MessagingResult};
use crate::feed::{CommunicationFeed, RefreshOutcome};
use crate::scope::TaskScope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkReadOutcome {
    /// Rows the store actually flipped to read.
    pub marked: usize,
    /// `None` when nothing needed marking.
    pub refresh: Option<RefreshOutcome>,
    pub pulses_scheduled: usize,
}

impl MarkReadOutcome {
    fn untouched() -> Self {
        Self {
            marked: 0,
            refresh: None,
            pulses_scheduled: 0,
        }
    }
}

pub struct ReadStatusTracker {
    store: Arc<dyn RecordStore>,
    scope: TaskScope,
    admin_refresh_pulses: Vec<Duration>,
}

impl ReadStatusTracker {
    pub fn new(store: Arc<dyn RecordStore>, scope: TaskScope, config: &MessagingConfig) -> Self {
        Self {
            store,
            scope,
            admin_refresh_pulses: config.admin_refresh_pulses.clone(),
        }
    }

    /// Marks unread messages from `counterpart_id` to the feed's viewer as read.
    #[tracing::instrument(
        name = "rota_messaging.read_status.mark_conversation_read",
        skip(self, feed),
        fields(viewer_id = %feed.viewer().id)
    )]
    pub async fn mark_conversation_read(
        &self,
        feed: &Arc<CommunicationFeed>,
        counterpart_id: &str,
    ) -> MessagingResult<MarkReadOutcome> {
        require_non_blank("counterpart_id", counterpart_id)?;
        let counterpart_id = counterpart_id.trim();
        let ids = self.unread_from(feed, counterpart_id).await?;
        if ids.is_empty() {
            tracing::debug!("conversation already read");
            return Ok(MarkReadOutcome::untouched());
        }

        let marked = self
            .store
            .mark_communications_read(&ids, Utc::now())
            .await?;
        tracing::debug!(selected = ids.len(), marked, "conversation marked read");

        let refresh = match feed.refresh_now().await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%error, marked, "feed refresh after mark-read failed");
                RefreshOutcome::Failed
            }
        };

        let mut pulses_scheduled = 0;
        if feed.viewer().is_administrator() {
            for delay in self.admin_refresh_pulses.iter().copied() {
                let feed = Arc::clone(feed);
                let spawned = self.scope.spawn("admin_refresh_pulse", async move {
                    tokio::time::sleep(delay).await;
                    if let Err(error) = feed.refresh_now().await {
                        tracing::debug!(%error, "admin refresh pulse failed");
                    }
                });
                if spawned {
                    pulses_scheduled += 1;
                }
            }
        }

        Ok(MarkReadOutcome {
            marked,
            refresh: Some(refresh),
            pulses_scheduled,
        })
    }

    /// Reads from the store; the feed snapshot may predate newer messages.
    async fn unread_from(
        &self,
        feed: &CommunicationFeed,
        counterpart_id: &str,
    ) -> MessagingResult<Vec<String>> {
        let viewer_id = feed.viewer().id.as_str();
        let rows = self
            .store
            .query_communications(CommunicationQuery {
                sender_id: Some(counterpart_id.to_string()),
                recipient_id: Some(viewer_id.to_string()),
                types: Some(CommunicationType::CONVERSATION_TRACKED.to_vec()),
                unread_only: true,
                ..CommunicationQuery::default()
            })
            .await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }
}
