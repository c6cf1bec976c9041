//! Per-viewer cached communication feed with throttled refresh.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rota_store::Profile;
use rota_types::ViewerCommunication;
use tokio::sync::watch;

use crate::aggregator::{FetchOptions, MessageReadAggregator};
use crate::config::MessagingConfig;
use crate::error::MessagingResult;
use crate::scope::TaskScope;
use crate::throttle::{RefreshSkip, RefreshThrottle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub communications: Vec<ViewerCommunication>,
    pub unread_count: usize,
    pub refreshed_at: DateTime<Utc>,
}

impl FeedSnapshot {
    fn from_rows(communications: Vec<ViewerCommunication>) -> Self {
        let unread_count = communications
            .iter()
            .filter(|row| row.is_unread_for_viewer())
            .count();
        Self {
            communications,
            unread_count,
            refreshed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Throttled,
    InFlight,
    /// The store failed; the previous snapshot is kept.
    Failed,
}

impl RefreshOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Refreshed => "refreshed",
            Self::Throttled => "throttled",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
        }
    }
}

impl From<RefreshSkip> for RefreshOutcome {
    fn from(value: RefreshSkip) -> Self {
        match value {
            RefreshSkip::Throttled => Self::Throttled,
            RefreshSkip::InFlight => Self::InFlight,
        }
    }
}

pub struct CommunicationFeed {
    viewer: Profile,
    options: FetchOptions,
    aggregator: MessageReadAggregator,
    throttle: RefreshThrottle,
    poll_interval: Duration,
    snapshot: RwLock<Option<FeedSnapshot>>,
    poller_stop: watch::Sender<bool>,
}

impl CommunicationFeed {
    pub fn new(viewer: Profile, aggregator: MessageReadAggregator, config: &MessagingConfig) -> Self {
        let administrator = viewer.is_administrator();
        Self {
            options: FetchOptions {
                exclude_shift_coverage: false,
                admin_scheduling_surface: administrator,
            },
            poll_interval: config.poll_interval_for(administrator),
            throttle: RefreshThrottle::new(config.refresh_min_interval),
            aggregator,
            viewer,
            snapshot: RwLock::new(None),
            poller_stop: watch::channel(false).0,
        }
    }

    pub fn viewer(&self) -> &Profile {
        &self.viewer
    }

    pub fn options(&self) -> FetchOptions {
        self.options
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn snapshot(&self) -> Option<FeedSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn unread_count(&self) -> usize {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(0, |snapshot| snapshot.unread_count)
    }

    /// Refreshes unless one ran within the minimum interval or is still running.
    pub async fn refresh(&self) -> MessagingResult<RefreshOutcome> {
        self.refresh_with(false).await
    }

    /// Refreshes immediately, but never alongside another refresh.
    pub async fn refresh_now(&self) -> MessagingResult<RefreshOutcome> {
        self.refresh_with(true).await
    }

    #[tracing::instrument(
        name = "rota_messaging.feed.refresh",
        skip(self),
        fields(viewer_id = %self.viewer.id)
    )]
    async fn refresh_with(&self, force: bool) -> MessagingResult<RefreshOutcome> {
        let _permit = match self.throttle.try_begin(force) {
            Ok(permit) => permit,
            Err(skip) => {
                tracing::debug!(?skip, "feed refresh skipped");
                return Ok(skip.into());
            }
        };
        let rows = self
            .aggregator
            .fetch_communications(&self.viewer.id, self.options)
            .await?;
        let snapshot = FeedSnapshot::from_rows(rows);
        tracing::debug!(
            rows = snapshot.communications.len(),
            unread = snapshot.unread_count,
            "feed refreshed"
        );
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
        Ok(RefreshOutcome::Refreshed)
    }

    /// Polls on the role cadence until `scope` shuts down or `stop_polling` is called.
    pub fn spawn_poller(self: &Arc<Self>, scope: &TaskScope) -> bool {
        let feed = Arc::clone(self);
        let mut stop = self.poller_stop.subscribe();
        scope.spawn("feed_poller", async move {
            let mut interval = tokio::time::interval(feed.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => {
                        tracing::debug!(viewer_id = %feed.viewer.id, "feed poller stopped");
                        return;
                    }
                    _ = interval.tick() => {}
                }
                if let Err(error) = feed.refresh().await {
                    tracing::warn!(viewer_id = %feed.viewer.id, %error, "feed poll failed");
                }
            }
        })
    }

    /// Ends this feed's poller after its current refresh.
    pub fn stop_polling(&self) {
        self.poller_stop.send_replace(true);
    }
}
