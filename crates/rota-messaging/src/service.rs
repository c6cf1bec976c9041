use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rota_store::RecordStore;
use rota_types::ViewerCommunication;

use crate::aggregator::{FetchOptions, MessageReadAggregator};
use crate::config::MessagingConfig;
use crate::error::MessagingResult;
use crate::feed::CommunicationFeed;
use crate::identity::IdentityResolver;
use crate::notify::{NotificationChannel, NotificationDispatcher};
use crate::read_status::{MarkReadOutcome, ReadStatusTracker};
use crate::response::{ResponseOutcome, ResponseProcessor, ResponseRequest};
use crate::scope::TaskScope;
use crate::write::{MessageReceipt, MessageWriteService, NewMessageRequest};

/// Entry point wiring the pipeline components around one store and task scope.
pub struct MessagingService {
    config: MessagingConfig,
    scope: TaskScope,
    resolver: Arc<IdentityResolver>,
    writer: MessageWriteService,
    aggregator: MessageReadAggregator,
    responder: ResponseProcessor,
    read_tracker: ReadStatusTracker,
    feeds: Mutex<HashMap<String, Arc<CommunicationFeed>>>,
}

impl MessagingService {
    /// Builds the service with the notification channel named in `config`.
    pub fn new(store: Arc<dyn RecordStore>, config: MessagingConfig) -> MessagingResult<Self> {
        config.validate()?;
        let notifier = NotificationDispatcher::from_config(&config.notification)?;
        Ok(Self::assemble(store, config, notifier))
    }

    pub fn with_notification_channel(
        store: Arc<dyn RecordStore>,
        config: MessagingConfig,
        channel: Arc<dyn NotificationChannel>,
    ) -> MessagingResult<Self> {
        config.validate()?;
        Ok(Self::assemble(
            store,
            config,
            NotificationDispatcher::new(channel),
        ))
    }

    fn assemble(
        store: Arc<dyn RecordStore>,
        config: MessagingConfig,
        notifier: NotificationDispatcher,
    ) -> Self {
        let scope = TaskScope::new();
        let resolver = Arc::new(IdentityResolver::new(Arc::clone(&store), &config));
        tracing::debug!(
            notification_channel = notifier.channel_name(),
            "messaging service assembled"
        );
        Self {
            writer: MessageWriteService::new(
                Arc::clone(&store),
                Arc::clone(&resolver),
                notifier.clone(),
                scope.clone(),
                &config,
            ),
            aggregator: MessageReadAggregator::new(Arc::clone(&store)),
            responder: ResponseProcessor::new(Arc::clone(&store), Arc::clone(&resolver), notifier),
            read_tracker: ReadStatusTracker::new(store, scope.clone(), &config),
            resolver,
            scope,
            config,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    pub fn resolver(&self) -> &IdentityResolver {
        self.resolver.as_ref()
    }

    pub async fn create_message(&self, request: NewMessageRequest) -> MessagingResult<MessageReceipt> {
        self.writer.create_message(request).await
    }

    pub async fn respond(&self, request: ResponseRequest) -> MessagingResult<ResponseOutcome> {
        self.responder.respond(request).await
    }

    pub async fn fetch_communications(
        &self,
        user_id: &str,
        options: FetchOptions,
    ) -> MessagingResult<Vec<ViewerCommunication>> {
        self.aggregator.fetch_communications(user_id, options).await
    }

    /// Returns the cached feed for `viewer_id`, creating it and starting its poller on first use.
    pub async fn feed_for(&self, viewer_id: &str) -> MessagingResult<Arc<CommunicationFeed>> {
        let viewer = self.resolver.resolve_exact(viewer_id).await?;
        let mut feeds = self.lock_feeds();
        if let Some(feed) = feeds.get(&viewer.id) {
            return Ok(Arc::clone(feed));
        }

        let feed = Arc::new(CommunicationFeed::new(
            viewer,
            self.aggregator.clone(),
            &self.config,
        ));
        let polling = feed.spawn_poller(&self.scope);
        tracing::debug!(
            viewer_id = %feed.viewer().id,
            poll_interval_ms = feed.poll_interval().as_millis() as u64,
            polling,
            "feed opened"
        );
        feeds.insert(feed.viewer().id.clone(), Arc::clone(&feed));
        Ok(feed)
    }

    /// Drops the cached feed for `viewer_id` and stops its poller.
    ///
    /// Accepts the canonical profile id in any case; returns false when no feed was open.
    pub fn release_feed(&self, viewer_id: &str) -> bool {
        let viewer_id = viewer_id.trim();
        let mut feeds = self.lock_feeds();
        let key = feeds
            .keys()
            .find(|key| key.eq_ignore_ascii_case(viewer_id))
            .cloned();
        match key.and_then(|key| feeds.remove(&key)) {
            Some(feed) => {
                feed.stop_polling();
                tracing::debug!(viewer_id = %feed.viewer().id, "feed released");
                true
            }
            None => false,
        }
    }

    pub fn open_feeds(&self) -> usize {
        self.lock_feeds().len()
    }

    /// Stops every feed poller, then waits for detached notifications,
    /// verification, and refresh pulses.
    pub async fn drain(&self) {
        let released: Vec<Arc<CommunicationFeed>> = self
            .lock_feeds()
            .drain()
            .map(|(_, feed)| feed)
            .collect();
        for feed in &released {
            feed.stop_polling();
        }
        self.scope.drain().await;
    }

    pub async fn mark_read(
        &self,
        viewer_id: &str,
        counterpart_id: &str,
    ) -> MessagingResult<MarkReadOutcome> {
        let feed = self.feed_for(viewer_id).await?;
        self.read_tracker
            .mark_conversation_read(&feed, counterpart_id)
            .await
    }

    /// Cancels pollers and pending verification, then waits for every task.
    pub async fn shutdown(&self) {
        self.lock_feeds().clear();
        self.scope.shutdown().await;
    }

    fn lock_feeds(&self) -> MutexGuard<'_, HashMap<String, Arc<CommunicationFeed>>> {
        self.feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::MessagingService;
    use crate::config::{MessagingConfig, NotificationMode};
    use crate::notify::testing::RecordingChannel;
    use crate::MessagingError;
    use crate::write::NewMessageRequest;
    use rota_store::{InMemoryRecordStore, Profile, ProfileRole, RecordStore};
    use rota_types::CommunicationType;
    use std::sync::Arc;
    use std::time::Duration;

    async fn two_employee_service(config: MessagingConfig) -> MessagingService {
        let memory = Arc::new(InMemoryRecordStore::new());
        for (id, email) in [("emp-a", "a@rota.local"), ("emp-b", "b@rota.local")] {
            memory
                .put_profile(Profile::new(id, id, email, ProfileRole::Employee))
                .await
                .expect("seed");
        }
        let store: Arc<dyn RecordStore> = memory;
        MessagingService::with_notification_channel(
            store,
            config,
            Arc::new(RecordingChannel::default()),
        )
        .expect("service")
    }

    fn general(sender: &str, recipient: &str, message: &str) -> NewMessageRequest {
        NewMessageRequest {
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            message: message.to_string(),
            communication_type: CommunicationType::General,
            admin_cc: None,
            shift: None,
        }
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let mut config = MessagingConfig::default();
        config.notification.mode = NotificationMode::Webhook;
        assert!(matches!(
            MessagingService::new(store, config),
            Err(MessagingError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn feeds_are_cached_per_resolved_viewer() {
        let memory = Arc::new(InMemoryRecordStore::new());
        memory
            .put_profile(Profile::new("emp-a", "A", "a@rota.local", ProfileRole::Employee))
            .await
            .expect("seed");
        let store: Arc<dyn RecordStore> = memory.clone();
        let service = MessagingService::with_notification_channel(
            store,
            MessagingConfig::default(),
            Arc::new(RecordingChannel::default()),
        )
        .expect("service");

        let first = service.feed_for("emp-a").await.expect("feed");
        let second = service.feed_for(" EMP-A ").await.expect("feed");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            service.feed_for("emp-ghost").await,
            Err(MessagingError::NotFound { .. })
        ));
        service.shutdown().await;
        assert!(service.scope().is_shutdown());
    }

    #[tokio::test]
    async fn opened_feed_polls_for_new_messages() {
        let service = two_employee_service(MessagingConfig {
            user_poll_interval: Duration::from_millis(20),
            refresh_min_interval: Duration::from_millis(5),
            ..MessagingConfig::default()
        })
        .await;

        let feed = service.feed_for("emp-b").await.expect("feed");
        assert_eq!(service.scope().active_tasks(), 1);
        service
            .create_message(general("emp-a", "emp-b", "swap Tuesday?"))
            .await
            .expect("send");

        let polled = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if feed.unread_count() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "poller never picked up the new message");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn second_mark_read_catches_messages_sent_in_between() {
        let service = two_employee_service(MessagingConfig::default()).await;
        service
            .create_message(general("emp-a", "emp-b", "first"))
            .await
            .expect("send first");
        let first = service.mark_read("emp-b", "emp-a").await.expect("mark read");
        assert_eq!(first.marked, 1);

        service
            .create_message(general("emp-a", "emp-b", "second"))
            .await
            .expect("send second");
        let second = service.mark_read("emp-b", "emp-a").await.expect("mark read again");
        assert_eq!(second.marked, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn released_feed_stops_polling_and_reopens_fresh() {
        let service = two_employee_service(MessagingConfig {
            user_poll_interval: Duration::from_millis(20),
            ..MessagingConfig::default()
        })
        .await;

        let first = service.feed_for("emp-a").await.expect("feed");
        service.feed_for("emp-b").await.expect("feed");
        assert_eq!(service.open_feeds(), 2);

        assert!(service.release_feed(" EMP-A "));
        assert!(!service.release_feed("emp-a"));
        assert_eq!(service.open_feeds(), 1);

        let reopened = service.feed_for("emp-a").await.expect("feed");
        assert!(!Arc::ptr_eq(&first, &reopened));

        tokio::time::timeout(Duration::from_secs(1), service.drain())
            .await
            .expect("drain returns once pollers stop");
        assert_eq!(service.open_feeds(), 0);
        assert_eq!(service.scope().active_tasks(), 0);
        assert!(!service.scope().is_shutdown());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn mixed_case_sender_is_visible_to_both_sides() {
        let service = two_employee_service(MessagingConfig::default()).await;
        service
            .create_message(general(" EMP-A ", "emp-b", "covering Friday"))
            .await
            .expect("send");

        let sent = service
            .fetch_communications("emp-a", Default::default())
            .await
            .expect("sender fetch");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_mine());
        assert_eq!(sent[0].communication.sender_id, "emp-a");

        let marked = service.mark_read("emp-b", "emp-a").await.expect("mark read");
        assert_eq!(marked.marked, 1);
        service.shutdown().await;
    }
}
