//! Outbound dispatcher - drains the queue through the channel adapter
//!
//! Single consumer per channel. Messages leave the queue on confirmed
//! delivery or confirmed permanent failure; transient failures stay
//! queued and are retried on the next poll, indefinitely. Delivery is
//! at-least-once; the channel's duplicate-content rejection closes the
//! loop on the rare double send.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::sleep;

use crate::model::{NewAppPost, QueuedMessage};
use crate::ports::{
    AppPostStore, ChannelClient, Clock, ContributionStore, Delivery, OutboundQueue, StoreError,
};

/// Configuration for the dispatcher loop
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Idle/retry poll interval
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

enum DispatchResult {
    Delivered,
    Dropped,
    Retry,
}

/// Long-running consumer of the outbound queue for one channel
pub struct Dispatcher {
    queue: Arc<dyn OutboundQueue>,
    channel: Arc<dyn ChannelClient>,
    app_posts: Arc<dyn AppPostStore>,
    contributions: Arc<dyn ContributionStore>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    /// Signaled on enqueue so idle waits cut short; polling remains the
    /// fallback for entries that survived a restart
    wakeup: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn OutboundQueue>,
        channel: Arc<dyn ChannelClient>,
        app_posts: Arc<dyn AppPostStore>,
        contributions: Arc<dyn ContributionStore>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
        wakeup: Arc<Notify>,
    ) -> Self {
        Self {
            queue,
            channel,
            app_posts,
            contributions,
            clock,
            config,
            wakeup,
        }
    }

    /// Run until `shutdown` flips to true. An in-flight delivery always
    /// completes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(channel = %self.channel.name(), "Dispatcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = self.queue.oldest(self.channel.name()).await;
            match next {
                Ok(Some(message)) => match self.dispatch_one(&message).await {
                    DispatchResult::Delivered | DispatchResult::Dropped => {}
                    DispatchResult::Retry => {
                        if self.wait_or_shutdown(&mut shutdown).await {
                            break;
                        }
                    }
                },
                Ok(None) => {
                    if self.wait_or_shutdown(&mut shutdown).await {
                        break;
                    }
                }
                Err(error) => {
                    tracing::error!(error = %error, "Failed to poll the outbound queue");
                    if self.wait_or_shutdown(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        tracing::info!(channel = %self.channel.name(), "Dispatcher stopped");
    }

    /// Deliver everything currently queued, stopping at the first
    /// transient failure. Returns how many entries left the queue.
    pub async fn drain(&self) -> usize {
        let mut settled = 0;
        loop {
            match self.queue.oldest(self.channel.name()).await {
                Ok(Some(message)) => match self.dispatch_one(&message).await {
                    DispatchResult::Delivered | DispatchResult::Dropped => settled += 1,
                    DispatchResult::Retry => break,
                },
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(error = %error, "Failed to poll the outbound queue");
                    break;
                }
            }
        }
        settled
    }

    /// Sleep for the poll interval, waking early on enqueue or shutdown.
    /// Returns true when shutdown was requested.
    async fn wait_or_shutdown(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = self.wakeup.notified() => false,
            _ = sleep(self.config.poll_interval) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }

    async fn dispatch_one(&self, message: &QueuedMessage) -> DispatchResult {
        let result = match message.kind {
            crate::model::DeliveryKind::Public => self.channel.post_public(&message.text).await,
            crate::model::DeliveryKind::Reply => {
                let Some(parent_id) = message.recipient_id.as_deref() else {
                    tracing::error!(message_id = %message.id, "Reply message has no recipient");
                    self.delete(message).await;
                    return DispatchResult::Dropped;
                };
                self.channel.reply_to(&message.text, parent_id).await
            }
            crate::model::DeliveryKind::Direct => {
                self.channel
                    .send_direct(&message.text, &message.payload.recipient_id)
                    .await
            }
        };

        match result {
            Ok(delivery) => {
                tracing::info!(
                    message_id = %message.id,
                    delivered_id = %delivery.id,
                    recipient = %message.payload.recipient_username,
                    "Message delivered"
                );
                self.record_delivery(message, &delivery).await;
                self.delete(message).await;
                DispatchResult::Delivered
            }
            Err(error) if error.is_permanent() => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %error,
                    "Message is permanently undeliverable, dropping it"
                );
                self.delete(message).await;
                DispatchResult::Dropped
            }
            Err(error) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %error,
                    "Delivery failed, message stays queued for retry"
                );
                DispatchResult::Retry
            }
        }
    }

    /// Persist the delivered reply as an app post, linked back into the
    /// conversation through the payload's correlation ids
    async fn record_delivery(&self, message: &QueuedMessage, delivery: &Delivery) {
        let payload = &message.payload;

        let app_parent_id = match &payload.parent_post_id {
            Some(parent) => self
                .lookup_app_parent(&message.channel, parent)
                .await
                .unwrap_or(None),
            None => None,
        };
        let contribution_parent_id = self
            .lookup_contribution(&message.channel, &payload.trigger_post_id)
            .await
            .unwrap_or(None);

        let inserted = self
            .app_posts
            .insert_app_post(NewAppPost {
                id_in_channel: delivery.id.clone(),
                created_at: self.clock.now(),
                text: delivery.text.clone(),
                url: delivery.url.clone(),
                app_parent_id,
                contribution_parent_id,
                initiative_id: payload.initiative_id,
                campaign_id: payload.campaign_id,
                challenge_id: payload.challenge_id,
                channel: message.channel.clone(),
                category: payload.category,
                delivered: true,
                short_url: payload.short_url.clone(),
                recipient_id: Some(payload.recipient_id.clone()),
            })
            .await;

        if let Err(error) = inserted {
            // The channel post exists but the record does not; remove the
            // post so the conversation state stays consistent
            tracing::error!(
                delivered_id = %delivery.id,
                error = %error,
                "Delivered post could not be recorded, deleting it from the channel"
            );
            if let Err(delete_error) = self.channel.delete_post(&delivery.id).await {
                tracing::error!(
                    delivered_id = %delivery.id,
                    error = %delete_error,
                    "Could not delete the unrecorded post, state may be inconsistent"
                );
            }
        }
    }

    async fn lookup_app_parent(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .app_posts
            .app_post_by_channel_id(channel, id_in_channel)
            .await?
            .map(|p| p.id))
    }

    async fn lookup_contribution(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .contributions
            .contribution_by_channel_id(channel, id_in_channel)
            .await?
            .map(|c| c.id))
    }

    async fn delete(&self, message: &QueuedMessage) {
        if let Err(error) = self.queue.delete(message.id).await {
            tracing::error!(
                message_id = %message.id,
                error = %error,
                "Failed to delete a queue entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AppPost, AppPostCategory, ContributionPost, ContributionStatus, DeliveryKind,
        InboundPost, MessagePayload, NewContributionPost,
    };
    use crate::ports::{ChannelError, ChannelUser};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct FakeQueue {
        messages: Mutex<Vec<QueuedMessage>>,
    }

    #[async_trait]
    impl OutboundQueue for FakeQueue {
        async fn enqueue(&self, message: QueuedMessage) -> Result<(), StoreError> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }

        async fn oldest(&self, channel: &str) -> Result<Option<QueuedMessage>, StoreError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.channel == channel)
                .min_by_key(|m| m.enqueued_at)
                .cloned())
        }

        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            self.messages.lock().unwrap().retain(|m| m.id != id);
            Ok(())
        }
    }

    struct FakeAppPosts {
        posts: Mutex<Vec<AppPost>>,
    }

    #[async_trait]
    impl AppPostStore for FakeAppPosts {
        async fn insert_app_post(&self, post: crate::model::NewAppPost) -> Result<AppPost, StoreError> {
            let mut posts = self.posts.lock().unwrap();
            let inserted = AppPost {
                id: posts.len() as i64 + 1,
                id_in_channel: post.id_in_channel,
                created_at: post.created_at,
                text: post.text,
                url: post.url,
                app_parent_id: post.app_parent_id,
                contribution_parent_id: post.contribution_parent_id,
                initiative_id: post.initiative_id,
                campaign_id: post.campaign_id,
                challenge_id: post.challenge_id,
                channel: post.channel,
                category: post.category,
                delivered: post.delivered,
                short_url: post.short_url,
                answered: false,
                recipient_id: post.recipient_id,
            };
            posts.push(inserted.clone());
            Ok(inserted)
        }

        async fn app_post(&self, id: i64) -> Result<Option<AppPost>, StoreError> {
            Ok(self.posts.lock().unwrap().iter().find(|p| p.id == id).cloned())
        }

        async fn app_post_by_channel_id(
            &self,
            channel: &str,
            id_in_channel: &str,
        ) -> Result<Option<AppPost>, StoreError> {
            Ok(self
                .posts
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.channel == channel && p.id_in_channel == id_in_channel)
                .cloned())
        }

        async fn mark_answered(&self, _id: i64) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn unanswered_notification_for_contribution(
            &self,
            _contribution_id: i64,
        ) -> Result<Option<AppPost>, StoreError> {
            Ok(None)
        }
    }

    struct FakeContributions {
        posts: Mutex<Vec<ContributionPost>>,
    }

    #[async_trait]
    impl ContributionStore for FakeContributions {
        async fn insert_contribution(
            &self,
            post: NewContributionPost,
        ) -> Result<ContributionPost, StoreError> {
            let mut posts = self.posts.lock().unwrap();
            let inserted = ContributionPost {
                id: posts.len() as i64 + 1,
                id_in_channel: post.id_in_channel,
                created_at: post.created_at,
                contribution: post.contribution,
                full_text: post.full_text,
                url: post.url,
                author_id: post.author_id,
                in_reply_to: post.in_reply_to,
                initiative_id: post.initiative_id,
                campaign_id: post.campaign_id,
                challenge_id: post.challenge_id,
                channel: post.channel,
                votes: post.votes,
                re_posts: post.re_posts,
                bookmarks: post.bookmarks,
                status: post.status,
                source: post.source,
            };
            posts.push(inserted.clone());
            Ok(inserted)
        }

        async fn contribution(&self, id: i64) -> Result<Option<ContributionPost>, StoreError> {
            Ok(self.posts.lock().unwrap().iter().find(|c| c.id == id).cloned())
        }

        async fn contribution_by_channel_id(
            &self,
            channel: &str,
            id_in_channel: &str,
        ) -> Result<Option<ContributionPost>, StoreError> {
            Ok(self
                .posts
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.channel == channel && c.id_in_channel == id_in_channel)
                .cloned())
        }

        async fn contributions_with_status(
            &self,
            _author_id: i64,
            _challenge_id: i64,
            _status: ContributionStatus,
        ) -> Result<Vec<ContributionPost>, StoreError> {
            Ok(vec![])
        }

        async fn temporaries_for_author(
            &self,
            _author_id: i64,
        ) -> Result<Vec<ContributionPost>, StoreError> {
            Ok(vec![])
        }

        async fn set_contribution_status(
            &self,
            _id: i64,
            _from: ContributionStatus,
            _to: ContributionStatus,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn replace_permanent(
            &self,
            _preserve_id: i64,
            _discard_id: i64,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }
    }

    enum Script {
        Deliver,
        Fail(fn() -> ChannelError),
    }

    struct ScriptedChannel {
        script: Mutex<Vec<Script>>,
        deliveries: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl ScriptedChannel {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: Mutex::new(script),
                deliveries: Mutex::new(vec![]),
                deleted: Mutex::new(vec![]),
            }
        }

        fn next(&self, text: &str) -> Result<Delivery, ChannelError> {
            let mut script = self.script.lock().unwrap();
            match if script.is_empty() { Script::Deliver } else { script.remove(0) } {
                Script::Deliver => {
                    let mut deliveries = self.deliveries.lock().unwrap();
                    deliveries.push(text.to_string());
                    Ok(Delivery {
                        id: format!("out-{}", deliveries.len()),
                        url: None,
                        text: text.to_string(),
                    })
                }
                Script::Fail(make) => Err(make()),
            }
        }
    }

    #[async_trait]
    impl ChannelClient for ScriptedChannel {
        async fn authenticate(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn post_public(&self, text: &str) -> Result<Delivery, ChannelError> {
            self.next(text)
        }

        async fn reply_to(&self, text: &str, _parent_id: &str) -> Result<Delivery, ChannelError> {
            self.next(text)
        }

        async fn send_direct(
            &self,
            text: &str,
            _recipient_id: &str,
        ) -> Result<Delivery, ChannelError> {
            self.next(text)
        }

        async fn get_post(&self, _id: &str) -> Result<Option<InboundPost>, ChannelError> {
            Ok(None)
        }

        async fn delete_post(&self, id: &str) -> Result<(), ChannelError> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn user_info(&self, id: &str) -> Result<ChannelUser, ChannelError> {
            Ok(ChannelUser {
                id: id.to_string(),
                name: "user".to_string(),
                screen_name: "user".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "x"
        }
    }

    struct FakeClock;

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            OffsetDateTime::UNIX_EPOCH
        }
    }

    fn queued(text: &str) -> QueuedMessage {
        QueuedMessage {
            id: Uuid::new_v4(),
            channel: "x".to_string(),
            kind: DeliveryKind::Reply,
            text: text.to_string(),
            recipient_id: Some("p1".to_string()),
            payload: MessagePayload {
                parent_post_id: None,
                trigger_post_id: "p1".to_string(),
                category: AppPostCategory::Notification,
                initiative_id: 1,
                campaign_id: 10,
                challenge_id: 100,
                recipient_id: "participant".to_string(),
                recipient_username: "@participant".to_string(),
                short_url: None,
            },
            enqueued_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn dispatcher(
        queue: Arc<FakeQueue>,
        channel: Arc<ScriptedChannel>,
        app_posts: Arc<FakeAppPosts>,
        contributions: Arc<FakeContributions>,
    ) -> Dispatcher {
        Dispatcher::new(
            queue,
            channel,
            app_posts,
            contributions,
            Arc::new(FakeClock),
            DispatcherConfig {
                poll_interval: Duration::from_millis(10),
            },
            Arc::new(Notify::new()),
        )
    }

    fn stores() -> (Arc<FakeQueue>, Arc<FakeAppPosts>, Arc<FakeContributions>) {
        (
            Arc::new(FakeQueue {
                messages: Mutex::new(vec![]),
            }),
            Arc::new(FakeAppPosts {
                posts: Mutex::new(vec![]),
            }),
            Arc::new(FakeContributions {
                posts: Mutex::new(vec![]),
            }),
        )
    }

    #[tokio::test]
    async fn test_delivery_deletes_entry_and_records_app_post() {
        let (queue, app_posts, contributions) = stores();
        contributions
            .insert_contribution(NewContributionPost {
                id_in_channel: "p1".to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                contribution: "Lake Park".to_string(),
                full_text: "Lake Park".to_string(),
                url: "https://x.com/u/status/p1".to_string(),
                author_id: 1,
                in_reply_to: None,
                initiative_id: 1,
                campaign_id: 10,
                challenge_id: 100,
                channel: "x".to_string(),
                votes: 0,
                re_posts: 0,
                bookmarks: 0,
                status: ContributionStatus::Temporary,
                source: None,
            })
            .await
            .unwrap();
        let channel = Arc::new(ScriptedChannel::new(vec![Script::Deliver]));
        queue.enqueue(queued("thanks!")).await.unwrap();

        let dispatcher = dispatcher(queue.clone(), channel.clone(), app_posts.clone(), contributions);
        let message = queue.oldest("x").await.unwrap().unwrap();
        assert!(matches!(
            dispatcher.dispatch_one(&message).await,
            DispatchResult::Delivered
        ));

        assert!(queue.messages.lock().unwrap().is_empty());
        let recorded = app_posts.posts.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].id_in_channel, "out-1");
        assert_eq!(recorded[0].contribution_parent_id, Some(1));
        assert_eq!(recorded[0].category, AppPostCategory::Notification);
        assert!(!recorded[0].answered);
    }

    #[tokio::test]
    async fn test_duplicate_error_drops_without_retry() {
        let (queue, app_posts, contributions) = stores();
        let channel = Arc::new(ScriptedChannel::new(vec![Script::Fail(|| {
            ChannelError::Duplicate
        })]));
        queue.enqueue(queued("dup")).await.unwrap();

        let dispatcher = dispatcher(queue.clone(), channel.clone(), app_posts.clone(), contributions);
        let message = queue.oldest("x").await.unwrap().unwrap();
        assert!(matches!(
            dispatcher.dispatch_one(&message).await,
            DispatchResult::Dropped
        ));

        assert!(queue.messages.lock().unwrap().is_empty());
        assert!(app_posts.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_too_long_error_drops_without_retry() {
        let (queue, app_posts, contributions) = stores();
        let channel = Arc::new(ScriptedChannel::new(vec![Script::Fail(|| {
            ChannelError::ContentTooLong { len: 300, max: 280 }
        })]));
        queue.enqueue(queued("way too long")).await.unwrap();

        let dispatcher = dispatcher(queue.clone(), channel, app_posts, contributions);
        let message = queue.oldest("x").await.unwrap().unwrap();
        assert!(matches!(
            dispatcher.dispatch_one(&message).await,
            DispatchResult::Dropped
        ));
        assert!(queue.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_leaves_entry_queued_then_retries() {
        let (queue, app_posts, contributions) = stores();
        let channel = Arc::new(ScriptedChannel::new(vec![
            Script::Fail(|| ChannelError::RateLimited(None)),
            Script::Deliver,
        ]));
        queue.enqueue(queued("retry me")).await.unwrap();

        let dispatcher = dispatcher(queue.clone(), channel.clone(), app_posts, contributions);

        let message = queue.oldest("x").await.unwrap().unwrap();
        assert!(matches!(
            dispatcher.dispatch_one(&message).await,
            DispatchResult::Retry
        ));
        assert_eq!(queue.messages.lock().unwrap().len(), 1);

        // Next poll picks the same entry and succeeds
        let message = queue.oldest("x").await.unwrap().unwrap();
        assert!(matches!(
            dispatcher.dispatch_one(&message).await,
            DispatchResult::Delivered
        ));
        assert!(queue.messages.lock().unwrap().is_empty());
        assert_eq!(channel.deliveries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_settles_queue_and_stops_on_transient_failure() {
        let (queue, app_posts, contributions) = stores();
        let channel = Arc::new(ScriptedChannel::new(vec![
            Script::Deliver,
            Script::Fail(|| ChannelError::Duplicate),
            Script::Fail(|| ChannelError::Network("down".to_string())),
        ]));
        for (offset, text) in ["one", "two", "three"].iter().enumerate() {
            let mut message = queued(text);
            message.enqueued_at =
                OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(offset as i64);
            queue.enqueue(message).await.unwrap();
        }

        let dispatcher = dispatcher(queue.clone(), channel.clone(), app_posts, contributions);
        let settled = dispatcher.drain().await;

        // Delivered + dropped-as-duplicate settle; the network failure stays
        assert_eq!(settled, 2);
        let remaining = queue.messages.lock().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "three");
    }

    #[tokio::test]
    async fn test_run_loop_drains_and_stops_on_shutdown() {
        let (queue, app_posts, contributions) = stores();
        let channel = Arc::new(ScriptedChannel::new(vec![]));
        queue.enqueue(queued("first")).await.unwrap();
        let mut second = queued("second");
        second.enqueued_at = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(1);
        queue.enqueue(second).await.unwrap();

        let dispatcher = Arc::new(dispatcher(
            queue.clone(),
            channel.clone(),
            app_posts,
            contributions,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
        };

        // Give the loop a few polls to drain both messages
        for _ in 0..50 {
            if queue.messages.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(queue.messages.lock().unwrap().is_empty());
        assert_eq!(
            channel.deliveries.lock().unwrap().as_slice(),
            ["first", "second"]
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
