//! In-memory store for testing and offline simulation

use async_trait::async_trait;
use convoca_domain::{
    AppPost, AppPostCategory, AppPostStore, Author, AuthorStore, ContributionPost,
    ContributionStatus, ContributionStore, InboundAuthor, NewAppPost, NewContributionPost,
    NewSharePost, OutboundQueue, QueuedMessage, SharePost, ShareStore, StoreError,
};
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory implementation of every store port
#[derive(Default)]
pub struct InMemoryStore {
    authors: RwLock<Vec<Author>>,
    contributions: RwLock<Vec<ContributionPost>>,
    app_posts: RwLock<Vec<AppPost>>,
    shares: RwLock<Vec<SharePost>>,
    queue: RwLock<Vec<QueuedMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queued messages, oldest first (for inspection)
    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        let mut messages = self.queue.read().expect("queue lock").clone();
        messages.sort_by_key(|m| m.enqueued_at);
        messages
    }

    /// Snapshot of all contributions (for inspection)
    pub fn contributions_snapshot(&self) -> Vec<ContributionPost> {
        self.contributions.read().expect("contributions lock").clone()
    }
}

fn lock_err<T>(_: T) -> StoreError {
    StoreError::Database("poisoned lock".to_string())
}

#[async_trait]
impl AuthorStore for InMemoryStore {
    async fn get_author(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<Author>, StoreError> {
        let authors = self.authors.read().map_err(lock_err)?;
        Ok(authors
            .iter()
            .find(|a| a.channel == channel && a.id_in_channel == id_in_channel)
            .cloned())
    }

    async fn register_author(
        &self,
        author: &InboundAuthor,
        channel: &str,
    ) -> Result<Author, StoreError> {
        let mut authors = self.authors.write().map_err(lock_err)?;
        let registered = Author {
            id: authors.len() as i64 + 1,
            name: author.name.clone(),
            screen_name: author.screen_name.clone(),
            id_in_channel: author.id.clone(),
            channel: channel.to_string(),
            language: author.language.clone(),
            extra_info: None,
            banned: false,
            input_mistakes: 0,
            request_mistakes: 0,
        };
        authors.push(registered.clone());
        Ok(registered)
    }

    async fn update_author(&self, author: &Author) -> Result<(), StoreError> {
        let mut authors = self.authors.write().map_err(lock_err)?;
        match authors.iter_mut().find(|a| a.id == author.id) {
            Some(stored) => {
                *stored = author.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("author {}", author.id))),
        }
    }
}

#[async_trait]
impl ContributionStore for InMemoryStore {
    async fn insert_contribution(
        &self,
        post: NewContributionPost,
    ) -> Result<ContributionPost, StoreError> {
        let mut contributions = self.contributions.write().map_err(lock_err)?;
        let inserted = ContributionPost {
            id: contributions.len() as i64 + 1,
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
        contributions.push(inserted.clone());
        Ok(inserted)
    }

    async fn contribution(&self, id: i64) -> Result<Option<ContributionPost>, StoreError> {
        let contributions = self.contributions.read().map_err(lock_err)?;
        Ok(contributions.iter().find(|c| c.id == id).cloned())
    }

    async fn contribution_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<ContributionPost>, StoreError> {
        let contributions = self.contributions.read().map_err(lock_err)?;
        Ok(contributions
            .iter()
            .find(|c| c.channel == channel && c.id_in_channel == id_in_channel)
            .cloned())
    }

    async fn contributions_with_status(
        &self,
        author_id: i64,
        challenge_id: i64,
        status: ContributionStatus,
    ) -> Result<Vec<ContributionPost>, StoreError> {
        let contributions = self.contributions.read().map_err(lock_err)?;
        let mut posts: Vec<_> = contributions
            .iter()
            .filter(|c| {
                c.author_id == author_id && c.challenge_id == challenge_id && c.status == status
            })
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts)
    }

    async fn temporaries_for_author(
        &self,
        author_id: i64,
    ) -> Result<Vec<ContributionPost>, StoreError> {
        let contributions = self.contributions.read().map_err(lock_err)?;
        Ok(contributions
            .iter()
            .filter(|c| c.author_id == author_id && c.status == ContributionStatus::Temporary)
            .cloned()
            .collect())
    }

    async fn set_contribution_status(
        &self,
        id: i64,
        from: ContributionStatus,
        to: ContributionStatus,
    ) -> Result<bool, StoreError> {
        let mut contributions = self.contributions.write().map_err(lock_err)?;
        match contributions.iter_mut().find(|c| c.id == id) {
            Some(post) if post.status == from => {
                post.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("contribution {}", id))),
        }
    }

    async fn replace_permanent(
        &self,
        preserve_id: i64,
        discard_id: i64,
    ) -> Result<bool, StoreError> {
        let mut contributions = self.contributions.write().map_err(lock_err)?;
        let preserve_ready = contributions
            .iter()
            .any(|c| c.id == preserve_id && c.status == ContributionStatus::Temporary);
        let discard_ready = contributions
            .iter()
            .any(|c| c.id == discard_id && c.status == ContributionStatus::Permanent);
        if !preserve_ready || !discard_ready {
            return Ok(false);
        }
        for post in contributions.iter_mut() {
            if post.id == preserve_id {
                post.status = ContributionStatus::Permanent;
            } else if post.id == discard_id {
                post.status = ContributionStatus::Discarded;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl AppPostStore for InMemoryStore {
    async fn insert_app_post(&self, post: NewAppPost) -> Result<AppPost, StoreError> {
        let mut app_posts = self.app_posts.write().map_err(lock_err)?;
        let inserted = AppPost {
            id: app_posts.len() as i64 + 1,
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
        app_posts.push(inserted.clone());
        Ok(inserted)
    }

    async fn app_post(&self, id: i64) -> Result<Option<AppPost>, StoreError> {
        let app_posts = self.app_posts.read().map_err(lock_err)?;
        Ok(app_posts.iter().find(|p| p.id == id).cloned())
    }

    async fn app_post_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<AppPost>, StoreError> {
        let app_posts = self.app_posts.read().map_err(lock_err)?;
        Ok(app_posts
            .iter()
            .find(|p| p.channel == channel && p.id_in_channel == id_in_channel)
            .cloned())
    }

    async fn mark_answered(&self, id: i64) -> Result<bool, StoreError> {
        let mut app_posts = self.app_posts.write().map_err(lock_err)?;
        match app_posts.iter_mut().find(|p| p.id == id) {
            Some(post) if !post.answered => {
                post.answered = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("app post {}", id))),
        }
    }

    async fn unanswered_notification_for_contribution(
        &self,
        contribution_id: i64,
    ) -> Result<Option<AppPost>, StoreError> {
        let app_posts = self.app_posts.read().map_err(lock_err)?;
        Ok(app_posts
            .iter()
            .find(|p| {
                p.contribution_parent_id == Some(contribution_id)
                    && !p.answered
                    && p.category == AppPostCategory::Notification
            })
            .cloned())
    }
}

#[async_trait]
impl ShareStore for InMemoryStore {
    async fn insert_share_if_absent(
        &self,
        post: NewSharePost,
    ) -> Result<Option<SharePost>, StoreError> {
        let mut shares = self.shares.write().map_err(lock_err)?;
        if shares
            .iter()
            .any(|s| s.channel == post.channel && s.id_in_channel == post.id_in_channel)
        {
            return Ok(None);
        }
        let inserted = SharePost {
            id: shares.len() as i64 + 1,
            id_in_channel: post.id_in_channel,
            created_at: post.created_at,
            text: post.text,
            url: post.url,
            author_id: post.author_id,
            initiative_id: post.initiative_id,
            campaign_id: post.campaign_id,
            challenge_id: post.challenge_id,
            channel: post.channel,
            votes: post.votes,
            re_posts: post.re_posts,
            bookmarks: post.bookmarks,
            similarity: post.similarity,
        };
        shares.push(inserted.clone());
        Ok(Some(inserted))
    }

    async fn share_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<SharePost>, StoreError> {
        let shares = self.shares.read().map_err(lock_err)?;
        Ok(shares
            .iter()
            .find(|s| s.channel == channel && s.id_in_channel == id_in_channel)
            .cloned())
    }
}

#[async_trait]
impl OutboundQueue for InMemoryStore {
    async fn enqueue(&self, message: QueuedMessage) -> Result<(), StoreError> {
        let mut queue = self.queue.write().map_err(lock_err)?;
        queue.push(message);
        Ok(())
    }

    async fn oldest(&self, channel: &str) -> Result<Option<QueuedMessage>, StoreError> {
        let queue = self.queue.read().map_err(lock_err)?;
        Ok(queue
            .iter()
            .filter(|m| m.channel == channel)
            .min_by_key(|m| m.enqueued_at)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut queue = self.queue.write().map_err(lock_err)?;
        queue.retain(|m| m.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoca_domain::{DeliveryKind, MessagePayload};
    use time::{Duration, OffsetDateTime};

    #[tokio::test]
    async fn test_author_roundtrip() {
        let store = InMemoryStore::new();
        let author = InboundAuthor {
            id: "u1".to_string(),
            name: "Test User".to_string(),
            screen_name: "testuser".to_string(),
            url: None,
            language: None,
        };

        let mut registered = store.register_author(&author, "x").await.unwrap();
        registered.request_mistakes = 3;
        store.update_author(&registered).await.unwrap();

        let loaded = store.get_author("x", "u1").await.unwrap().unwrap();
        assert_eq!(loaded.request_mistakes, 3);
        assert!(store.get_author("x", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_guard_rejects_stale_transition() {
        let store = InMemoryStore::new();
        let post = store
            .insert_contribution(NewContributionPost {
                id_in_channel: "p1".to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                contribution: "text".to_string(),
                full_text: "text".to_string(),
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

        assert!(
            store
                .set_contribution_status(
                    post.id,
                    ContributionStatus::Temporary,
                    ContributionStatus::Permanent
                )
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_contribution_status(
                    post.id,
                    ContributionStatus::Temporary,
                    ContributionStatus::Discarded
                )
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_queue_fifo_by_enqueue_time() {
        let store = InMemoryStore::new();
        let payload = MessagePayload {
            parent_post_id: None,
            trigger_post_id: "p1".to_string(),
            category: AppPostCategory::Thanks,
            initiative_id: 1,
            campaign_id: 10,
            challenge_id: 100,
            recipient_id: "u1".to_string(),
            recipient_username: "@u1".to_string(),
            short_url: None,
        };
        for (text, second) in [("late", 10), ("early", 1)] {
            store
                .enqueue(QueuedMessage {
                    id: Uuid::new_v4(),
                    channel: "x".to_string(),
                    kind: DeliveryKind::Reply,
                    text: text.to_string(),
                    recipient_id: Some("p1".to_string()),
                    payload: payload.clone(),
                    enqueued_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(second),
                })
                .await
                .unwrap();
        }

        let oldest = store.oldest("x").await.unwrap().unwrap();
        assert_eq!(oldest.text, "early");

        store.delete(oldest.id).await.unwrap();
        assert_eq!(store.oldest("x").await.unwrap().unwrap().text, "late");
    }
}
