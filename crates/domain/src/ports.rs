//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{
    AppPost, Author, CampaignSet, ContributionPost, ContributionStatus, InboundAuthor, InboundPost,
    NewAppPost, NewContributionPost, NewSharePost, QueuedMessage, SharePost,
};

/// Error type for campaign configuration loading
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },
    #[error("No initiatives defined in {0}")]
    Empty(String),
    #[error("Campaign '{campaign}' has no '{category}' message template")]
    MissingTemplate { campaign: String, category: String },
    #[error("Invalid answer format for {context}: {message}")]
    InvalidFormat { context: String, message: String },
    #[error("Duplicate hashtag '{hashtag}'")]
    DuplicateHashtag { hashtag: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Port for loading the campaign configuration graph
///
/// This is the read side of the relational store for operator-managed
/// entities. Loading happens at startup; a configuration error is fatal
/// for the dependent channel rather than a degraded start.
#[async_trait]
pub trait CampaignRepo: Send + Sync {
    /// Load and validate the full configuration graph
    async fn load(&self) -> Result<CampaignSet, CampaignError>;

    /// Validate without building the set
    async fn validate(&self) -> Result<(), CampaignError>;
}

/// Error type for dynamic-entity stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for participant records and their counters
#[async_trait]
pub trait AuthorStore: Send + Sync {
    /// Look up an author by channel identity
    async fn get_author(&self, channel: &str, id_in_channel: &str)
    -> Result<Option<Author>, StoreError>;

    /// Register an author on first contact
    async fn register_author(
        &self,
        author: &InboundAuthor,
        channel: &str,
    ) -> Result<Author, StoreError>;

    /// Persist mutated counters/flags/extra-info
    async fn update_author(&self, author: &Author) -> Result<(), StoreError>;
}

/// Port for contribution rows and their status transitions
#[async_trait]
pub trait ContributionStore: Send + Sync {
    async fn insert_contribution(
        &self,
        post: NewContributionPost,
    ) -> Result<ContributionPost, StoreError>;

    async fn contribution(&self, id: i64) -> Result<Option<ContributionPost>, StoreError>;

    async fn contribution_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<ContributionPost>, StoreError>;

    /// All of an author's contributions to a challenge in `status`,
    /// newest first
    async fn contributions_with_status(
        &self,
        author_id: i64,
        challenge_id: i64,
        status: ContributionStatus,
    ) -> Result<Vec<ContributionPost>, StoreError>;

    /// All of an author's TEMPORARY contributions across challenges
    async fn temporaries_for_author(
        &self,
        author_id: i64,
    ) -> Result<Vec<ContributionPost>, StoreError>;

    /// Transition a contribution from `from` to `to`. Returns false when
    /// the row was not in `from` anymore (first committer wins).
    async fn set_contribution_status(
        &self,
        id: i64,
        from: ContributionStatus,
        to: ContributionStatus,
    ) -> Result<bool, StoreError>;

    /// Atomically preserve `preserve_id` and discard `discard_id`;
    /// both transitions commit or neither does.
    async fn replace_permanent(
        &self,
        preserve_id: i64,
        discard_id: i64,
    ) -> Result<bool, StoreError>;
}

/// Port for application-authored posts
#[async_trait]
pub trait AppPostStore: Send + Sync {
    async fn insert_app_post(&self, post: NewAppPost) -> Result<AppPost, StoreError>;

    async fn app_post(&self, id: i64) -> Result<Option<AppPost>, StoreError>;

    async fn app_post_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<AppPost>, StoreError>;

    /// Flip `answered` to true. Returns false when it already was.
    async fn mark_answered(&self, id: i64) -> Result<bool, StoreError>;

    /// The pending notification linked to a contribution, if any
    async fn unanswered_notification_for_contribution(
        &self,
        contribution_id: i64,
    ) -> Result<Option<AppPost>, StoreError>;
}

/// Port for detected re-shares
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Insert unless a share with the same channel id already exists;
    /// returns None when it did.
    async fn insert_share_if_absent(
        &self,
        post: NewSharePost,
    ) -> Result<Option<SharePost>, StoreError>;

    async fn share_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<SharePost>, StoreError>;
}

/// Port for the durable outbound message queue
#[async_trait]
pub trait OutboundQueue: Send + Sync {
    async fn enqueue(&self, message: QueuedMessage) -> Result<(), StoreError>;

    /// The oldest queued message for a channel, FIFO by enqueue time
    async fn oldest(&self, channel: &str) -> Result<Option<QueuedMessage>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Error type for channel operations
///
/// Adapters map their platform's error codes onto these variants; which
/// codes mean "permanently undeliverable" is an adapter concern, the
/// core only consults [`ChannelError::is_permanent`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Duplicate content rejected by channel")]
    Duplicate,
    #[error("Content too long: {len} > {max}")]
    ContentTooLong { len: usize, max: usize },
    #[error("Rate limited, retry after: {0:?}")]
    RateLimited(Option<std::time::Duration>),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
}

impl ChannelError {
    /// Whether retrying the same message can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Duplicate | Self::ContentTooLong { .. })
    }
}

/// Result of a successful delivery through a channel
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Platform-assigned id of the created post/message
    pub id: String,
    /// URL to the delivered content, if available
    pub url: Option<String>,
    /// Text as actually delivered
    pub text: String,
}

/// Basic profile data for a channel user
#[derive(Debug, Clone)]
pub struct ChannelUser {
    pub id: String,
    pub name: String,
    pub screen_name: String,
}

/// Port for the outbound side of a social platform
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Verify credentials before starting the dependent workflows
    async fn authenticate(&self) -> Result<(), ChannelError>;

    async fn post_public(&self, text: &str) -> Result<Delivery, ChannelError>;

    async fn reply_to(&self, text: &str, parent_id: &str) -> Result<Delivery, ChannelError>;

    async fn send_direct(&self, text: &str, recipient_id: &str)
    -> Result<Delivery, ChannelError>;

    async fn get_post(&self, id: &str) -> Result<Option<InboundPost>, ChannelError>;

    async fn delete_post(&self, id: &str) -> Result<(), ChannelError>;

    async fn user_info(&self, id: &str) -> Result<ChannelUser, ChannelError>;

    /// Channel name (e.g. "x")
    fn name(&self) -> &'static str;
}

/// Port for the inbound side: a streaming subscription yielding
/// normalized post records, one at a time
#[async_trait]
pub trait ChannelListener: Send + Sync {
    /// The next post from the stream. `Ok(None)` means the current
    /// backlog is drained; errors surface connection problems and the
    /// caller decides whether to retry.
    async fn next_post(&mut self) -> Result<Option<InboundPost>, ChannelError>;
}

/// Port for shortening initiative URLs before they enter a reply
#[async_trait]
pub trait UrlShortener: Send + Sync {
    /// Shorten `url`, falling back to the input on any failure
    async fn shorten(&self, url: &str) -> String;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
