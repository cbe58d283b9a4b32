//! SQLite store for the dynamic conversation entities
//!
//! One pool backs all of the mutable-store ports: authors, contribution
//! posts, app posts, share posts, and the outbound queue. Status
//! transitions are guarded UPDATEs so the first committer wins; the
//! preserve-new/discard-old pair of a change confirmation runs in one
//! transaction.

use async_trait::async_trait;
use convoca_domain::{
    AppPost, AppPostCategory, AppPostStore, Author, AuthorStore, ContributionPost,
    ContributionStatus, ContributionStore, DeliveryKind, InboundAuthor, MessagePayload,
    NewAppPost, NewContributionPost, NewSharePost, OutboundQueue, QueuedMessage, SharePost,
    ShareStore, StoreError,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use time::OffsetDateTime;
use uuid::Uuid;

/// SQLite-backed store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("Failed to create directory: {}", e)))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                screen_name TEXT NOT NULL,
                id_in_channel TEXT NOT NULL,
                channel TEXT NOT NULL,
                language TEXT,
                extra_info TEXT,
                banned INTEGER NOT NULL DEFAULT 0,
                input_mistakes INTEGER NOT NULL DEFAULT 0,
                request_mistakes INTEGER NOT NULL DEFAULT 0,
                UNIQUE(channel, id_in_channel)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS contribution_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_in_channel TEXT NOT NULL,
                created_at TEXT NOT NULL,
                contribution TEXT NOT NULL,
                full_text TEXT NOT NULL,
                url TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                in_reply_to TEXT,
                initiative_id INTEGER NOT NULL,
                campaign_id INTEGER NOT NULL,
                challenge_id INTEGER NOT NULL,
                channel TEXT NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0,
                re_posts INTEGER NOT NULL DEFAULT 0,
                bookmarks INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                source TEXT
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_contribution_author_challenge
            ON contribution_posts(author_id, challenge_id, status)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_contribution_channel_id
            ON contribution_posts(channel, id_in_channel)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS app_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_in_channel TEXT NOT NULL,
                created_at TEXT NOT NULL,
                text TEXT NOT NULL,
                url TEXT,
                app_parent_id INTEGER,
                contribution_parent_id INTEGER,
                initiative_id INTEGER NOT NULL,
                campaign_id INTEGER NOT NULL,
                challenge_id INTEGER NOT NULL,
                channel TEXT NOT NULL,
                category TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 1,
                short_url TEXT,
                answered INTEGER NOT NULL DEFAULT 0,
                recipient_id TEXT
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_app_post_channel_id
            ON app_posts(channel, id_in_channel)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS share_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_in_channel TEXT NOT NULL,
                created_at TEXT NOT NULL,
                text TEXT NOT NULL,
                url TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                initiative_id INTEGER NOT NULL,
                campaign_id INTEGER NOT NULL,
                challenge_id INTEGER NOT NULL,
                channel TEXT NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0,
                re_posts INTEGER NOT NULL DEFAULT 0,
                bookmarks INTEGER NOT NULL DEFAULT 0,
                similarity INTEGER NOT NULL DEFAULT 0,
                UNIQUE(channel, id_in_channel)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS outbound_queue (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                recipient_id TEXT,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_channel_time
            ON outbound_queue(channel, enqueued_at)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(())
    }
}

fn format_ts(ts: OffsetDateTime) -> Result<String, StoreError> {
    ts.format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_ts(s: &str) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

#[derive(FromRow)]
struct AuthorRow {
    id: i64,
    name: String,
    screen_name: String,
    id_in_channel: String,
    channel: String,
    language: Option<String>,
    extra_info: Option<String>,
    banned: bool,
    input_mistakes: i64,
    request_mistakes: i64,
}

impl From<AuthorRow> for Author {
    fn from(row: AuthorRow) -> Self {
        Author {
            id: row.id,
            name: row.name,
            screen_name: row.screen_name,
            id_in_channel: row.id_in_channel,
            channel: row.channel,
            language: row.language,
            extra_info: row.extra_info,
            banned: row.banned,
            input_mistakes: row.input_mistakes,
            request_mistakes: row.request_mistakes,
        }
    }
}

#[derive(FromRow)]
struct ContributionRow {
    id: i64,
    id_in_channel: String,
    created_at: String,
    contribution: String,
    full_text: String,
    url: String,
    author_id: i64,
    in_reply_to: Option<String>,
    initiative_id: i64,
    campaign_id: i64,
    challenge_id: i64,
    channel: String,
    votes: i64,
    re_posts: i64,
    bookmarks: i64,
    status: String,
    source: Option<String>,
}

impl ContributionRow {
    fn into_post(self) -> Result<ContributionPost, StoreError> {
        let status = ContributionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Serialization(format!("bad status '{}'", self.status)))?;
        Ok(ContributionPost {
            id: self.id,
            id_in_channel: self.id_in_channel,
            created_at: parse_ts(&self.created_at)?,
            contribution: self.contribution,
            full_text: self.full_text,
            url: self.url,
            author_id: self.author_id,
            in_reply_to: self.in_reply_to,
            initiative_id: self.initiative_id,
            campaign_id: self.campaign_id,
            challenge_id: self.challenge_id,
            channel: self.channel,
            votes: self.votes,
            re_posts: self.re_posts,
            bookmarks: self.bookmarks,
            status,
            source: self.source,
        })
    }
}

const CONTRIBUTION_COLUMNS: &str = "id, id_in_channel, created_at, contribution, full_text, url, \
     author_id, in_reply_to, initiative_id, campaign_id, challenge_id, channel, votes, re_posts, \
     bookmarks, status, source";

#[derive(FromRow)]
struct AppPostRow {
    id: i64,
    id_in_channel: String,
    created_at: String,
    text: String,
    url: Option<String>,
    app_parent_id: Option<i64>,
    contribution_parent_id: Option<i64>,
    initiative_id: i64,
    campaign_id: i64,
    challenge_id: i64,
    channel: String,
    category: String,
    delivered: bool,
    short_url: Option<String>,
    answered: bool,
    recipient_id: Option<String>,
}

impl AppPostRow {
    fn into_post(self) -> Result<AppPost, StoreError> {
        let category = AppPostCategory::parse(&self.category)
            .ok_or_else(|| StoreError::Serialization(format!("bad category '{}'", self.category)))?;
        Ok(AppPost {
            id: self.id,
            id_in_channel: self.id_in_channel,
            created_at: parse_ts(&self.created_at)?,
            text: self.text,
            url: self.url,
            app_parent_id: self.app_parent_id,
            contribution_parent_id: self.contribution_parent_id,
            initiative_id: self.initiative_id,
            campaign_id: self.campaign_id,
            challenge_id: self.challenge_id,
            channel: self.channel,
            category,
            delivered: self.delivered,
            short_url: self.short_url,
            answered: self.answered,
            recipient_id: self.recipient_id,
        })
    }
}

const APP_POST_COLUMNS: &str = "id, id_in_channel, created_at, text, url, app_parent_id, \
     contribution_parent_id, initiative_id, campaign_id, challenge_id, channel, category, \
     delivered, short_url, answered, recipient_id";

#[derive(FromRow)]
struct ShareRow {
    id: i64,
    id_in_channel: String,
    created_at: String,
    text: String,
    url: String,
    author_id: i64,
    initiative_id: i64,
    campaign_id: i64,
    challenge_id: i64,
    channel: String,
    votes: i64,
    re_posts: i64,
    bookmarks: i64,
    similarity: i64,
}

impl ShareRow {
    fn into_post(self) -> Result<SharePost, StoreError> {
        Ok(SharePost {
            id: self.id,
            id_in_channel: self.id_in_channel,
            created_at: parse_ts(&self.created_at)?,
            text: self.text,
            url: self.url,
            author_id: self.author_id,
            initiative_id: self.initiative_id,
            campaign_id: self.campaign_id,
            challenge_id: self.challenge_id,
            channel: self.channel,
            votes: self.votes,
            re_posts: self.re_posts,
            bookmarks: self.bookmarks,
            similarity: self.similarity as u32,
        })
    }
}

const SHARE_COLUMNS: &str = "id, id_in_channel, created_at, text, url, author_id, initiative_id, \
     campaign_id, challenge_id, channel, votes, re_posts, bookmarks, similarity";

#[async_trait]
impl AuthorStore for SqliteStore {
    async fn get_author(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<Author>, StoreError> {
        let row: Option<AuthorRow> = sqlx::query_as(
            "SELECT id, name, screen_name, id_in_channel, channel, language, extra_info, banned, \
             input_mistakes, request_mistakes FROM authors WHERE channel = ? AND id_in_channel = ?",
        )
        .bind(channel)
        .bind(id_in_channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.map(Author::from))
    }

    async fn register_author(
        &self,
        author: &InboundAuthor,
        channel: &str,
    ) -> Result<Author, StoreError> {
        let result = sqlx::query(
            "INSERT INTO authors (name, screen_name, id_in_channel, channel, language) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&author.name)
        .bind(&author.screen_name)
        .bind(&author.id)
        .bind(channel)
        .bind(&author.language)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Author {
            id: result.last_insert_rowid(),
            name: author.name.clone(),
            screen_name: author.screen_name.clone(),
            id_in_channel: author.id.clone(),
            channel: channel.to_string(),
            language: author.language.clone(),
            extra_info: None,
            banned: false,
            input_mistakes: 0,
            request_mistakes: 0,
        })
    }

    async fn update_author(&self, author: &Author) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE authors SET name = ?, screen_name = ?, language = ?, extra_info = ?, \
             banned = ?, input_mistakes = ?, request_mistakes = ? WHERE id = ?",
        )
        .bind(&author.name)
        .bind(&author.screen_name)
        .bind(&author.language)
        .bind(&author.extra_info)
        .bind(author.banned)
        .bind(author.input_mistakes)
        .bind(author.request_mistakes)
        .bind(author.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("author {}", author.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContributionStore for SqliteStore {
    async fn insert_contribution(
        &self,
        post: NewContributionPost,
    ) -> Result<ContributionPost, StoreError> {
        let created_at = format_ts(post.created_at)?;
        let result = sqlx::query(
            "INSERT INTO contribution_posts (id_in_channel, created_at, contribution, full_text, \
             url, author_id, in_reply_to, initiative_id, campaign_id, challenge_id, channel, \
             votes, re_posts, bookmarks, status, source) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&post.id_in_channel)
        .bind(&created_at)
        .bind(&post.contribution)
        .bind(&post.full_text)
        .bind(&post.url)
        .bind(post.author_id)
        .bind(&post.in_reply_to)
        .bind(post.initiative_id)
        .bind(post.campaign_id)
        .bind(post.challenge_id)
        .bind(&post.channel)
        .bind(post.votes)
        .bind(post.re_posts)
        .bind(post.bookmarks)
        .bind(post.status.as_str())
        .bind(&post.source)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(ContributionPost {
            id: result.last_insert_rowid(),
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
        })
    }

    async fn contribution(&self, id: i64) -> Result<Option<ContributionPost>, StoreError> {
        let row: Option<ContributionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM contribution_posts WHERE id = ?",
            CONTRIBUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(ContributionRow::into_post).transpose()
    }

    async fn contribution_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<ContributionPost>, StoreError> {
        let row: Option<ContributionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM contribution_posts WHERE channel = ? AND id_in_channel = ?",
            CONTRIBUTION_COLUMNS
        ))
        .bind(channel)
        .bind(id_in_channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(ContributionRow::into_post).transpose()
    }

    async fn contributions_with_status(
        &self,
        author_id: i64,
        challenge_id: i64,
        status: ContributionStatus,
    ) -> Result<Vec<ContributionPost>, StoreError> {
        let rows: Vec<ContributionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM contribution_posts \
             WHERE author_id = ? AND challenge_id = ? AND status = ? \
             ORDER BY created_at DESC, id DESC",
            CONTRIBUTION_COLUMNS
        ))
        .bind(author_id)
        .bind(challenge_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(ContributionRow::into_post).collect()
    }

    async fn temporaries_for_author(
        &self,
        author_id: i64,
    ) -> Result<Vec<ContributionPost>, StoreError> {
        let rows: Vec<ContributionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM contribution_posts \
             WHERE author_id = ? AND status = ? ORDER BY created_at ASC",
            CONTRIBUTION_COLUMNS
        ))
        .bind(author_id)
        .bind(ContributionStatus::Temporary.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(ContributionRow::into_post).collect()
    }

    async fn set_contribution_status(
        &self,
        id: i64,
        from: ContributionStatus,
        to: ContributionStatus,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE contribution_posts SET status = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_permanent(
        &self,
        preserve_id: i64,
        discard_id: i64,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let preserved =
            sqlx::query("UPDATE contribution_posts SET status = ? WHERE id = ? AND status = ?")
                .bind(ContributionStatus::Permanent.as_str())
                .bind(preserve_id)
                .bind(ContributionStatus::Temporary.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

        let discarded =
            sqlx::query("UPDATE contribution_posts SET status = ? WHERE id = ? AND status = ?")
                .bind(ContributionStatus::Discarded.as_str())
                .bind(discard_id)
                .bind(ContributionStatus::Permanent.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

        if preserved.rows_affected() == 1 && discarded.rows_affected() == 1 {
            tx.commit()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(true)
        } else {
            tx.rollback()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(false)
        }
    }
}

#[async_trait]
impl AppPostStore for SqliteStore {
    async fn insert_app_post(&self, post: NewAppPost) -> Result<AppPost, StoreError> {
        let created_at = format_ts(post.created_at)?;
        let result = sqlx::query(
            "INSERT INTO app_posts (id_in_channel, created_at, text, url, app_parent_id, \
             contribution_parent_id, initiative_id, campaign_id, challenge_id, channel, category, \
             delivered, short_url, answered, recipient_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&post.id_in_channel)
        .bind(&created_at)
        .bind(&post.text)
        .bind(&post.url)
        .bind(post.app_parent_id)
        .bind(post.contribution_parent_id)
        .bind(post.initiative_id)
        .bind(post.campaign_id)
        .bind(post.challenge_id)
        .bind(&post.channel)
        .bind(post.category.as_str())
        .bind(post.delivered)
        .bind(&post.short_url)
        .bind(&post.recipient_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(AppPost {
            id: result.last_insert_rowid(),
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
        })
    }

    async fn app_post(&self, id: i64) -> Result<Option<AppPost>, StoreError> {
        let row: Option<AppPostRow> = sqlx::query_as(&format!(
            "SELECT {} FROM app_posts WHERE id = ?",
            APP_POST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(AppPostRow::into_post).transpose()
    }

    async fn app_post_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<AppPost>, StoreError> {
        let row: Option<AppPostRow> = sqlx::query_as(&format!(
            "SELECT {} FROM app_posts WHERE channel = ? AND id_in_channel = ?",
            APP_POST_COLUMNS
        ))
        .bind(channel)
        .bind(id_in_channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(AppPostRow::into_post).transpose()
    }

    async fn mark_answered(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE app_posts SET answered = 1 WHERE id = ? AND answered = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn unanswered_notification_for_contribution(
        &self,
        contribution_id: i64,
    ) -> Result<Option<AppPost>, StoreError> {
        let row: Option<AppPostRow> = sqlx::query_as(&format!(
            "SELECT {} FROM app_posts \
             WHERE contribution_parent_id = ? AND answered = 0 AND category = ? \
             ORDER BY created_at DESC LIMIT 1",
            APP_POST_COLUMNS
        ))
        .bind(contribution_id)
        .bind(AppPostCategory::Notification.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(AppPostRow::into_post).transpose()
    }
}

#[async_trait]
impl ShareStore for SqliteStore {
    async fn insert_share_if_absent(
        &self,
        post: NewSharePost,
    ) -> Result<Option<SharePost>, StoreError> {
        let created_at = format_ts(post.created_at)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO share_posts (id_in_channel, created_at, text, url, author_id, \
             initiative_id, campaign_id, challenge_id, channel, votes, re_posts, bookmarks, \
             similarity) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&post.id_in_channel)
        .bind(&created_at)
        .bind(&post.text)
        .bind(&post.url)
        .bind(post.author_id)
        .bind(post.initiative_id)
        .bind(post.campaign_id)
        .bind(post.challenge_id)
        .bind(&post.channel)
        .bind(post.votes)
        .bind(post.re_posts)
        .bind(post.bookmarks)
        .bind(post.similarity as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(SharePost {
            id: result.last_insert_rowid(),
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
        }))
    }

    async fn share_by_channel_id(
        &self,
        channel: &str,
        id_in_channel: &str,
    ) -> Result<Option<SharePost>, StoreError> {
        let row: Option<ShareRow> = sqlx::query_as(&format!(
            "SELECT {} FROM share_posts WHERE channel = ? AND id_in_channel = ?",
            SHARE_COLUMNS
        ))
        .bind(channel)
        .bind(id_in_channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(ShareRow::into_post).transpose()
    }
}

#[async_trait]
impl OutboundQueue for SqliteStore {
    async fn enqueue(&self, message: QueuedMessage) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&message.payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let enqueued_at = format_ts(message.enqueued_at)?;

        sqlx::query(
            "INSERT INTO outbound_queue (id, channel, kind, text, recipient_id, payload, \
             enqueued_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(&message.channel)
        .bind(message.kind.as_str())
        .bind(&message.text)
        .bind(&message.recipient_id)
        .bind(&payload)
        .bind(&enqueued_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn oldest(&self, channel: &str) -> Result<Option<QueuedMessage>, StoreError> {
        let row: Option<(String, String, String, String, Option<String>, String, String)> =
            sqlx::query_as(
                "SELECT id, channel, kind, text, recipient_id, payload, enqueued_at \
                 FROM outbound_queue WHERE channel = ? \
                 ORDER BY enqueued_at ASC, rowid ASC LIMIT 1",
            )
            .bind(channel)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let Some((id, channel, kind, text, recipient_id, payload, enqueued_at)) = row else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&id).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let kind = DeliveryKind::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("bad kind '{}'", kind)))?;
        let payload: MessagePayload = serde_json::from_str(&payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Some(QueuedMessage {
            id,
            channel,
            kind,
            text,
            recipient_id,
            payload,
            enqueued_at: parse_ts(&enqueued_at)?,
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM outbound_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn inbound_author(id: &str) -> InboundAuthor {
        InboundAuthor {
            id: id.to_string(),
            name: "Test User".to_string(),
            screen_name: "testuser".to_string(),
            url: None,
            language: Some("en".to_string()),
        }
    }

    fn new_contribution(id_in_channel: &str, status: ContributionStatus, minute: i64) -> NewContributionPost {
        NewContributionPost {
            id_in_channel: id_in_channel.to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH + Duration::minutes(minute),
            contribution: "Lake Park".to_string(),
            full_text: "Lake Park #BestPark".to_string(),
            url: format!("https://x.com/u/status/{}", id_in_channel),
            author_id: 1,
            in_reply_to: None,
            initiative_id: 1,
            campaign_id: 10,
            challenge_id: 100,
            channel: "x".to_string(),
            votes: 0,
            re_posts: 0,
            bookmarks: 0,
            status,
            source: None,
        }
    }

    fn queued(text: &str, second: i64) -> QueuedMessage {
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
                short_url: Some("https://sho.rt/abc".to_string()),
            },
            enqueued_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(second),
        }
    }

    #[tokio::test]
    async fn test_author_register_and_update_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();

        let mut author = store.register_author(&inbound_author("u1"), "x").await.unwrap();
        assert_eq!(author.input_mistakes, 0);

        author.input_mistakes = 2;
        author.extra_info = Some("55401".to_string());
        author.banned = true;
        store.update_author(&author).await.unwrap();

        let loaded = store.get_author("x", "u1").await.unwrap().unwrap();
        assert_eq!(loaded.input_mistakes, 2);
        assert_eq!(loaded.extra_info.as_deref(), Some("55401"));
        assert!(loaded.banned);

        assert!(store.get_author("x", "unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contribution_status_transition_first_committer_wins() {
        let store = SqliteStore::in_memory().await.unwrap();
        let post = store
            .insert_contribution(new_contribution("p1", ContributionStatus::Temporary, 1))
            .await
            .unwrap();

        let won = store
            .set_contribution_status(
                post.id,
                ContributionStatus::Temporary,
                ContributionStatus::Permanent,
            )
            .await
            .unwrap();
        assert!(won);

        // The second transition finds the row already moved
        let lost = store
            .set_contribution_status(
                post.id,
                ContributionStatus::Temporary,
                ContributionStatus::Discarded,
            )
            .await
            .unwrap();
        assert!(!lost);

        let loaded = store.contribution(post.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContributionStatus::Permanent);
    }

    #[tokio::test]
    async fn test_contributions_with_status_orders_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_contribution(new_contribution("p1", ContributionStatus::Permanent, 1))
            .await
            .unwrap();
        store
            .insert_contribution(new_contribution("p2", ContributionStatus::Permanent, 5))
            .await
            .unwrap();
        store
            .insert_contribution(new_contribution("p3", ContributionStatus::Temporary, 3))
            .await
            .unwrap();

        let permanents = store
            .contributions_with_status(1, 100, ContributionStatus::Permanent)
            .await
            .unwrap();
        let ids: Vec<_> = permanents.iter().map(|c| c.id_in_channel.as_str()).collect();
        assert_eq!(ids, ["p2", "p1"]);
    }

    #[tokio::test]
    async fn test_replace_permanent_swaps_both_or_neither() {
        let store = SqliteStore::in_memory().await.unwrap();
        let old = store
            .insert_contribution(new_contribution("old", ContributionStatus::Permanent, 1))
            .await
            .unwrap();
        let new = store
            .insert_contribution(new_contribution("new", ContributionStatus::Temporary, 2))
            .await
            .unwrap();

        assert!(store.replace_permanent(new.id, old.id).await.unwrap());
        assert_eq!(
            store.contribution(new.id).await.unwrap().unwrap().status,
            ContributionStatus::Permanent
        );
        assert_eq!(
            store.contribution(old.id).await.unwrap().unwrap().status,
            ContributionStatus::Discarded
        );

        // Re-running finds neither precondition; nothing changes
        assert!(!store.replace_permanent(new.id, old.id).await.unwrap());
        assert_eq!(
            store.contribution(new.id).await.unwrap().unwrap().status,
            ContributionStatus::Permanent
        );
    }

    #[tokio::test]
    async fn test_replace_permanent_rolls_back_on_partial_match() {
        let store = SqliteStore::in_memory().await.unwrap();
        let temp = store
            .insert_contribution(new_contribution("temp", ContributionStatus::Temporary, 1))
            .await
            .unwrap();
        let discarded = store
            .insert_contribution(new_contribution("gone", ContributionStatus::Discarded, 2))
            .await
            .unwrap();

        // The discard target is not permanent, so the preserve must not stick
        assert!(!store.replace_permanent(temp.id, discarded.id).await.unwrap());
        assert_eq!(
            store.contribution(temp.id).await.unwrap().unwrap().status,
            ContributionStatus::Temporary
        );
    }

    #[tokio::test]
    async fn test_app_post_answered_at_most_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let post = store
            .insert_app_post(NewAppPost {
                id_in_channel: "app1".to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                text: "please send your postal code".to_string(),
                url: None,
                app_parent_id: None,
                contribution_parent_id: Some(1),
                initiative_id: 1,
                campaign_id: 10,
                challenge_id: 100,
                channel: "x".to_string(),
                category: AppPostCategory::Notification,
                delivered: true,
                short_url: None,
                recipient_id: Some("participant".to_string()),
            })
            .await
            .unwrap();

        assert!(store.mark_answered(post.id).await.unwrap());
        assert!(!store.mark_answered(post.id).await.unwrap());

        let loaded = store
            .app_post_by_channel_id("x", "app1")
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.answered);
        assert_eq!(loaded.category, AppPostCategory::Notification);

        let pending = store
            .unanswered_notification_for_contribution(1)
            .await
            .unwrap();
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn test_share_is_stored_at_most_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let share = NewSharePost {
            id_in_channel: "s1".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            text: "Join the conversation".to_string(),
            url: "https://x.com/u/status/s1".to_string(),
            author_id: 1,
            initiative_id: 1,
            campaign_id: 10,
            challenge_id: 100,
            channel: "x".to_string(),
            votes: 0,
            re_posts: 0,
            bookmarks: 0,
            similarity: 80,
        };

        let first = store.insert_share_if_absent(share.clone()).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().similarity, 80);

        let second = store.insert_share_if_absent(share).await.unwrap();
        assert!(second.is_none());

        let loaded = store.share_by_channel_id("x", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.similarity, 80);
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_payload_round_trips() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = queued("first", 1);
        let second = queued("second", 2);
        store.enqueue(second.clone()).await.unwrap();
        store.enqueue(first.clone()).await.unwrap();

        let oldest = store.oldest("x").await.unwrap().unwrap();
        assert_eq!(oldest.id, first.id);
        assert_eq!(oldest.text, "first");
        assert_eq!(oldest.payload.trigger_post_id, "p1");
        assert_eq!(oldest.payload.short_url.as_deref(), Some("https://sho.rt/abc"));
        assert_eq!(oldest.payload.category, AppPostCategory::Notification);

        store.delete(first.id).await.unwrap();
        let oldest = store.oldest("x").await.unwrap().unwrap();
        assert_eq!(oldest.id, second.id);

        store.delete(second.id).await.unwrap();
        assert!(store.oldest("x").await.unwrap().is_none());
    }
}
