//! X (Twitter) channel adapter
//!
//! `XChannel` implements the outbound [`ChannelClient`] port against the
//! X API v2; `XListener` polls recent search for the tracked hashtags
//! and yields normalized inbound posts. Stub implementations back
//! dry-run and simulation modes.

mod client;
mod listener;

pub use client::XChannel;
pub use listener::XListener;

use async_trait::async_trait;
use convoca_domain::{
    ChannelClient, ChannelError, ChannelListener, ChannelUser, Delivery, InboundPost,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Channel client that delivers nothing for real; used for dry runs
pub struct StubChannel {
    counter: AtomicU64,
}

impl StubChannel {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    fn delivery(&self, text: &str) -> Delivery {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Delivery {
            id: format!("stub-{}", n),
            url: None,
            text: text.to_string(),
        }
    }
}

impl Default for StubChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelClient for StubChannel {
    async fn authenticate(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn post_public(&self, text: &str) -> Result<Delivery, ChannelError> {
        tracing::info!(text = %text, "[STUB] public post");
        Ok(self.delivery(text))
    }

    async fn reply_to(&self, text: &str, parent_id: &str) -> Result<Delivery, ChannelError> {
        tracing::info!(text = %text, parent_id = %parent_id, "[STUB] reply");
        Ok(self.delivery(text))
    }

    async fn send_direct(
        &self,
        text: &str,
        recipient_id: &str,
    ) -> Result<Delivery, ChannelError> {
        tracing::info!(text = %text, recipient_id = %recipient_id, "[STUB] direct message");
        Ok(self.delivery(text))
    }

    async fn get_post(&self, _id: &str) -> Result<Option<InboundPost>, ChannelError> {
        Ok(None)
    }

    async fn delete_post(&self, id: &str) -> Result<(), ChannelError> {
        tracing::info!(id = %id, "[STUB] delete post");
        Ok(())
    }

    async fn user_info(&self, id: &str) -> Result<ChannelUser, ChannelError> {
        Ok(ChannelUser {
            id: id.to_string(),
            name: "stub".to_string(),
            screen_name: "stub".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "x"
    }
}

/// Listener that never yields a post; used when no channel is connected
pub struct StubListener;

#[async_trait]
impl ChannelListener for StubListener {
    async fn next_post(&mut self) -> Result<Option<InboundPost>, ChannelError> {
        Ok(None)
    }
}
