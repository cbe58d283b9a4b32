//! Simulate command - feed posts through the engine without a channel
//!
//! Posts are read from a JSON file (the normalized inbound shape), run
//! through the manager against an in-memory store, and queued replies
//! are delivered through a recording channel after each post. Delivered
//! notifications get ids `sim-1`, `sim-2`, ... so later posts in the
//! same file can reference them via `parent_id` and exercise full
//! multi-turn conversations.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use convoca_adapters::{campaigns::TomlCampaignRepo, shortener::NoShortener, store::InMemoryStore};
use convoca_domain::{
    CampaignRepo, ChannelClient, ChannelError, ChannelUser, Delivery, InboundPost, SystemClock,
    usecases::{
        Dispatcher, DispatcherConfig, EngagementConfig, Outcome, PostManager, RenderConfig,
        ReplyRenderer,
    },
};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::args::SimulateArgs;
use crate::config::AppConfig;

pub async fn execute(args: SimulateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();

    let campaigns_file = args
        .campaigns
        .as_ref()
        .unwrap_or(&config.general.campaigns_file);

    let campaigns = Arc::new(
        TomlCampaignRepo::new(campaigns_file)
            .load()
            .await
            .context("Failed to load campaign configuration")?,
    );

    let posts = read_posts(&args.file)?;
    if posts.is_empty() {
        bail!("No posts to simulate");
    }

    let store = Arc::new(InMemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let clock = Arc::new(SystemClock);
    let wakeup = Arc::new(Notify::new());

    let renderer = ReplyRenderer::new(
        Arc::new(NoShortener),
        RenderConfig {
            datetime_format: config.engagement.datetime_format.clone(),
            shorten_urls: false,
        },
    );

    let manager = PostManager::new(
        Arc::clone(&campaigns),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        renderer,
        clock.clone(),
        EngagementConfig {
            limit_wrong_inputs: config.engagement.limit_wrong_inputs,
            limit_wrong_requests: config.engagement.limit_wrong_requests,
        },
        Arc::clone(&wakeup),
    );

    let dispatcher = Dispatcher::new(
        store.clone(),
        channel.clone(),
        store.clone(),
        store.clone(),
        clock,
        DispatcherConfig {
            poll_interval: Duration::from_millis(10),
        },
        wakeup,
    );
    let mut results = Vec::new();
    for post in &posts {
        let outcome = manager
            .manage_post(post)
            .await
            .with_context(|| format!("Failed to manage post {}", post.id))?;

        // Deliver queued replies so follow-up posts can reference them
        dispatcher.drain().await;
        let replies = channel.take_deliveries();

        results.push(SimulationStep {
            post_id: post.id.clone(),
            outcome: describe_outcome(&outcome),
            replies: replies.into_iter().map(|d| d.text).collect(),
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("Simulation Results ({} posts)", results.len());
        println!("=============================");
        println!();
        for step in &results {
            println!("Post {}: {}", step.post_id, step.outcome);
            for reply in &step.replies {
                println!("  -> {}", reply);
            }
            println!();
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct SimulationStep {
    post_id: String,
    outcome: String,
    replies: Vec<String>,
}

fn describe_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Replied { category } => {
            let category = serde_json::to_value(category)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| format!("{:?}", category));
            format!("replied ({})", category)
        }
        Outcome::EngagementStored => "engagement stored".to_string(),
        Outcome::ShareStored { similarity } => format!("share stored ({}%)", similarity),
        Outcome::Ignored { reason } => format!("ignored: {}", reason),
    }
}

fn read_posts(path: &PathBuf) -> Result<Vec<InboundPost>> {
    let content = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?
    };

    let value: serde_json::Value =
        serde_json::from_str(&content).context("Posts file is not valid JSON")?;

    let posts = if value.is_array() {
        serde_json::from_value(value).context("Failed to parse posts")?
    } else {
        vec![serde_json::from_value(value).context("Failed to parse post")?]
    };

    Ok(posts)
}

/// Channel that records deliveries instead of performing them
struct RecordingChannel {
    counter: AtomicU64,
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingChannel {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, text: &str) -> Delivery {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let delivery = Delivery {
            id: format!("sim-{}", n),
            url: None,
            text: text.to_string(),
        };
        self.deliveries
            .lock()
            .expect("deliveries lock")
            .push(delivery.clone());
        delivery
    }

    fn take_deliveries(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock().expect("deliveries lock"))
    }
}

#[async_trait]
impl ChannelClient for RecordingChannel {
    async fn authenticate(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn post_public(&self, text: &str) -> Result<Delivery, ChannelError> {
        Ok(self.record(text))
    }

    async fn reply_to(&self, text: &str, _parent_id: &str) -> Result<Delivery, ChannelError> {
        Ok(self.record(text))
    }

    async fn send_direct(&self, text: &str, _recipient_id: &str) -> Result<Delivery, ChannelError> {
        Ok(self.record(text))
    }

    async fn get_post(&self, _id: &str) -> Result<Option<InboundPost>, ChannelError> {
        Ok(None)
    }

    async fn delete_post(&self, _id: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn user_info(&self, id: &str) -> Result<ChannelUser, ChannelError> {
        Ok(ChannelUser {
            id: id.to_string(),
            name: "simulated".to_string(),
            screen_name: "simulated".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "x"
    }
}
