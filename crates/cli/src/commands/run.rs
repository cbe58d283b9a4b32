//! Run command - inbound listener and outbound dispatcher loops

use anyhow::{Context, Result, bail};
use convoca_adapters::{
    campaigns::TomlCampaignRepo,
    shortener::{HttpShortener, NoShortener},
    store::SqliteStore,
    x::{StubChannel, XChannel, XListener},
};
use convoca_domain::{
    CampaignRepo, CampaignSet, ChannelClient, ChannelListener, SystemClock, UrlShortener,
    usecases::{
        Dispatcher, DispatcherConfig, EngagementConfig, Outcome, PostManager, RenderConfig,
        ReplyRenderer,
    },
};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};

use crate::args::RunArgs;
use crate::config::AppConfig;

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    tracing::info!(
        dry_run = args.dry_run,
        once = args.once,
        campaigns = %config.general.campaigns_file.display(),
        "Starting convoca run"
    );

    // A configuration problem stops the channel from starting at all
    let campaigns = Arc::new(
        TomlCampaignRepo::new(&config.general.campaigns_file)
            .load()
            .await
            .context("Failed to load campaign configuration")?,
    );

    let store = Arc::new(
        SqliteStore::new(&config.general.state_db_path)
            .await
            .context("Failed to initialize SQLite store")?,
    );

    let channel = build_channel(&config, args.dry_run).await?;
    let mut listener = build_listener(&config, &campaigns)?;

    let clock = Arc::new(SystemClock);
    let wakeup = Arc::new(Notify::new());

    let renderer = ReplyRenderer::new(
        build_shortener(&config)?,
        RenderConfig {
            datetime_format: config.engagement.datetime_format.clone(),
            shorten_urls: config.shortener.enabled,
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

    let poll_interval = Duration::from_secs(config.dispatcher.poll_interval_secs);
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::clone(&channel),
        store.clone(),
        store.clone(),
        clock,
        DispatcherConfig { poll_interval },
        wakeup,
    );

    if args.once {
        let processed = drain_inbound(&mut *listener, &manager).await;
        let delivered = dispatcher.drain().await;
        tracing::info!(processed, delivered, "Single cycle complete");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Shutdown signal received");
    };
    tokio::pin!(shutdown);

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = listener.next_post() => next,
        };

        match next {
            Ok(Some(post)) => handle_post(&manager, &post).await,
            Ok(None) => {
                // Backlog drained; wait for the next poll window
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Listener failed, retrying after a pause");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }

    // Disconnecting stops both loops; an in-flight delivery completes first
    shutdown_tx.send(true).ok();
    dispatcher_handle.await.ok();

    tracing::info!("convoca run completed");
    Ok(())
}

async fn drain_inbound(listener: &mut dyn ChannelListener, manager: &PostManager) -> usize {
    let mut processed = 0;
    loop {
        match listener.next_post().await {
            Ok(Some(post)) => {
                handle_post(manager, &post).await;
                processed += 1;
            }
            Ok(None) => break,
            Err(error) => {
                tracing::error!(error = %error, "Listener failed while draining the backlog");
                break;
            }
        }
    }
    processed
}

async fn handle_post(manager: &PostManager, post: &convoca_domain::InboundPost) {
    match manager.manage_post(post).await {
        Ok(Outcome::Replied { category }) => {
            tracing::info!(post_id = %post.id, category = ?category, "Reply enqueued");
        }
        Ok(Outcome::EngagementStored) => {
            tracing::info!(post_id = %post.id, "Engagement post recorded");
        }
        Ok(Outcome::ShareStored { similarity }) => {
            tracing::info!(post_id = %post.id, similarity, "Share recorded");
        }
        Ok(Outcome::Ignored { reason }) => {
            tracing::debug!(post_id = %post.id, reason = %reason, "Ignored");
        }
        // One bad post must not stop the stream
        Err(error) => {
            tracing::error!(post_id = %post.id, error = %error, "Failed to manage post");
        }
    }
}

async fn build_channel(config: &AppConfig, dry_run: bool) -> Result<Arc<dyn ChannelClient>> {
    if dry_run {
        return Ok(Arc::new(StubChannel::new()));
    }

    let user_token = load_token(&config.x.user_token_env, "x write")?;
    let channel = XChannel::new(user_token);
    channel
        .authenticate()
        .await
        .context("Channel authentication failed")?;
    Ok(Arc::new(channel))
}

fn build_listener(
    config: &AppConfig,
    campaigns: &CampaignSet,
) -> Result<Box<dyn ChannelListener>> {
    let bearer_token = load_token(&config.x.bearer_token_env, "x read")?;
    Ok(Box::new(XListener::new(
        bearer_token,
        tracked_hashtags(campaigns),
    )))
}

fn build_shortener(config: &AppConfig) -> Result<Arc<dyn UrlShortener>> {
    if !config.shortener.enabled {
        return Ok(Arc::new(NoShortener));
    }

    if config.shortener.endpoint.trim().is_empty() {
        bail!("URL shortener enabled but no endpoint configured");
    }

    let api_key = if config.shortener.api_key_env.trim().is_empty() {
        None
    } else {
        Some(load_token(&config.shortener.api_key_env, "shortener")?)
    };

    Ok(Arc::new(HttpShortener::new(
        config.shortener.endpoint.clone(),
        api_key,
    )))
}

/// All hashtags the listener's search query has to cover
fn tracked_hashtags(campaigns: &CampaignSet) -> Vec<String> {
    let mut tags = Vec::new();
    for initiative in &campaigns.initiatives {
        tags.push(initiative.hashtag.clone());
        for campaign in &initiative.campaigns {
            for challenge in &campaign.challenges {
                tags.push(challenge.hashtag.clone());
            }
        }
    }
    tags
}

pub(crate) fn load_token(env_var: &str, purpose: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No token env var configured for {}", purpose);
    }

    let token = std::env::var(env_var)
        .with_context(|| format!("Missing token env var {} for {}", env_var, purpose))?;

    if token.trim().is_empty() {
        bail!("Token env var {} is empty for {}", env_var, purpose);
    }

    Ok(SecretString::new(token.into()))
}
