//! Campaigns command - manage campaign definitions

use anyhow::{Context, Result};
use convoca_adapters::campaigns::{TomlCampaignRepo, example_toml};
use convoca_domain::CampaignRepo;
use std::fs;
use std::path::PathBuf;

use crate::args::{CampaignsArgs, CampaignsCommands};
use crate::config::AppConfig;

pub async fn execute(args: CampaignsArgs, config_path: Option<PathBuf>) -> Result<()> {
    match args.command {
        CampaignsCommands::Init { path } => init_campaigns(path).await,
        CampaignsCommands::List { campaigns, json } => {
            list_campaigns(campaigns, json, config_path).await
        }
        CampaignsCommands::Validate { campaigns } => {
            validate_campaigns(campaigns, config_path).await
        }
    }
}

async fn init_campaigns(path: PathBuf) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Campaigns file already exists: {}", path.display());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    fs::write(&path, example_toml())
        .with_context(|| format!("Failed to write campaigns file: {}", path.display()))?;

    println!("Created campaigns file: {}", path.display());
    println!();
    println!("Edit it to describe your initiatives, then run 'convoca campaigns validate'.");

    Ok(())
}

async fn list_campaigns(
    campaigns: Option<PathBuf>,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();
    let path = campaigns.as_ref().unwrap_or(&config.general.campaigns_file);

    let set = TomlCampaignRepo::new(path)
        .load()
        .await
        .context("Failed to load campaign configuration")?;

    if json {
        let output = serde_json::json!({
            "fingerprint": set.fingerprint,
            "initiatives": set.initiatives.iter().map(|i| serde_json::json!({
                "id": i.id,
                "name": i.name,
                "hashtag": i.hashtag,
                "language": i.language,
                "sharing_message": i.sharing_message,
                "campaigns": i.campaigns.iter().map(|c| serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "extra_info": c.extra_info.as_ref().map(|e| &e.name),
                    "messages": c.all_messages().count(),
                    "challenges": c.challenges.iter().map(|ch| serde_json::json!({
                        "id": ch.id,
                        "name": ch.name,
                        "hashtag": ch.hashtag,
                        "answer_style": ch.answer_style,
                        "answers_from_same_author": ch.answers_from_same_author,
                        "accept_changes": ch.accept_changes,
                    })).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>()
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Campaign Configuration ({} initiatives)", set.initiatives.len());
        println!("=======================================");
        println!();

        for initiative in &set.initiatives {
            println!("Initiative {}: {} (#{})", initiative.id, initiative.name, initiative.hashtag);
            for campaign in &initiative.campaigns {
                println!("  Campaign {}: {}", campaign.id, campaign.name);
                if let Some(extra_info) = &campaign.extra_info {
                    println!("    Extra info: {}", extra_info.name);
                }
                for challenge in &campaign.challenges {
                    println!(
                        "    Challenge {}: {} (#{}, {} answers per author)",
                        challenge.id,
                        challenge.name,
                        challenge.hashtag,
                        if challenge.answers_from_same_author < 0 {
                            "unlimited".to_string()
                        } else {
                            challenge.answers_from_same_author.to_string()
                        }
                    );
                }
            }
            println!();
        }

        println!("Fingerprint: {}", set.fingerprint);
    }

    Ok(())
}

async fn validate_campaigns(
    campaigns: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();
    let path = campaigns.as_ref().unwrap_or(&config.general.campaigns_file);

    println!("Validating campaigns file: {}", path.display());

    let repo = TomlCampaignRepo::new(path);
    match repo.validate().await {
        Ok(()) => {
            let set = repo.load().await?;
            let challenges: usize = set
                .initiatives
                .iter()
                .flat_map(|i| &i.campaigns)
                .map(|c| c.challenges.len())
                .sum();
            println!(
                "✓ Validation passed ({} initiatives, {} challenges)",
                set.initiatives.len(),
                challenges
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Validation failed: {}", e);
            std::process::exit(1);
        }
    }
}
