//! Doctor command - validate configuration and show status

use anyhow::Result;
use convoca_adapters::campaigns::TomlCampaignRepo;
use convoca_domain::CampaignRepo;
use serde::Serialize;
use std::path::PathBuf;

use crate::args::DoctorArgs;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    campaigns: CheckResult,
    store: CheckResult,
    x_read: CheckResult,
    x_write: CheckResult,
    shortener: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        campaigns: CheckResult::error("Not checked"),
        store: CheckResult::error("Not checked"),
        x_read: CheckResult::error("Not checked"),
        x_write: CheckResult::error("Not checked"),
        shortener: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    // Check config
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.campaigns = check_campaigns(&config.general.campaigns_file).await;
        report.store = check_store(&config.general.state_db_path);
        report.x_read = check_token(&config.x.bearer_token_env, "Bearer token");
        report.x_write = check_token(&config.x.user_token_env, "User token");
        report.shortener = check_shortener(config);
    }

    // Determine overall status
    let checks = [
        &report.config,
        &report.campaigns,
        &report.store,
        &report.x_read,
        &report.x_write,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    // Output report
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

async fn check_campaigns(path: &PathBuf) -> CheckResult {
    if !path.exists() {
        return CheckResult::error(format!("Campaigns file does not exist: {}", path.display()));
    }

    let repo = TomlCampaignRepo::new(path);
    match repo.load().await {
        Ok(set) => {
            let challenges: usize = set
                .initiatives
                .iter()
                .flat_map(|i| &i.campaigns)
                .map(|c| c.challenges.len())
                .sum();
            CheckResult::ok(format!(
                "{} initiatives, {} challenges",
                set.initiatives.len(),
                challenges
            ))
            .with_details(serde_json::json!({
                "fingerprint": set.fingerprint,
                "hashtags": set.initiatives.iter().map(|i| &i.hashtag).collect::<Vec<_>>(),
            }))
        }
        Err(e) => CheckResult::error(format!("Failed to load campaigns: {}", e)),
    }
}

fn check_store(path: &PathBuf) -> CheckResult {
    if path.exists() {
        CheckResult::ok(format!("Database present: {}", path.display()))
    } else {
        CheckResult::warn(format!(
            "Database will be created on first run: {}",
            path.display()
        ))
    }
}

fn check_token(env_var: &str, label: &str) -> CheckResult {
    if env_var.is_empty() {
        return CheckResult::error(format!("{}: no env var configured", label));
    }

    match std::env::var(env_var) {
        Ok(val) if !val.is_empty() => CheckResult::ok(format!("{}: {} (set)", label, env_var)),
        _ => CheckResult::warn(format!("{}: {} (not set)", label, env_var)),
    }
}

fn check_shortener(config: &AppConfig) -> CheckResult {
    if !config.shortener.enabled {
        return CheckResult::ok("URL shortener disabled");
    }

    if config.shortener.endpoint.trim().is_empty() {
        return CheckResult::error("URL shortener enabled but no endpoint configured");
    }

    if config.shortener.api_key_env.trim().is_empty() {
        return CheckResult::ok(format!(
            "Endpoint: {} (no API key)",
            config.shortener.endpoint
        ));
    }

    check_token(&config.shortener.api_key_env, "Shortener API key")
}

fn print_report(report: &DoctorReport) {
    println!("convoca Doctor Report");
    println!("=====================");
    println!();

    print_check("Config", &report.config);
    print_check("Campaigns", &report.campaigns);
    print_check("Store", &report.store);
    print_check("X Read", &report.x_read);
    print_check("X Write", &report.x_write);
    print_check("Shortener", &report.shortener);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready to run! Try: convoca run --dry-run --once");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
