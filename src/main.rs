use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coindash::config::{default_config_path, ResolvedConfig};
use coindash::duration::format_duration;
use coindash::refresh::{RefreshService, RefreshTrigger};
use coindash::store::{is_safe_asset_id, JsonSnapshotStore, JsonlHistoryStore};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "coindash")]
#[command(about = "Crypto market poller with current-state and history stores")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved configuration
    Config,
    /// Fetch current data the way `GET /api/coins` does and print it
    Current,
    /// Run one history-capturing cycle now
    Capture,
    /// Print stored history for one asset, oldest first
    History {
        /// Upstream asset id, e.g. "bitcoin"
        asset_id: String,
    },
}

fn build_service(config: &ResolvedConfig) -> RefreshService {
    RefreshService::from_config(
        config,
        Arc::new(JsonSnapshotStore::new(&config.data_dir)),
        Arc::new(JsonlHistoryStore::new(&config.data_dir)),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();

    let cli = Cli::parse();
    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    match cli.command {
        Some(Command::Config) | None => {
            println!("Config file: {}", cli.config.display());
            println!("Data directory: {}", config.data_dir.display());
            println!("Primary API: {}", config.upstream.primary_url);
            println!(
                "Backup API: {}",
                config.upstream.backup_url.as_deref().unwrap_or("(disabled)")
            );
            println!(
                "Tracking: top {} by market cap in {}",
                config.upstream.per_page, config.upstream.vs_currency
            );
            println!("Cache TTL: {}", format_duration(config.cache.ttl));
            println!("Schedule: every {}", format_duration(config.schedule.interval));
        }
        Some(Command::Current) => {
            let outcome = build_service(&config).current().await?;
            let body = json!({
                "message": outcome.message(),
                "count": outcome.count(),
                "source": outcome.origin.label(),
                "data": outcome.snapshots,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Some(Command::Capture) => {
            let outcome = build_service(&config)
                .refresh(RefreshTrigger::History)
                .await?;
            let body = json!({
                "message": outcome.message(),
                "count": outcome.persistence.history_appended,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Some(Command::History { asset_id }) => {
            if !is_safe_asset_id(&asset_id) {
                anyhow::bail!("Invalid asset id: {asset_id:?}");
            }
            let history = build_service(&config).history(&asset_id).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}
