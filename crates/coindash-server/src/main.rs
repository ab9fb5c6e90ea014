use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use coindash::config::{default_config_path, ResolvedConfig};
use coindash::duration::format_duration;
use coindash::refresh::RefreshService;
use coindash::scheduler::Scheduler;
use coindash::store::{
    HistoryStore, JsonSnapshotStore, JsonlHistoryStore, MemoryHistoryStore, MemorySnapshotStore,
    SnapshotStore,
};
use coindash_server::{build_router, AppState};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    let duration = coindash::duration::parse_duration(s).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

#[derive(Parser, Debug)]
#[command(name = "coindash-server")]
#[command(about = "Serve the coindash API and run scheduled market refreshes")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Override `server.bind`
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override `schedule.interval` (e.g. "15m", "1h")
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    interval: Option<Duration>,

    /// Run a scheduled cycle right after startup
    #[arg(long)]
    run_on_start: bool,

    /// Keep stores in memory instead of the data directory
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load coindash config: {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(interval) = cli.interval {
        config.schedule.interval = interval;
    }
    if cli.run_on_start {
        config.schedule.run_on_start = true;
    }
    config.validate().context("Invalid coindash config")?;

    let (snapshots, history): (Arc<dyn SnapshotStore>, Arc<dyn HistoryStore>) = if cli.memory {
        (
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(MemoryHistoryStore::new()),
        )
    } else {
        (
            Arc::new(JsonSnapshotStore::new(&config.data_dir)),
            Arc::new(JsonlHistoryStore::new(&config.data_dir)),
        )
    };

    let service = Arc::new(RefreshService::from_config(&config, snapshots, history));
    let scheduler = Scheduler::new(service.clone(), config.schedule.interval)
        .with_run_on_start(config.schedule.run_on_start)
        .spawn();

    let state = AppState::new(service).with_api_token(config.server.api_token.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(
        bind = %config.server.bind,
        data_dir = %config.data_dir.display(),
        memory = cli.memory,
        interval = %format_duration(config.schedule.interval),
        auth = config.server.api_token.is_some(),
        "coindash server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for ctrl-c; running until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    scheduler.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_flag_rejects_zero() {
        assert!(parse_duration_arg("0s").is_err());
        assert!(parse_duration_arg("0m").is_err());
        assert_eq!(parse_duration_arg("15m"), Ok(Duration::from_secs(900)));
    }

    #[test]
    fn interval_flag_parses_through_clap() {
        let cli = Cli::try_parse_from(["coindash-server", "--interval", "1h"]).unwrap();
        assert_eq!(cli.interval, Some(Duration::from_secs(3600)));

        assert!(Cli::try_parse_from(["coindash-server", "--interval", "0s"]).is_err());
    }
}
