use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

fn default_primary_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_backup_url() -> Option<String> {
    Some("https://api.coingecko.net/api/v3".to_string())
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Where market data is polled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the primary markets API (without `/coins/markets`).
    pub primary_url: String,

    /// Mirror with the same response shape. Only the request-triggered paths
    /// use it; `None` disables the mirror entirely.
    #[serde(default = "default_backup_url")]
    pub backup_url: Option<String>,

    /// Quote currency passed as `vs_currency`.
    pub vs_currency: String,

    /// Number of assets tracked. Also bounds the stored fallback list.
    pub per_page: u32,

    /// Per-request timeout for upstream calls.
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,

    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            backup_url: default_backup_url(),
            vs_currency: "usd".to_string(),
            per_page: 10,
            timeout: default_timeout(),
            user_agent: concat!("coindash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a fetched snapshot set is served without contacting upstream.
    #[serde(
        default = "default_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Tick spacing. Ticks land on multiples of this since the Unix epoch,
    /// so "1h" fires at the top of every hour.
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,

    /// Run one history-capturing cycle immediately at startup.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,

    /// When set, protected routes require `Authorization: Bearer <token>`.
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            api_token: None,
        }
    }
}

/// Application configuration as written in `coindash.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./coindash.toml` if it exists in current directory
/// 2. `~/.local/share/coindash/coindash.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("coindash.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("coindash").join("coindash.toml");
    }

    local_config
}

impl ResolvedConfig {
    fn from_config(config: Config, config_dir: &Path) -> Self {
        let data_dir = config.resolve_data_dir(config_dir);
        let mut upstream = config.upstream;
        // TOML has no null; an empty string switches the mirror off.
        upstream.backup_url = upstream
            .backup_url
            .filter(|url| !url.trim().is_empty());
        let mut server = config.server;
        server.api_token = server.api_token.filter(|token| !token.is_empty());

        Self {
            data_dir,
            upstream,
            cache: config.cache,
            schedule: config.schedule,
            server,
        }
    }

    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        let resolved = Self::from_config(config, config_dir);
        resolved.validate()?;
        Ok(resolved)
    }

    /// Load config, falling back to defaults when the file doesn't exist.
    ///
    /// Without a file, the intended config directory becomes the data dir.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        let resolved = Self::from_config(Config::default(), config_dir);
        resolved.validate()?;
        Ok(resolved)
    }

    /// Reject settings the pipeline cannot run with. Call again after
    /// command-line overrides are applied.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.per_page == 0 {
            anyhow::bail!("upstream.per_page must be at least 1");
        }
        if self.upstream.timeout.is_zero() {
            anyhow::bail!("upstream.timeout must be greater than zero");
        }
        if self.schedule.interval.is_zero() {
            anyhow::bail!("schedule.interval must be greater than zero");
        }
        Ok(())
    }
}
