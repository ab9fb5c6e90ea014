//! The refresh pipeline: fetch from upstream, upsert current state, replace the
//! cached set and, on history-capturing cycles, append one history batch.
//!
//! Only one cycle runs at a time. Scheduled ticks skip when a cycle holds the
//! lock; request-triggered refreshes wait for it.
//!
//! There is no transaction around a cycle. A crash between upserts leaves the
//! current-state store partially updated for that cycle; the next successful
//! cycle overwrites every fetched row again.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{SnapshotCache, COINS_KEY};
use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::error::{RefreshError, UpstreamError};
use crate::market_data::{CoinGeckoMarketsSource, MarketCoin, MarketsQuery, PriceSource};
use crate::store::{AssetSnapshot, HistoryRecord, HistoryStore, SnapshotStore};

/// Why a cycle runs. Decides which fallbacks apply and whether history is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// Timer tick. Primary only, captures history, never served from cache.
    Scheduled,
    /// A client asked for current data. Cache, then primary, backup, stored rows.
    Manual,
    /// A client asked for an immediate history capture. Primary then backup.
    History,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::History => "history",
        }
    }

    pub fn captures_history(&self) -> bool {
        matches!(self, Self::Scheduled | Self::History)
    }

    pub fn uses_backup(&self) -> bool {
        matches!(self, Self::Manual | Self::History)
    }

    pub fn uses_cache(&self) -> bool {
        matches!(self, Self::Manual)
    }

    pub fn uses_stored_fallback(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Primary,
    Backup,
}

/// Where the data handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Cache,
    Live(Endpoint),
    Fallback,
}

impl DataOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Live(Endpoint::Primary) => "live",
            Self::Live(Endpoint::Backup) => "backup",
            Self::Fallback => "fallback",
        }
    }
}

/// What the persistence half of a cycle managed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceReport {
    pub snapshots_written: usize,
    /// Asset ids whose upsert failed.
    pub snapshot_failures: Vec<String>,
    pub history_appended: usize,
    pub history_error: Option<String>,
}

impl PersistenceReport {
    pub fn is_complete(&self) -> bool {
        self.snapshot_failures.is_empty() && self.history_error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub trigger: RefreshTrigger,
    pub origin: DataOrigin,
    /// Shared timestamp of this cycle's writes. `None` when nothing was fetched.
    pub observed_at: Option<DateTime<Utc>>,
    pub snapshots: Vec<AssetSnapshot>,
    pub persistence: PersistenceReport,
}

impl RefreshOutcome {
    pub fn count(&self) -> usize {
        self.snapshots.len()
    }

    /// Human-readable summary; differs per origin so clients can tell them apart.
    pub fn message(&self) -> String {
        if self.trigger == RefreshTrigger::History {
            return match &self.persistence.history_error {
                None => "History saved successfully".to_string(),
                Some(err) => format!("History fetched but not saved: {err}"),
            };
        }
        match self.origin {
            DataOrigin::Cache => "Served from cache".to_string(),
            DataOrigin::Live(endpoint) => {
                let from = match endpoint {
                    Endpoint::Primary => "Live data fetched",
                    Endpoint::Backup => "Fetched from backup API",
                };
                if self.persistence.snapshot_failures.is_empty() {
                    format!("{from} & current DB updated successfully")
                } else {
                    format!(
                        "{from}; current DB update failed for {} of {} coins",
                        self.persistence.snapshot_failures.len(),
                        self.snapshots.len()
                    )
                }
            }
            DataOrigin::Fallback => {
                "Price APIs unavailable; serving last stored data".to_string()
            }
        }
    }
}

struct FetchFailure {
    last: UpstreamError,
    all_timeouts: bool,
}

impl FetchFailure {
    fn into_refresh_error(self) -> RefreshError {
        if self.all_timeouts {
            RefreshError::UpstreamTimeout(self.last)
        } else {
            RefreshError::UpstreamUnavailable(self.last)
        }
    }
}

pub struct RefreshService {
    primary: Arc<dyn PriceSource>,
    backup: Option<Arc<dyn PriceSource>>,
    snapshots: Arc<dyn SnapshotStore>,
    history: Arc<dyn HistoryStore>,
    cache: Arc<SnapshotCache<Vec<AssetSnapshot>>>,
    clock: Arc<dyn Clock>,
    query: MarketsQuery,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl RefreshService {
    pub fn new(
        primary: Arc<dyn PriceSource>,
        snapshots: Arc<dyn SnapshotStore>,
        history: Arc<dyn HistoryStore>,
        cache: Arc<SnapshotCache<Vec<AssetSnapshot>>>,
    ) -> Self {
        Self {
            primary,
            backup: None,
            snapshots,
            history,
            cache,
            clock: Arc::new(SystemClock),
            query: MarketsQuery::default(),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire CoinGecko sources and a cache from configuration.
    pub fn from_config(
        config: &ResolvedConfig,
        snapshots: Arc<dyn SnapshotStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let upstream = &config.upstream;
        let client = reqwest::Client::new();
        let source = |name: &str, url: &str| {
            CoinGeckoMarketsSource::with_client(client.clone())
                .with_base_url(url)
                .with_name(name)
                .with_timeout(upstream.timeout)
                .with_user_agent(upstream.user_agent.clone())
        };

        let primary: Arc<dyn PriceSource> =
            Arc::new(source("coingecko-primary", &upstream.primary_url));
        let cache = Arc::new(SnapshotCache::new(config.cache.ttl));

        let mut service = Self::new(primary, snapshots, history, cache).with_query(
            MarketsQuery::top_by_market_cap(upstream.vs_currency.clone(), upstream.per_page),
        );
        if let Some(url) = &upstream.backup_url {
            service = service.with_backup(Arc::new(source("coingecko-backup", url)));
        }
        service
    }

    pub fn with_backup(mut self, backup: Arc<dyn PriceSource>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_query(mut self, query: MarketsQuery) -> Self {
        self.query = query;
        self
    }

    pub fn primary(&self) -> &Arc<dyn PriceSource> {
        &self.primary
    }

    /// Number of assets tracked; bounds the stored fallback list.
    pub fn tracked_count(&self) -> usize {
        self.query.per_page as usize
    }

    /// Run one cycle for `trigger`.
    ///
    /// Scheduled cycles skip with [`RefreshError::CycleInProgress`] when another
    /// cycle holds the lock; every other trigger waits for it.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome, RefreshError> {
        if trigger.uses_cache() {
            if let Some(outcome) = self.from_cache() {
                return Ok(outcome);
            }
        }

        let _guard = match trigger {
            RefreshTrigger::Scheduled => match self.cycle_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!("refresh cycle already running; skipping scheduled tick");
                    return Err(RefreshError::CycleInProgress);
                }
            },
            RefreshTrigger::Manual | RefreshTrigger::History => self.cycle_lock.lock().await,
        };

        if trigger.uses_cache() {
            // Another cycle may have filled the cache while we waited.
            if let Some(outcome) = self.from_cache() {
                return Ok(outcome);
            }
        }

        info!(trigger = %trigger, "refresh cycle starting");
        match self.fetch(trigger).await {
            Ok((endpoint, coins)) => Ok(self.persist(trigger, endpoint, &coins).await),
            Err(failure) if trigger.uses_stored_fallback() => self.stored_fallback(failure).await,
            Err(failure) => {
                let err = failure.into_refresh_error();
                warn!(trigger = %trigger, error = %err, "refresh cycle fetched nothing");
                Err(err)
            }
        }
    }

    /// Current data for clients: cache, then live upstream, then stored rows.
    pub async fn current(&self) -> Result<RefreshOutcome, RefreshError> {
        self.refresh(RefreshTrigger::Manual).await
    }

    /// Stored history for one asset, oldest first.
    pub async fn history(&self, asset_id: &str) -> Result<Vec<HistoryRecord>, RefreshError> {
        self.history
            .find_by_asset(asset_id)
            .await
            .map_err(RefreshError::Store)
    }

    fn from_cache(&self) -> Option<RefreshOutcome> {
        let snapshots = self.cache.get(COINS_KEY)?;
        debug!(count = snapshots.len(), "serving coins from cache");
        Some(RefreshOutcome {
            trigger: RefreshTrigger::Manual,
            origin: DataOrigin::Cache,
            observed_at: snapshots.first().map(|s| s.observed_at),
            snapshots,
            persistence: PersistenceReport::default(),
        })
    }

    async fn fetch(
        &self,
        trigger: RefreshTrigger,
    ) -> Result<(Endpoint, Vec<MarketCoin>), FetchFailure> {
        let primary_err = match self.primary.fetch_markets(&self.query).await {
            Ok(coins) => return Ok((Endpoint::Primary, coins)),
            Err(err) => err,
        };
        warn!(
            trigger = %trigger,
            endpoint = self.primary.name(),
            error = %primary_err,
            "primary price API failed"
        );

        let backup = match &self.backup {
            Some(backup) if trigger.uses_backup() => backup,
            _ => {
                return Err(FetchFailure {
                    all_timeouts: primary_err.is_timeout(),
                    last: primary_err,
                })
            }
        };

        match backup.fetch_markets(&self.query).await {
            Ok(coins) => Ok((Endpoint::Backup, coins)),
            Err(backup_err) => {
                error!(
                    trigger = %trigger,
                    endpoint = backup.name(),
                    error = %backup_err,
                    "backup price API failed"
                );
                Err(FetchFailure {
                    all_timeouts: primary_err.is_timeout() && backup_err.is_timeout(),
                    last: backup_err,
                })
            }
        }
    }

    /// Write a fetched batch. Store failures are logged and reported, never raised.
    async fn persist(
        &self,
        trigger: RefreshTrigger,
        endpoint: Endpoint,
        coins: &[MarketCoin],
    ) -> RefreshOutcome {
        let observed_at = self.clock.now();
        let snapshots: Vec<AssetSnapshot> = coins
            .iter()
            .map(|coin| AssetSnapshot::from_market(coin, observed_at))
            .collect();

        let mut report = PersistenceReport::default();
        for snapshot in &snapshots {
            match self.snapshots.upsert(snapshot).await {
                Ok(()) => report.snapshots_written += 1,
                Err(err) => {
                    let err = RefreshError::StoreWriteFailure(format!("{err:#}"));
                    error!(
                        asset_id = %snapshot.asset_id,
                        error = %err,
                        "snapshot upsert failed; serving fetched data anyway"
                    );
                    report.snapshot_failures.push(snapshot.asset_id.clone());
                }
            }
        }

        self.cache.set_default(COINS_KEY, snapshots.clone());

        if trigger.captures_history() {
            let records: Vec<HistoryRecord> =
                snapshots.iter().map(HistoryRecord::from_snapshot).collect();
            match self.history.append_batch(&records).await {
                Ok(()) => report.history_appended = records.len(),
                Err(err) => {
                    let err = RefreshError::StoreWriteFailure(format!("{err:#}"));
                    error!(trigger = %trigger, error = %err, "history append failed");
                    report.history_error = Some(err.to_string());
                }
            }
        }

        info!(
            trigger = %trigger,
            endpoint = ?endpoint,
            fetched = snapshots.len(),
            upserted = report.snapshots_written,
            upsert_failures = report.snapshot_failures.len(),
            history_appended = report.history_appended,
            observed_at = %observed_at,
            "refresh cycle complete"
        );

        RefreshOutcome {
            trigger,
            origin: DataOrigin::Live(endpoint),
            observed_at: Some(observed_at),
            snapshots,
            persistence: report,
        }
    }

    async fn stored_fallback(&self, failure: FetchFailure) -> Result<RefreshOutcome, RefreshError> {
        let rows = match self.snapshots.find_all(usize::MAX).await {
            Ok(rows) => rows,
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "reading stored snapshots for fallback failed");
                Vec::new()
            }
        };

        if rows.is_empty() {
            error!(error = %failure.last, "no upstream data and nothing stored to fall back on");
            return Err(RefreshError::NoFallbackDataAvailable(failure.last));
        }

        // Assets that dropped out of the tracked set keep their old rows; the
        // freshest observations win before market cap orders the rest.
        let mut rows = rows;
        rows.sort_by(|a, b| {
            b.observed_at
                .cmp(&a.observed_at)
                .then_with(|| {
                    b.market_cap
                        .unwrap_or(0.0)
                        .total_cmp(&a.market_cap.unwrap_or(0.0))
                })
                .then_with(|| a.asset_id.cmp(&b.asset_id))
        });
        rows.truncate(self.tracked_count());

        warn!(
            count = rows.len(),
            error = %failure.last,
            "price APIs unavailable; serving stored snapshots"
        );

        Ok(RefreshOutcome {
            trigger: RefreshTrigger::Manual,
            origin: DataOrigin::Fallback,
            observed_at: None,
            snapshots: rows,
            persistence: PersistenceReport::default(),
        })
    }
}
