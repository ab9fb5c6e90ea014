#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use coindash::cache::SnapshotCache;
use coindash::clock::MockClock;
use coindash::error::UpstreamError;
use coindash::market_data::{MarketCoin, MarketsQuery, PriceSource};
use coindash::refresh::RefreshService;
use coindash::store::{
    AssetSnapshot, HistoryRecord, HistoryStore, MemoryHistoryStore, MemorySnapshotStore,
    SnapshotStore,
};
use tokio::sync::Notify;

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn coin(id: &str, price: f64, market_cap: f64) -> MarketCoin {
    MarketCoin {
        id: id.to_string(),
        name: id[..1].to_uppercase() + &id[1..],
        symbol: id.chars().take(3).collect(),
        image: Some(format!("https://img.example/{id}.png")),
        current_price: Some(price),
        market_cap: Some(market_cap),
        price_change_percentage_24h: Some(2.5),
        high_24h: Some(price * 1.02),
        low_24h: Some(price * 0.98),
        total_volume: Some(market_cap / 30.0),
        circulating_supply: Some(market_cap / price),
        last_updated: Some("2024-05-01T11:59:30.000Z".to_string()),
    }
}

pub fn top_three() -> Vec<MarketCoin> {
    vec![
        coin("bitcoin", 50000.0, 900_000_000_000.0),
        coin("ethereum", 3000.0, 360_000_000_000.0),
        coin("solana", 150.0, 65_000_000_000.0),
    ]
}

pub fn unavailable(endpoint: &str) -> UpstreamError {
    UpstreamError::Status {
        endpoint: endpoint.to_string(),
        status: 503,
        body: "down".to_string(),
    }
}

pub fn timed_out(endpoint: &str) -> UpstreamError {
    UpstreamError::Timeout {
        endpoint: endpoint.to_string(),
        timeout: Duration::from_secs(10),
    }
}

/// A price source that replays scripted responses and counts calls.
///
/// Once the script runs out, the last response repeats.
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Result<Vec<MarketCoin>, UpstreamError>>>,
    last: Mutex<Option<Result<Vec<MarketCoin>, UpstreamError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(name: &str, coins: Vec<MarketCoin>) -> Self {
        Self::new(name).then(Ok(coins))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name).then(Err(unavailable(name)))
    }

    pub fn then(self, response: Result<Vec<MarketCoin>, UpstreamError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn fetch_markets(&self, _query: &MarketsQuery) -> Result<Vec<MarketCoin>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(response) = next {
            *last = Some(response);
        }
        last.clone().unwrap_or_else(|| Err(unavailable(&self.name)))
    }

    async fn ping(&self) -> Result<u16, UpstreamError> {
        Ok(200)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A price source that blocks inside `fetch_markets` until released.
pub struct GatedSource {
    coins: Vec<MarketCoin>,
    pub entered: Notify,
    pub release: Notify,
    calls: AtomicUsize,
}

impl GatedSource {
    pub fn new(coins: Vec<MarketCoin>) -> Self {
        Self {
            coins,
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for GatedSource {
    async fn fetch_markets(&self, _query: &MarketsQuery) -> Result<Vec<MarketCoin>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.coins.clone())
    }

    async fn ping(&self) -> Result<u16, UpstreamError> {
        Ok(200)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Snapshot store whose writes always fail; reads delegate to an inner store.
#[derive(Default)]
pub struct FailingSnapshotStore {
    pub inner: MemorySnapshotStore,
}

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn upsert(&self, _snapshot: &AssetSnapshot) -> Result<()> {
        anyhow::bail!("disk full")
    }

    async fn find_all(&self, limit: usize) -> Result<Vec<AssetSnapshot>> {
        self.inner.find_all(limit).await
    }
}

#[derive(Default)]
pub struct FailingHistoryStore;

#[async_trait]
impl HistoryStore for FailingHistoryStore {
    async fn append_batch(&self, _records: &[HistoryRecord]) -> Result<()> {
        anyhow::bail!("history volume is read-only")
    }

    async fn find_by_asset(&self, _asset_id: &str) -> Result<Vec<HistoryRecord>> {
        Ok(Vec::new())
    }
}

/// Everything a pipeline test needs to poke at.
pub struct Harness {
    pub primary: Arc<ScriptedSource>,
    pub backup: Option<Arc<ScriptedSource>>,
    pub snapshots: Arc<MemorySnapshotStore>,
    pub history: Arc<MemoryHistoryStore>,
    pub clock: Arc<MockClock>,
    pub service: Arc<RefreshService>,
}

impl Harness {
    pub fn new(primary: ScriptedSource, backup: Option<ScriptedSource>) -> Self {
        Self::with_query(primary, backup, MarketsQuery::default())
    }

    pub fn with_query(
        primary: ScriptedSource,
        backup: Option<ScriptedSource>,
        query: MarketsQuery,
    ) -> Self {
        let primary = Arc::new(primary);
        let backup = backup.map(Arc::new);
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let history = Arc::new(MemoryHistoryStore::new());
        let clock = Arc::new(MockClock::new(noon()));
        let cache = Arc::new(SnapshotCache::new(Duration::from_secs(60)).with_clock(clock.clone()));

        let mut service = RefreshService::new(
            primary.clone(),
            snapshots.clone(),
            history.clone(),
            cache,
        )
        .with_clock(clock.clone())
        .with_query(query);
        if let Some(backup) = &backup {
            service = service.with_backup(backup.clone());
        }

        Self {
            primary,
            backup,
            snapshots,
            history,
            clock,
            service: Arc::new(service),
        }
    }
}
