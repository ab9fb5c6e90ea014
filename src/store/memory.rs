use std::collections::BTreeMap;

use anyhow::Result;

use super::{sort_chronologically, AssetSnapshot, HistoryRecord, HistoryStore, SnapshotStore};

/// In-process current-state store. The map key is the uniqueness constraint.
#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: tokio::sync::Mutex<BTreeMap<String, AssetSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn get(&self, asset_id: &str) -> Option<AssetSnapshot> {
        self.rows.lock().await.get(asset_id).cloned()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upsert(&self, snapshot: &AssetSnapshot) -> Result<()> {
        let mut rows = self.rows.lock().await;
        rows.insert(snapshot.asset_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn find_all(&self, limit: usize) -> Result<Vec<AssetSnapshot>> {
        let rows = self.rows.lock().await;
        Ok(rows.values().take(limit).cloned().collect())
    }
}

/// In-process history log, kept in insertion order.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: tokio::sync::Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append_batch(&self, records: &[HistoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut store = self.records.lock().await;
        store.extend_from_slice(records);
        Ok(())
    }

    async fn find_by_asset(&self, asset_id: &str) -> Result<Vec<HistoryRecord>> {
        let store = self.records.lock().await;
        let mut matching: Vec<HistoryRecord> = store
            .iter()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect();
        sort_chronologically(&mut matching);
        Ok(matching)
    }
}
