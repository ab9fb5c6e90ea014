mod json_file;
mod memory;
mod models;

pub use json_file::{JsonSnapshotStore, JsonlHistoryStore};
pub use memory::{MemoryHistoryStore, MemorySnapshotStore};
pub use models::{AssetSnapshot, HistoryRecord};

use anyhow::Result;

/// Current-state store: one row per asset, overwritten on every observation.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Create the row for `snapshot.asset_id`, or replace every field of it.
    async fn upsert(&self, snapshot: &AssetSnapshot) -> Result<()>;

    /// Up to `limit` rows in a stable order.
    async fn find_all(&self, limit: usize) -> Result<Vec<AssetSnapshot>>;
}

/// Append-only observation log.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_batch(&self, records: &[HistoryRecord]) -> Result<()>;

    /// All records for one asset, ascending by `observed_at`.
    async fn find_by_asset(&self, asset_id: &str) -> Result<Vec<HistoryRecord>>;
}

/// Whether `asset_id` can be used as a single path component.
///
/// Upstream ids are lowercase slugs like `bitcoin` or `avalanche-2`.
pub fn is_safe_asset_id(asset_id: &str) -> bool {
    !asset_id.is_empty()
        && asset_id.len() <= 128
        && asset_id != "."
        && asset_id != ".."
        && asset_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

/// Stable ascending sort by observation time.
pub(crate) fn sort_chronologically(records: &mut [HistoryRecord]) {
    records.sort_by_key(|r| r.observed_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_upstream_style_ids() {
        for id in ["bitcoin", "avalanche-2", "usd-coin", "wrapped_steth", "a.b"] {
            assert!(is_safe_asset_id(id), "{id} should be accepted");
        }
    }

    #[test]
    fn rejects_path_like_ids() {
        for id in ["", ".", "..", "../etc", "a/b", "a\\b", "Bitcoin", "btc usd"] {
            assert!(!is_safe_asset_id(id), "{id:?} should be rejected");
        }
        assert!(!is_safe_asset_id(&"a".repeat(129)));
    }
}
