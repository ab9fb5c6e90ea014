use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::warn;

use super::{
    is_safe_asset_id, sort_chronologically, AssetSnapshot, HistoryRecord, HistoryStore,
    SnapshotStore,
};

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Current-state store backed by a single `snapshots.json` object keyed by asset id.
///
/// The file is loaded once and rewritten through a temp file + rename on every
/// upsert, so readers never see a half-written document. The in-memory copy is
/// only updated after the write succeeds.
pub struct JsonSnapshotStore {
    path: PathBuf,
    rows: tokio::sync::Mutex<Option<BTreeMap<String, AssetSnapshot>>>,
}

impl JsonSnapshotStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("snapshots.json"),
            rows: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<BTreeMap<String, AssetSnapshot>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn write_file(&self, rows: &BTreeMap<String, AssetSnapshot>) -> Result<()> {
        ensure_parent(&self.path).await?;
        let content = serde_json::to_string_pretty(rows).context("Failed to serialize snapshots")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn upsert(&self, snapshot: &AssetSnapshot) -> Result<()> {
        let mut guard = self.rows.lock().await;
        let mut rows = match guard.take() {
            Some(rows) => rows,
            None => self.read_file().await?,
        };

        let previous = rows.insert(snapshot.asset_id.clone(), snapshot.clone());
        if let Err(err) = self.write_file(&rows).await {
            match previous {
                Some(prev) => rows.insert(prev.asset_id.clone(), prev),
                None => rows.remove(&snapshot.asset_id),
            };
            *guard = Some(rows);
            return Err(err);
        }

        *guard = Some(rows);
        Ok(())
    }

    async fn find_all(&self, limit: usize) -> Result<Vec<AssetSnapshot>> {
        let mut guard = self.rows.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        Ok(guard
            .as_ref()
            .map(|rows| rows.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// History log with one JSONL file per asset under `history/`.
///
/// Directory structure:
/// ```text
/// data/
///   snapshots.json
///   history/
///     bitcoin.jsonl
///     ethereum.jsonl
/// ```
pub struct JsonlHistoryStore {
    base_path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: data_dir.as_ref().join("history"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn asset_file(&self, asset_id: &str) -> Result<PathBuf> {
        if !is_safe_asset_id(asset_id) {
            bail!("Refusing unsafe asset id {asset_id:?}");
        }
        Ok(self.base_path.join(format!("{asset_id}.jsonl")))
    }

    async fn read_jsonl(&self, path: &Path) -> Result<Vec<HistoryRecord>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to open history file"),
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                // A crash mid-append can leave a torn last line.
                Err(err) => warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping unreadable history line"
                ),
            }
        }
        Ok(records)
    }

    async fn append_jsonl(&self, path: &Path, records: &[&HistoryRecord]) -> Result<()> {
        ensure_parent(path).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {} for append", path.display()))?;

        let mut content = String::new();
        // Terminate a torn trailing line so the new records start on their own.
        if ends_mid_line(&mut file).await? {
            warn!(path = %path.display(), "history file ends mid-line; terminating it");
            content.push('\n');
        }
        for record in records {
            content.push_str(&serde_json::to_string(record).context("Failed to serialize record")?);
            content.push('\n');
        }

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

async fn ends_mid_line(file: &mut fs::File) -> Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait::async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append_batch(&self, records: &[HistoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        // Resolve every path first so an unsafe id rejects the whole batch.
        let mut grouped: HashMap<PathBuf, Vec<&HistoryRecord>> = HashMap::new();
        for record in records {
            let path = self.asset_file(&record.asset_id)?;
            grouped.entry(path).or_default().push(record);
        }

        let _guard = self.write_lock.lock().await;
        for (path, items) in grouped {
            self.append_jsonl(&path, &items).await?;
        }
        Ok(())
    }

    async fn find_by_asset(&self, asset_id: &str) -> Result<Vec<HistoryRecord>> {
        let path = self.asset_file(asset_id)?;
        let mut records = self.read_jsonl(&path).await?;
        sort_chronologically(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn snapshot(id: &str, price: f64, at: DateTime<Utc>) -> AssetSnapshot {
        AssetSnapshot {
            asset_id: id.to_string(),
            name: id.to_string(),
            symbol: id.chars().take(3).collect(),
            image_url: None,
            price: Some(price),
            market_cap: Some(price * 1000.0),
            change_24h: Some(1.0),
            high_24h: None,
            low_24h: None,
            total_volume: None,
            circulating_supply: None,
            upstream_last_updated: None,
            observed_at: at,
        }
    }

    #[tokio::test]
    async fn snapshot_upsert_persists_one_row_per_asset() -> Result<()> {
        let dir = TempDir::new()?;
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let store = JsonSnapshotStore::new(dir.path());
        store.upsert(&snapshot("bitcoin", 50000.0, t0)).await?;
        store.upsert(&snapshot("ethereum", 3000.0, t0)).await?;
        store
            .upsert(&snapshot("bitcoin", 52000.0, t0 + Duration::hours(1)))
            .await?;

        // A fresh instance sees exactly what was written.
        let reopened = JsonSnapshotStore::new(dir.path());
        let rows = reopened.find_all(10).await?;
        assert_eq!(rows.len(), 2);
        let btc = rows.iter().find(|r| r.asset_id == "bitcoin").unwrap();
        assert_eq!(btc.price, Some(52000.0));
        assert_eq!(btc.observed_at, t0 + Duration::hours(1));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(reopened.path())?)?;
        assert_eq!(raw.as_object().unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_find_all_on_missing_file_is_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonSnapshotStore::new(dir.path().join("nothing-here"));
        assert!(store.find_all(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_previous_state() -> Result<()> {
        let dir = TempDir::new()?;
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        store.upsert(&snapshot("bitcoin", 50000.0, t0)).await?;

        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(store.path().with_extension("json.tmp"))?;
        assert!(store.upsert(&snapshot("bitcoin", 1.0, t0)).await.is_err());

        let rows = store.find_all(10).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Some(50000.0));
        Ok(())
    }

    #[tokio::test]
    async fn history_appends_and_sorts_across_batches() -> Result<()> {
        let dir = TempDir::new()?;
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let store = JsonlHistoryStore::new(dir.path());

        let late = HistoryRecord::from_snapshot(&snapshot("bitcoin", 2.0, t0 + Duration::hours(1)));
        let early = HistoryRecord::from_snapshot(&snapshot("bitcoin", 1.0, t0));
        let eth = HistoryRecord::from_snapshot(&snapshot("ethereum", 9.0, t0));

        store.append_batch(&[late, eth]).await?;
        store.append_batch(&[early]).await?;

        let history = store.find_by_asset("bitcoin").await?;
        assert_eq!(history.len(), 2);
        assert!(history[0].observed_at <= history[1].observed_at);
        assert_eq!(history[0].price, Some(1.0));

        let raw = std::fs::read_to_string(dir.path().join("history").join("bitcoin.jsonl"))?;
        assert_eq!(raw.lines().count(), 2, "append must not rewrite prior lines");
        Ok(())
    }

    #[tokio::test]
    async fn history_skips_torn_lines() -> Result<()> {
        let dir = TempDir::new()?;
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let store = JsonlHistoryStore::new(dir.path());
        store
            .append_batch(&[HistoryRecord::from_snapshot(&snapshot("bitcoin", 1.0, t0))])
            .await?;

        let path = dir.path().join("history").join("bitcoin.jsonl");
        let mut content = std::fs::read_to_string(&path)?;
        content.push_str("{\"assetId\":\"bitc");
        std::fs::write(&path, content)?;

        assert_eq!(store.find_by_asset("bitcoin").await?.len(), 1);

        // The next append starts on a fresh line instead of gluing onto the fragment.
        let t1 = t0 + chrono::Duration::hours(1);
        store
            .append_batch(&[HistoryRecord::from_snapshot(&snapshot("bitcoin", 2.0, t1))])
            .await?;
        let records = store.find_by_asset("bitcoin").await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].price, Some(2.0));
        assert_eq!(records[1].observed_at, t1);
        Ok(())
    }

    #[tokio::test]
    async fn history_rejects_unsafe_ids_without_writing() -> Result<()> {
        let dir = TempDir::new()?;
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let store = JsonlHistoryStore::new(dir.path());

        let good = HistoryRecord::from_snapshot(&snapshot("bitcoin", 1.0, t0));
        let mut bad = good.clone();
        bad.asset_id = "../escape".to_string();

        assert!(store.append_batch(&[good, bad]).await.is_err());
        assert!(!dir.path().join("history").exists());
        assert!(store.find_by_asset("../escape").await.is_err());
        Ok(())
    }
}
