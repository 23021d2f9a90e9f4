//! Quote snapshot persistence.
//!
//! The live cache is written out so a cold start can show the last known
//! prices before the first fetch completes. A snapshot holds only the latest
//! quote per code; there is no history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use stockfolio_market_data::{Quote, QuoteMap};

use crate::errors::{Error, Result};

/// Storage interface for the quote cache snapshot.
#[async_trait]
pub trait QuoteSnapshotStore: Send + Sync {
    /// Loads the last saved snapshot. A store that was never written returns
    /// an empty map.
    async fn load_snapshot(&self) -> Result<QuoteMap>;

    /// Replaces the saved snapshot with `quotes`.
    async fn save_snapshot(&self, quotes: &QuoteMap) -> Result<()>;
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    version: u32,
    quotes: BTreeMap<String, Quote>,
}

/// Snapshot stored as a JSON document on disk.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact. Saves are
/// serialized because they share the temp file.
pub struct JsonFileSnapshotStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl QuoteSnapshotStore for JsonFileSnapshotStore {
    async fn load_snapshot(&self) -> Result<QuoteMap> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No quote snapshot at {}", self.path.display());
                return Ok(QuoteMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let file: SnapshotFile = serde_json::from_slice(&bytes)?;
        if file.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "Unsupported snapshot version {} in {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(file.quotes.into_iter().collect())
    }

    async fn save_snapshot(&self, quotes: &QuoteMap) -> Result<()> {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            quotes: quotes
                .iter()
                .map(|(code, quote)| (code.clone(), quote.clone()))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!("Saved {} quotes to {}", quotes.len(), self.path.display());
        Ok(())
    }
}

/// Snapshot kept in memory. Counts saves so callers can observe persistence.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshot: Mutex<Option<QuoteMap>>,
    saves: AtomicUsize,
    loads: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `quotes`, as if saved by an earlier run.
    pub fn with_snapshot(quotes: QuoteMap) -> Self {
        Self {
            snapshot: Mutex::new(Some(quotes)),
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// The last saved snapshot, if any.
    pub fn saved(&self) -> Option<QuoteMap> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl QuoteSnapshotStore for InMemorySnapshotStore {
    async fn load_snapshot(&self) -> Result<QuoteMap> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let guard = self
            .snapshot
            .lock()
            .map_err(|e| Error::Snapshot(e.to_string()))?;
        Ok(guard.clone().unwrap_or_default())
    }

    async fn save_snapshot(&self, quotes: &QuoteMap) -> Result<()> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|e| Error::Snapshot(e.to_string()))?;
        *guard = Some(quotes.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockfolio_market_data::PriceLimit;

    fn sample() -> QuoteMap {
        let updated_at = Utc.with_ymd_and_hms(2024, 3, 4, 5, 30, 0).unwrap();
        let tsmc = Quote::with_previous_close("2330", dec!(785), dec!(770), updated_at, "TWSE")
            .with_limits(Some(dec!(847)), Some(dec!(693)))
            .with_name(Some("台積電".to_string()));
        let capped = Quote::with_previous_close("6488", dec!(550), dec!(500), updated_at, "TWSE")
            .with_limits(Some(dec!(550)), Some(dec!(450)));
        let mut quotes = QuoteMap::new();
        quotes.insert(tsmc.code.clone(), tsmc);
        quotes.insert(capped.code.clone(), capped);
        quotes
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path().join("cache").join("quotes.json"));

        let quotes = sample();
        store.save_snapshot(&quotes).await.unwrap();
        let loaded = store.load_snapshot().await.unwrap();

        assert_eq!(loaded, quotes);
        assert_eq!(loaded["6488"].limit, PriceLimit::LimitUp);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path().join("quotes.json"));
        assert!(store.load_snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_save_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path().join("quotes.json"));

        store.save_snapshot(&sample()).await.unwrap();
        store.save_snapshot(&QuoteMap::new()).await.unwrap();

        assert!(store.load_snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = JsonFileSnapshotStore::new(path);
        assert!(matches!(
            store.load_snapshot().await,
            Err(Error::Snapshot(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_json_store_concurrent_saves_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileSnapshotStore::new(dir.path().join("quotes.json")));

        let mut handles = Vec::new();
        for round in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let quotes = if round % 2 == 0 { sample() } else { QuoteMap::new() };
                store.save_snapshot(&quotes).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load_snapshot().await.unwrap();
        assert!(loaded.is_empty() || loaded == sample());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_in_memory_store_counts_saves() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load_snapshot().await.unwrap().is_empty());

        store.save_snapshot(&sample()).await.unwrap();
        store.save_snapshot(&sample()).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load_count(), 1);
        assert_eq!(store.saved().unwrap().len(), 2);
    }
}
