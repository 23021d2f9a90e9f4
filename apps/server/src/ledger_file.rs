//! CSV file backing the in-memory ledger.
//!
//! The file is read once at startup and rewritten in full after every ledger
//! change. Writes go to a sibling temp file first and are renamed into place,
//! so a crash mid-write leaves the previous version intact. When some rows
//! cannot be read at startup the original file is copied aside first, since
//! the next rewrite would otherwise drop them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use stockfolio_core::transactions::{
    export_csv, import_csv, LedgerImportSummary, LedgerRepositoryTrait, SkippedRow,
};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// What a startup load found in the file.
#[derive(Debug, Default)]
pub struct LedgerLoad {
    pub summary: LedgerImportSummary,
    pub skipped: Vec<SkippedRow>,
    /// Copy of the original file, made when rows were skipped.
    pub backup: Option<PathBuf>,
}

pub struct LedgerFile {
    path: PathBuf,
    ledger: Arc<dyn LedgerRepositoryTrait>,
    write_lock: Mutex<()>,
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>, ledger: Arc<dyn LedgerRepositoryTrait>) -> Self {
        Self {
            path: path.into(),
            ledger,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Imports the file into the ledger. A missing file is an empty ledger.
    pub async fn load(&self) -> anyhow::Result<LedgerLoad> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No ledger file at {}, starting empty", self.path.display());
                return Ok(LedgerLoad::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let decoded = import_csv(&content)
            .with_context(|| format!("Failed to decode {}", self.path.display()))?;
        for row in &decoded.skipped {
            tracing::warn!("Skipped ledger line {}: {}", row.line, row.reason);
        }
        let backup = if decoded.skipped.is_empty() {
            None
        } else {
            Some(self.backup(&content).await?)
        };
        let summary = self
            .ledger
            .import(decoded.instruments, decoded.events)
            .await?;
        tracing::info!(
            "Loaded {} instruments and {} transactions from {}",
            summary.instruments_upserted,
            summary.transactions_inserted,
            self.path.display()
        );
        Ok(LedgerLoad {
            summary,
            skipped: decoded.skipped,
            backup,
        })
    }

    /// Writes `content` next to the ledger as `<file>.bak-<timestamp>`.
    async fn backup(&self, content: &[u8]) -> anyhow::Result<PathBuf> {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".bak-{}", Utc::now().format("%Y%m%dT%H%M%S%3f")));
        let path = PathBuf::from(name);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to back up ledger to {}", path.display()))?;
        tracing::warn!("Original ledger kept at {}", path.display());
        Ok(path)
    }

    /// Writes the current ledger to disk.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        let instruments = self.ledger.list_held_instruments()?;
        let events = self.ledger.list_all_transactions()?;
        let content = export_csv(&instruments, &events)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        tracing::debug!(
            "Wrote {} transactions to {}",
            events.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Spawns a task that rewrites the file after ledger changes. Bursts of
    /// events are coalesced into one write.
    pub fn spawn_writer(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.ledger.subscribe();
        let file = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                loop {
                    match rx.try_recv() {
                        Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }

                if let Err(e) = file.flush().await {
                    tracing::error!("Failed to persist ledger: {:#}", e);
                }
            }
        })
    }
}
