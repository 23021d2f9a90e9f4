//! Session-aware quote refresh scheduler.
//!
//! Decides when to poll the quote source, merges results into the
//! [`QuoteCache`] and persists the cache through a [`QuoteSnapshotStore`].
//!
//! - Market closed: one fetch, persisted immediately, then the loop ends.
//! - Market open: fetch every `interval_secs`, persisting after every
//!   `persist_batch_size` successful fetches. When the session closes the
//!   loop does one final fetch and a forced persist.
//!
//! At most one loop runs at a time. Starting a new loop cancels the previous
//! one first; a cancelled loop never writes to the cache or the store again.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use stockfolio_market_data::{InstrumentCode, Quote, QuoteSource};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

use super::cache::QuoteCache;
use super::store::QuoteSnapshotStore;
use crate::settings::RefreshSettingsHandle;
use crate::transactions::LedgerRepositoryTrait;

/// Cooperative cancellation signal for one refresh loop.
#[derive(Clone)]
struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// Cancelled explicitly, or orphaned because its loop handle is gone.
    fn is_cancelled(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    async fn cancelled(&mut self) {
        // An error means the sender is gone, which also ends the loop
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }
}

struct ActiveLoop {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ActiveLoop {
    fn cancel(self) {
        self.cancel.send_replace(true);
        self.task.abort();
    }
}

/// Outcome of one fetch-and-merge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    /// Nothing to fetch, or the ledger could not be read
    Skipped,
    /// The source returned no quotes at all
    Empty,
    Fetched { received: usize, changed: usize },
    Cancelled,
}

struct SchedulerInner {
    source: Arc<dyn QuoteSource>,
    ledger: Arc<dyn LedgerRepositoryTrait>,
    cache: QuoteCache,
    store: Arc<dyn QuoteSnapshotStore>,
    settings: RefreshSettingsHandle,
    restored: OnceCell<usize>,
}

impl SchedulerInner {
    /// Loads the persisted snapshot into the cache. Runs at most once per
    /// scheduler; later calls return the count from the first load.
    async fn ensure_restored(&self) -> usize {
        *self
            .restored
            .get_or_init(|| async {
                match self.store.load_snapshot().await {
                    Ok(quotes) => {
                        let count = quotes.len();
                        self.cache.merge(quotes);
                        info!("Restored {} quotes from snapshot", count);
                        count
                    }
                    Err(e) => {
                        warn!("Failed to restore quote snapshot: {}", e);
                        0
                    }
                }
            })
            .await
    }

    fn held_codes(&self) -> Option<Vec<InstrumentCode>> {
        match self.ledger.list_held_instruments() {
            Ok(instruments) => Some(instruments.into_iter().map(|i| i.code).collect()),
            Err(e) => {
                warn!("Failed to list held instruments: {}", e);
                None
            }
        }
    }

    async fn refresh(&self, token: &CancelToken) -> Cycle {
        let codes = match self.held_codes() {
            Some(codes) if !codes.is_empty() => codes,
            _ => {
                debug!("No held instruments, skipping quote fetch");
                return Cycle::Skipped;
            }
        };

        let fresh = self.source.fetch_quotes(&codes).await;
        if token.is_cancelled() {
            debug!("Refresh loop cancelled, discarding {} quotes", fresh.len());
            return Cycle::Cancelled;
        }
        if fresh.is_empty() {
            warn!(
                "{} returned no quotes for {} instruments",
                self.source.id(),
                codes.len()
            );
            return Cycle::Empty;
        }

        let received = fresh.len();
        let changed = self.cache.merge(fresh);
        debug!(
            "Fetched {}/{} quotes from {}, {} changed",
            received,
            codes.len(),
            self.source.id(),
            changed
        );
        Cycle::Fetched { received, changed }
    }

    async fn persist(&self) {
        let snapshot = self.cache.snapshot();
        match self.store.save_snapshot(&snapshot).await {
            Ok(()) => debug!("Persisted {} quotes", snapshot.len()),
            Err(e) => warn!("Failed to persist quote snapshot: {}", e),
        }
    }

    async fn run(self: Arc<Self>, mut token: CancelToken) {
        self.ensure_restored().await;
        if token.is_cancelled() {
            return;
        }

        if !self.source.is_session_open() {
            info!("Market closed, running a single quote refresh");
            if let Cycle::Fetched { .. } = self.refresh(&token).await {
                if !token.is_cancelled() {
                    self.persist().await;
                }
            }
            return;
        }

        info!("Market open, starting periodic quote refresh");
        let mut since_persist: u32 = 0;
        while self.source.is_session_open() {
            match self.refresh(&token).await {
                Cycle::Cancelled => return,
                Cycle::Fetched { .. } => since_persist += 1,
                Cycle::Skipped | Cycle::Empty => {}
            }

            let settings = self.settings.current();
            if since_persist >= settings.persist_batch_size {
                if token.is_cancelled() {
                    return;
                }
                self.persist().await;
                since_persist = 0;
            }

            tokio::select! {
                _ = tokio::time::sleep(settings.interval()) => {}
                _ = token.cancelled() => return,
            }
            if token.is_cancelled() {
                return;
            }
        }

        info!("Market session closed, running final quote refresh");
        if self.refresh(&token).await == Cycle::Cancelled || token.is_cancelled() {
            return;
        }
        self.persist().await;
    }
}

/// Owns the refresh loop and the on-demand refresh entry points.
///
/// Loops are spawned on the ambient tokio runtime, so `start_fetching` must be
/// called from within one.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
    active: Mutex<Option<ActiveLoop>>,
}

impl RefreshScheduler {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        ledger: Arc<dyn LedgerRepositoryTrait>,
        cache: QuoteCache,
        store: Arc<dyn QuoteSnapshotStore>,
        settings: RefreshSettingsHandle,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                source,
                ledger,
                cache,
                store,
                settings,
                restored: OnceCell::new(),
            }),
            active: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.inner.cache
    }

    pub fn settings(&self) -> &RefreshSettingsHandle {
        &self.inner.settings
    }

    pub fn source_id(&self) -> &'static str {
        self.inner.source.id()
    }

    pub fn is_session_open(&self) -> bool {
        self.inner.source.is_session_open()
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveLoop>> {
        // The guarded value is a plain handle, safe to reuse after a panic
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads the persisted snapshot into the cache if that has not happened
    /// yet. Returns the number of quotes the snapshot held.
    pub async fn restore_snapshot(&self) -> usize {
        self.inner.ensure_restored().await
    }

    /// Starts a refresh loop, cancelling any loop already running.
    pub fn start_fetching(&self) {
        let mut active = self.active();
        if let Some(previous) = active.take() {
            debug!("Cancelling previous refresh loop");
            previous.cancel();
        }

        let (cancel, token) = CancelToken::new();
        let task = tokio::spawn(self.inner.clone().run(token));
        *active = Some(ActiveLoop { cancel, task });
    }

    /// Cancels the running loop, if any.
    pub fn stop_fetching(&self) {
        if let Some(previous) = self.active().take() {
            info!("Stopping quote refresh");
            previous.cancel();
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.active()
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Fetches one code now, merges it and persists immediately, whatever
    /// the session state. Returns the cached quote after the merge, or `None`
    /// when the source had nothing for the code.
    pub async fn refresh_stock(&self, code: &str) -> Option<Quote> {
        self.inner.ensure_restored().await;

        let codes = vec![code.to_string()];
        let fresh = self.inner.source.fetch_quotes(&codes).await;
        if !fresh.contains_key(code) {
            warn!("No quote returned for {}", code);
            return None;
        }

        self.inner.cache.merge(fresh);
        self.inner.persist().await;
        self.inner.cache.get(code)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(active) = self.active().take() {
            active.cancel();
        }
    }
}
