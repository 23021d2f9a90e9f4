//! Tests for the refresh scheduler, driven by tokio's paused clock.

#[cfg(test)]
mod tests {
    use crate::instruments::Instrument;
    use crate::quotes::{InMemorySnapshotStore, QuoteCache, RefreshScheduler};
    use crate::settings::{RefreshSettings, RefreshSettingsHandle};
    use crate::transactions::{InMemoryLedgerRepository, LedgerRepositoryTrait};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use stockfolio_market_data::{InstrumentCode, Quote, QuoteMap, QuoteSource};
    use tokio::time::Instant;

    // ============================================================================
    // Fake quote source
    // ============================================================================

    enum Session {
        Closed,
        Open,
        OpenUntil(Instant),
    }

    struct FakeSource {
        session: Mutex<Session>,
        failing: HashSet<String>,
        delay: Duration,
        fetches: AtomicUsize,
        open_fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(session: Session) -> Self {
            Self {
                session: Mutex::new(session),
                failing: HashSet::new(),
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
                open_fetches: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, codes: &[&str]) -> Self {
            self.failing = codes.iter().map(|c| c.to_string()).collect();
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn open_fetches(&self) -> usize {
            self.open_fetches.load(Ordering::SeqCst)
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap()
    }

    #[async_trait]
    impl QuoteSource for FakeSource {
        fn id(&self) -> &'static str {
            "FAKE"
        }

        fn is_session_open(&self) -> bool {
            match *self.session.lock().unwrap() {
                Session::Closed => false,
                Session::Open => true,
                Session::OpenUntil(deadline) => Instant::now() < deadline,
            }
        }

        async fn fetch_quotes(&self, codes: &[InstrumentCode]) -> QuoteMap {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            if self.is_session_open() {
                self.open_fetches.fetch_add(1, Ordering::SeqCst);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            codes
                .iter()
                .filter(|code| !self.failing.contains(*code))
                .map(|code| {
                    let quote = Quote::new(
                        code.clone(),
                        Decimal::from(100 + n),
                        base_time() + chrono::Duration::seconds(n),
                        "FAKE",
                    );
                    (code.clone(), quote)
                })
                .collect()
        }
    }

    // ============================================================================
    // Helpers
    // ============================================================================

    struct Harness {
        source: Arc<FakeSource>,
        store: Arc<InMemorySnapshotStore>,
        settings: RefreshSettingsHandle,
        scheduler: RefreshScheduler,
    }

    async fn harness(
        source: FakeSource,
        codes: &[&str],
        store: InMemorySnapshotStore,
        settings: RefreshSettings,
    ) -> Harness {
        let ledger = Arc::new(InMemoryLedgerRepository::new());
        for code in codes {
            ledger
                .upsert_instrument(Instrument::new(code, format!("Name {}", code)))
                .await
                .unwrap();
        }
        let source = Arc::new(source);
        let store = Arc::new(store);
        let settings = RefreshSettingsHandle::new(settings);
        let scheduler = RefreshScheduler::new(
            source.clone(),
            ledger,
            QuoteCache::new(),
            store.clone(),
            settings.clone(),
        );
        Harness {
            source,
            store,
            settings,
            scheduler,
        }
    }

    fn every(interval_secs: u64, persist_batch_size: u32) -> RefreshSettings {
        RefreshSettings {
            interval_secs,
            persist_batch_size,
        }
    }

    async fn wait_until_idle(scheduler: &RefreshScheduler) {
        for _ in 0..1000 {
            if !scheduler.is_fetching() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("refresh loop did not finish");
    }

    fn snapshot_with(code: &str, price: Decimal) -> QuoteMap {
        let quote = Quote::new(code, price, base_time() - chrono::Duration::hours(1), "FAKE");
        QuoteMap::from([(code.to_string(), quote)])
    }

    // ============================================================================
    // Closed session
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_fetches_once_and_persists() {
        let h = harness(
            FakeSource::new(Session::Closed),
            &["A", "B"],
            InMemorySnapshotStore::new(),
            every(5, 10),
        )
        .await;

        h.scheduler.start_fetching();
        wait_until_idle(&h.scheduler).await;

        assert_eq!(h.source.fetches(), 1);
        assert_eq!(h.store.save_count(), 1);
        assert_eq!(h.scheduler.cache().len(), 2);
        assert_eq!(h.store.saved().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_codes_keep_cached_quotes() {
        let h = harness(
            FakeSource::new(Session::Closed).failing(&["B"]),
            &["A", "B"],
            InMemorySnapshotStore::with_snapshot(snapshot_with("B", dec!(50))),
            every(5, 10),
        )
        .await;

        h.scheduler.start_fetching();
        wait_until_idle(&h.scheduler).await;

        let cache = h.scheduler.cache();
        assert_eq!(cache.get("A").unwrap().price, dec!(101));
        assert_eq!(cache.get("B").unwrap().price, dec!(50));
        let saved = h.store.saved().unwrap();
        assert_eq!(saved["B"].price, dec!(50));
        assert_eq!(saved["A"].price, dec!(101));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_ledger_skips_fetch() {
        let h = harness(
            FakeSource::new(Session::Closed),
            &[],
            InMemorySnapshotStore::new(),
            every(5, 10),
        )
        .await;

        h.scheduler.start_fetching();
        wait_until_idle(&h.scheduler).await;

        assert_eq!(h.source.fetches(), 0);
        assert_eq!(h.store.save_count(), 0);
    }

    // ============================================================================
    // Open session
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_open_session_polls_until_close_then_persists() {
        let close_at = Instant::now() + Duration::from_secs(5);
        let h = harness(
            FakeSource::new(Session::OpenUntil(close_at)),
            &["A", "B"],
            InMemorySnapshotStore::new(),
            every(2, 10),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_secs(10)).await;
        wait_until_idle(&h.scheduler).await;

        let open = h.source.open_fetches();
        assert!((2..=3).contains(&open), "open-session fetches: {}", open);
        // One more fetch after the close
        assert_eq!(h.source.fetches(), open + 1);
        // Fewer than ten cycles, so only the closing persist happened
        assert_eq!(h.store.save_count(), 1);
        assert!(!h.scheduler.is_fetching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_session_persists_every_batch() {
        let h = harness(
            FakeSource::new(Session::Open),
            &["A"],
            InMemorySnapshotStore::new(),
            every(1, 3),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_millis(6500)).await;

        // Fetches at t = 0..=6, persisted after the 3rd and the 6th
        assert_eq!(h.source.fetches(), 7);
        assert_eq!(h.store.save_count(), 2);
        assert!(h.scheduler.is_fetching());

        h.scheduler.stop_fetching();
        assert!(!h.scheduler.is_fetching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_results_do_not_trigger_batch_persist() {
        let close_at = Instant::now() + Duration::from_secs(3);
        let h = harness(
            FakeSource::new(Session::OpenUntil(close_at)).failing(&["A"]),
            &["A"],
            InMemorySnapshotStore::new(),
            every(1, 1),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_secs(5)).await;
        wait_until_idle(&h.scheduler).await;

        assert_eq!(h.source.fetches(), 4);
        // Only the forced persist at session close
        assert_eq!(h.store.save_count(), 1);
        assert!(h.scheduler.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_on_next_sleep() {
        let h = harness(
            FakeSource::new(Session::Open),
            &["A"],
            InMemorySnapshotStore::new(),
            every(10, 100),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.source.fetches(), 1);

        h.settings.update(every(1, 100)).unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        // t = 0, then the pending 10s sleep finishes, then 1s cycles: 10, 11, 12
        assert_eq!(h.source.fetches(), 4);
        h.scheduler.stop_fetching();
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_loop() {
        let h = harness(
            FakeSource::new(Session::Open),
            &["A"],
            InMemorySnapshotStore::new(),
            every(1, 100),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.source.fetches(), 2);

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_millis(2200)).await;

        // New loop fetched at 1.5, 2.5 and 3.5; the old one would have added 2 and 3
        assert_eq!(h.source.fetches(), 5);
        assert!(h.scheduler.is_fetching());
        h.scheduler.stop_fetching();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_fetch() {
        let h = harness(
            FakeSource::new(Session::Open).with_delay(Duration::from_secs(5)),
            &["A"],
            InMemorySnapshotStore::new(),
            every(1, 1),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.source.fetches(), 1);

        h.scheduler.stop_fetching();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!h.scheduler.is_fetching());
        assert!(h.scheduler.cache().is_empty());
        assert_eq!(h.store.save_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_restored_once() {
        let h = harness(
            FakeSource::new(Session::Closed),
            &["A"],
            InMemorySnapshotStore::with_snapshot(snapshot_with("Z", dec!(7))),
            every(5, 10),
        )
        .await;

        assert_eq!(h.scheduler.restore_snapshot().await, 1);
        assert_eq!(h.scheduler.cache().get("Z").unwrap().price, dec!(7));

        h.scheduler.start_fetching();
        wait_until_idle(&h.scheduler).await;
        h.scheduler.start_fetching();
        wait_until_idle(&h.scheduler).await;

        assert_eq!(h.store.load_count(), 1);
        assert_eq!(h.scheduler.cache().len(), 2);
    }

    // ============================================================================
    // Single-code refresh
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stock_persists_immediately() {
        let h = harness(
            FakeSource::new(Session::Open),
            &["A", "B"],
            InMemorySnapshotStore::new(),
            every(5, 10),
        )
        .await;

        let quote = h.scheduler.refresh_stock("A").await.unwrap();

        assert_eq!(quote.code, "A");
        assert_eq!(quote.price, dec!(101));
        assert_eq!(h.store.save_count(), 1);
        assert!(h.scheduler.cache().get("B").is_none());
        assert!(!h.scheduler.is_fetching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stock_runs_alongside_loop() {
        let h = harness(
            FakeSource::new(Session::Open),
            &["A"],
            InMemorySnapshotStore::new(),
            every(10, 100),
        )
        .await;

        h.scheduler.start_fetching();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.scheduler.cache().get("A").unwrap().price, dec!(101));
        assert_eq!(h.store.save_count(), 0);

        let quote = h.scheduler.refresh_stock("A").await.unwrap();

        assert_eq!(quote.price, dec!(102));
        assert_eq!(h.scheduler.cache().get("A").unwrap().price, dec!(102));
        assert_eq!(h.store.save_count(), 1);
        assert!(h.scheduler.is_fetching());

        // The loop keeps its schedule and its next cycle still lands
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.source.fetches(), 3);
        assert_eq!(h.scheduler.cache().get("A").unwrap().price, dec!(103));
        assert!(h.scheduler.is_fetching());
        h.scheduler.stop_fetching();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stock_without_result() {
        let h = harness(
            FakeSource::new(Session::Closed).failing(&["A"]),
            &["A"],
            InMemorySnapshotStore::new(),
            every(5, 10),
        )
        .await;

        assert!(h.scheduler.refresh_stock("A").await.is_none());
        assert_eq!(h.store.save_count(), 0);
    }
}
