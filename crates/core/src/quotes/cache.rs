//! Live quote cache.
//!
//! A single `code -> Quote` map published through a `watch` channel: readers
//! always see a complete snapshot and are woken on every change. Only the
//! refresh scheduler writes to it.

use std::sync::Arc;

use log::debug;
use stockfolio_market_data::{Quote, QuoteMap};
use tokio::sync::watch;

/// An immutable view of every cached quote at one point in time.
pub type QuoteSnapshot = Arc<QuoteMap>;

/// Shared handle to the live quote map. Clones refer to the same cache.
#[derive(Clone)]
pub struct QuoteCache {
    sender: Arc<watch::Sender<QuoteSnapshot>>,
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteCache {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(QuoteMap::new()));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> QuoteSnapshot {
        self.sender.borrow().clone()
    }

    pub fn get(&self, code: &str) -> Option<Quote> {
        self.sender.borrow().get(code).cloned()
    }

    pub fn len(&self) -> usize {
        self.sender.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.borrow().is_empty()
    }

    /// Receiver that is notified after every merge that changed the cache.
    pub fn subscribe(&self) -> watch::Receiver<QuoteSnapshot> {
        self.sender.subscribe()
    }

    /// Merges fresh quotes into the cache and returns how many entries changed.
    ///
    /// The read-merge-publish happens under the channel's lock, so concurrent
    /// merges cannot lose each other's updates. Observers are only notified
    /// when something actually changed.
    pub(crate) fn merge(&self, fresh: QuoteMap) -> usize {
        if fresh.is_empty() {
            return 0;
        }
        let mut changed = 0;
        self.sender.send_if_modified(|current| {
            let (merged, count) = merge_quotes(current, fresh);
            changed = count;
            if count > 0 {
                *current = Arc::new(merged);
                true
            } else {
                false
            }
        });
        debug!("Quote cache merge changed {} entries", changed);
        changed
    }
}

/// Merges `fresh` over `current`.
///
/// Codes absent from `fresh` keep their cached quote, so a failed fetch never
/// erases a price. A fresh quote older than the cached one for the same code
/// is discarded, which keeps `updated_at` non-decreasing per code. Merging the
/// same input twice changes nothing the second time.
///
/// Returns the merged map and the number of entries that changed.
pub fn merge_quotes(current: &QuoteMap, fresh: QuoteMap) -> (QuoteMap, usize) {
    let mut merged = current.clone();
    let mut changed = 0;

    for (code, quote) in fresh {
        match merged.get(&code) {
            Some(existing) if quote.updated_at < existing.updated_at => {
                debug!(
                    "Discarding stale quote for {} ({} < {})",
                    code, quote.updated_at, existing.updated_at
                );
            }
            Some(existing) if *existing == quote => {}
            _ => {
                merged.insert(code, quote);
                changed += 1;
            }
        }
    }

    (merged, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 2, minute, 0).unwrap()
    }

    fn quote(code: &str, price: Decimal, minute: u32) -> Quote {
        Quote::new(code, price, at(minute), "TEST")
    }

    fn map(quotes: Vec<Quote>) -> QuoteMap {
        quotes.into_iter().map(|q| (q.code.clone(), q)).collect()
    }

    #[test]
    fn test_merge_keeps_codes_missing_from_fresh() {
        let current = map(vec![quote("A", dec!(10), 0), quote("B", dec!(20), 0)]);
        let fresh = map(vec![quote("A", dec!(11), 1)]);

        let (merged, changed) = merge_quotes(&current, fresh);

        assert_eq!(changed, 1);
        assert_eq!(merged["A"].price, dec!(11));
        assert_eq!(merged["B"].price, dec!(20));
    }

    #[test]
    fn test_merge_discards_older_quotes() {
        let current = map(vec![quote("A", dec!(10), 5)]);
        let fresh = map(vec![quote("A", dec!(9), 4)]);

        let (merged, changed) = merge_quotes(&current, fresh);

        assert_eq!(changed, 0);
        assert_eq!(merged["A"].price, dec!(10));
        assert_eq!(merged["A"].updated_at, at(5));
    }

    #[test]
    fn test_merge_same_timestamp_new_value_wins() {
        let current = map(vec![quote("A", dec!(10), 5)]);
        let fresh = map(vec![quote("A", dec!(12), 5)]);

        let (merged, changed) = merge_quotes(&current, fresh);
        assert_eq!(changed, 1);
        assert_eq!(merged["A"].price, dec!(12));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let current = map(vec![quote("A", dec!(10), 0)]);
        let fresh = map(vec![quote("A", dec!(11), 1), quote("C", dec!(30), 1)]);

        let (once, _) = merge_quotes(&current, fresh.clone());
        let (twice, changed) = merge_quotes(&once, fresh);

        assert_eq!(once, twice);
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn test_cache_notifies_only_on_change() {
        let cache = QuoteCache::new();
        let mut rx = cache.subscribe();
        rx.borrow_and_update();

        assert_eq!(cache.merge(map(vec![quote("A", dec!(10), 0)])), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        // Re-applying the same data is a no-op for observers
        assert_eq!(cache.merge(map(vec![quote("A", dec!(10), 0)])), 0);
        assert!(!rx.has_changed().unwrap());

        assert_eq!(cache.merge(QuoteMap::new()), 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_after_later_merges() {
        let cache = QuoteCache::new();
        cache.merge(map(vec![quote("A", dec!(10), 0)]));
        let before = cache.snapshot();

        cache.merge(map(vec![quote("A", dec!(11), 1)]));

        assert_eq!(before["A"].price, dec!(10));
        assert_eq!(cache.get("A").unwrap().price, dec!(11));
        assert_eq!(cache.len(), 1);
    }
}
