//! Bounded-concurrency batch fetching.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::capabilities::FetchPolicy;
use super::traits::QuoteFetcher;
use crate::models::{InstrumentCode, QuoteMap};

/// Fetch every code through `fetcher`, at most `policy.max_concurrency` at a
/// time, each request bounded by `policy.request_timeout`.
///
/// Failed and timed-out codes are logged and omitted. Duplicate codes are
/// fetched once.
pub async fn fetch_concurrently<F>(fetcher: &F, codes: &[InstrumentCode], policy: &FetchPolicy) -> QuoteMap
where
    F: QuoteFetcher + ?Sized,
{
    let unique: BTreeSet<InstrumentCode> = codes.iter().cloned().collect();
    if unique.is_empty() {
        return QuoteMap::new();
    }

    let timeout = policy.request_timeout;
    let requests: Vec<_> = unique
        .into_iter()
        .map(|code| async move {
            let outcome = tokio::time::timeout(timeout, fetcher.fetch_quote(&code)).await;
            (code, outcome)
        })
        .collect();
    let outcomes: Vec<_> = stream::iter(requests)
        .buffer_unordered(policy.max_concurrency.max(1))
        .collect()
        .await;

    let mut quotes = QuoteMap::with_capacity(outcomes.len());
    for (code, outcome) in outcomes {
        match outcome {
            Ok(Ok(quote)) => {
                quotes.insert(code, quote);
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!("{}: quote for {} dropped, retrying next cycle: {}", fetcher.id(), code, e);
            }
            Ok(Err(e)) => {
                warn!("{}: quote for {} dropped: {}", fetcher.id(), code, e);
            }
            Err(_) => {
                warn!(
                    "{}: quote for {} timed out after {:?}",
                    fetcher.id(),
                    code,
                    timeout
                );
            }
        }
    }

    debug!(
        "{}: fetched {}/{} quotes",
        fetcher.id(),
        quotes.len(),
        codes.len()
    );
    quotes
}
