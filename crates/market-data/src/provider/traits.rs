//! Quote source trait definitions.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{InstrumentCode, Quote, QuoteMap};

/// A market-data provider the refresh scheduler can poll.
///
/// Implementations differ in transport and parsing only. The contract:
///
/// - `is_session_open` is a pure function of the wall clock against the
///   market's trading hours.
/// - `fetch_quotes` is batched and partial-failure tolerant: codes that fail
///   to resolve are omitted from the result, never reported as an overall
///   error. Each network request carries its own timeout.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use stockfolio_market_data::{QuoteMap, QuoteSource, TradingSession};
///
/// struct FixedSource {
///     session: TradingSession,
///     quotes: QuoteMap,
/// }
///
/// #[async_trait]
/// impl QuoteSource for FixedSource {
///     fn id(&self) -> &'static str {
///         "FIXED"
///     }
///
///     fn is_session_open(&self) -> bool {
///         self.session.is_open()
///     }
///
///     async fn fetch_quotes(&self, codes: &[String]) -> QuoteMap {
///         codes
///             .iter()
///             .filter_map(|c| self.quotes.get(c).map(|q| (c.clone(), q.clone())))
///             .collect()
///     }
/// }
/// ```
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Unique identifier for this source, used in logs and `Quote::source`.
    fn id(&self) -> &'static str;

    /// Whether the source's market is currently in its trading session.
    fn is_session_open(&self) -> bool;

    /// Fetch the latest quote for each code.
    ///
    /// The returned map contains only the codes that resolved successfully.
    async fn fetch_quotes(&self, codes: &[InstrumentCode]) -> QuoteMap;
}

/// A provider that answers one code per request.
///
/// Pair with [`fetch_concurrently`](super::fetch_concurrently) to implement
/// [`QuoteSource::fetch_quotes`].
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// Provider identifier used in logs.
    fn id(&self) -> &'static str;

    /// Fetch the latest quote for a single code.
    async fn fetch_quote(&self, code: &str) -> Result<Quote, MarketDataError>;
}
