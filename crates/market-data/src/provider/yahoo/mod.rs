//! Yahoo Finance market data provider.
//!
//! Fetches one symbol per request from the v8 chart endpoint and fans out
//! through [`fetch_concurrently`]. Yahoo does not publish price-limit bounds,
//! so quotes from this provider always carry `PriceLimit::None`.

mod models;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header;
use rust_decimal::Decimal;
use tracing::debug;
use urlencoding::encode;

use crate::errors::MarketDataError;
use crate::models::{InstrumentCode, Quote, QuoteMap};
use crate::provider::{fetch_concurrently, FetchPolicy, QuoteFetcher, QuoteSource};
use crate::session::TradingSession;

use models::{YahooChartMeta, YahooChartResponse};

const PROVIDER_ID: &str = "YAHOO";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Yahoo Finance quote provider.
pub struct YahooProvider {
    client: reqwest::Client,
    session: TradingSession,
    policy: FetchPolicy,
    /// Appended to ledger codes to form Yahoo symbols (e.g. ".TW" for "2330")
    symbol_suffix: String,
}

impl YahooProvider {
    /// Create a provider for US regular trading hours.
    pub fn new(policy: FetchPolicy) -> Result<Self, MarketDataError> {
        Self::with_session(TradingSession::nyse(), policy)
    }

    pub fn with_session(session: TradingSession, policy: FetchPolicy) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            session,
            policy,
            symbol_suffix: String::new(),
        })
    }

    /// Map ledger codes to Yahoo symbols by appending `suffix`.
    pub fn with_symbol_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.symbol_suffix = suffix.into();
        self
    }

    fn symbol_for(&self, code: &str) -> String {
        if self.symbol_suffix.is_empty() || code.ends_with(&self.symbol_suffix) {
            code.to_string()
        } else {
            format!("{}{}", code, self.symbol_suffix)
        }
    }
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value
        .and_then(Decimal::from_f64_retain)
        .map(|d| d.round_dp(4).normalize())
}

/// Convert chart metadata into a quote keyed by the ledger `code`.
fn meta_to_quote(code: &str, meta: YahooChartMeta, fetched_at: DateTime<Utc>) -> Result<Quote, MarketDataError> {
    let price = to_decimal(meta.regular_market_price).ok_or_else(|| {
        MarketDataError::ValidationFailed {
            message: format!("No regular market price for {}", code),
        }
    })?;

    let updated_at = meta
        .regular_market_time
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(fetched_at);

    let previous_close = to_decimal(meta.chart_previous_close.or(meta.previous_close));
    let name = meta.short_name.or(meta.long_name);

    let quote = match previous_close {
        Some(prev) => Quote::with_previous_close(code, price, prev, updated_at, PROVIDER_ID),
        None => Quote::new(code, price, updated_at, PROVIDER_ID),
    };
    Ok(quote.with_name(name))
}

#[async_trait]
impl QuoteFetcher for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_quote(&self, code: &str) -> Result<Quote, MarketDataError> {
        let symbol = self.symbol_for(code);
        let url = format!("{}/{}?interval=1d&range=1d", CHART_URL, encode(&symbol));

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MarketDataError::Timeout {
                        provider: PROVIDER_ID.to_string(),
                    }
                } else {
                    MarketDataError::Network(e)
                }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::SymbolNotFound(symbol));
        }
        if !response.status().is_success() {
            return Err(MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} for {}", response.status(), symbol),
            });
        }

        let data: YahooChartResponse = response.json().await.map_err(|e| {
            MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse chart response: {}", e),
            }
        })?;

        if let Some(err) = data.chart.error {
            debug!(
                "Yahoo chart error for {}: {:?} {:?}",
                symbol, err.code, err.description
            );
            return Err(MarketDataError::SymbolNotFound(symbol));
        }

        let meta = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .map(|r| r.meta)
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.clone()))?;

        meta_to_quote(code, meta, Utc::now())
    }
}

#[async_trait]
impl QuoteSource for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn is_session_open(&self) -> bool {
        self.session.is_open()
    }

    async fn fetch_quotes(&self, codes: &[InstrumentCode]) -> QuoteMap {
        fetch_concurrently(self, codes, &self.policy).await
    }
}
