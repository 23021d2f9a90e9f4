//! Taiwan Stock Exchange market data provider.
//!
//! Uses the MIS real-time endpoint, which accepts many instruments per
//! request and publishes the daily price-limit bounds, so limit-up/limit-down
//! detection is available for every quote.

mod models;

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use reqwest::header;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{InstrumentCode, Quote, QuoteMap};
use crate::provider::{FetchPolicy, QuoteSource};
use crate::session::TradingSession;

use models::{MisEntry, MisResponse};

const PROVIDER_ID: &str = "TWSE";
const MIS_URL: &str = "https://mis.twse.com.tw/stock/api/getStockInfo.jsp";

/// Instruments per MIS request; longer channel lists get rejected.
const CODES_PER_REQUEST: usize = 20;

/// TWSE/TPEx real-time quote provider.
pub struct TwseProvider {
    client: reqwest::Client,
    session: TradingSession,
    policy: FetchPolicy,
}

impl TwseProvider {
    /// Create a provider for the regular TWSE session.
    pub fn new(policy: FetchPolicy) -> Result<Self, MarketDataError> {
        Self::with_session(TradingSession::twse(), policy)
    }

    pub fn with_session(session: TradingSession, policy: FetchPolicy) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()?;
        Ok(Self {
            client,
            session,
            policy,
        })
    }

    /// Build the `ex_ch` channel list. Each code is queried on both the
    /// listed (tse) and OTC (otc) boards; MIS only answers the one that exists.
    fn channel_list<S: AsRef<str>>(codes: &[S]) -> String {
        codes
            .iter()
            .map(AsRef::as_ref)
            .flat_map(|code| [format!("tse_{}.tw", code), format!("otc_{}.tw", code)])
            .collect::<Vec<_>>()
            .join("|")
    }

    async fn fetch_chunk(&self, codes: &[InstrumentCode]) -> Result<Vec<MisEntry>, MarketDataError> {
        let channels = Self::channel_list(codes);
        let request = self
            .client
            .get(MIS_URL)
            .query(&[("ex_ch", channels.as_str()), ("json", "1"), ("delay", "0")])
            .header(header::ACCEPT, "application/json")
            .send();

        let response = tokio::time::timeout(self.policy.request_timeout, request)
            .await
            .map_err(|_| MarketDataError::Timeout {
                provider: PROVIDER_ID.to_string(),
            })??;

        if !response.status().is_success() {
            return Err(MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let body: MisResponse = response.json().await.map_err(|e| {
            MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse MIS response: {}", e),
            }
        })?;

        if let Some(code) = body.rtcode.as_deref() {
            if code != "0000" {
                warn!(
                    "TWSE MIS returned rtcode {} ({})",
                    code,
                    body.rtmessage.as_deref().unwrap_or("")
                );
            }
        }

        Ok(body.msg_array)
    }
}

/// Parse an MIS decimal field, treating "-" and blanks as absent.
fn parse_price(raw: Option<&str>) -> Option<Decimal> {
    let raw = raw?.trim();
    if raw.is_empty() || raw == "-" {
        return None;
    }
    Decimal::from_str(raw).ok().map(|d| d.normalize())
}

/// Convert one MIS entry into a quote.
///
/// When no trade has printed yet the best bid stands in for the price, then
/// the previous close, so the quote still carries a usable reference.
fn entry_to_quote(entry: &MisEntry, fetched_at: DateTime<Utc>) -> Result<Quote, MarketDataError> {
    let code = entry
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| MarketDataError::ValidationFailed {
            message: "MIS entry without code".to_string(),
        })?;

    let previous_close = parse_price(entry.previous_close.as_deref());
    let best_bid = entry
        .bids
        .as_deref()
        .and_then(|b| b.split('_').find(|s| !s.trim().is_empty()))
        .and_then(|b| parse_price(Some(b)));

    let price = parse_price(entry.last.as_deref())
        .or(best_bid)
        .or(previous_close)
        .ok_or_else(|| MarketDataError::ValidationFailed {
            message: format!("No usable price for {}", code),
        })?;

    let updated_at = entry
        .time_millis
        .as_deref()
        .and_then(|t| t.trim().parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(fetched_at);

    let quote = match previous_close {
        Some(prev) => Quote::with_previous_close(code, price, prev, updated_at, PROVIDER_ID),
        None => Quote::new(code, price, updated_at, PROVIDER_ID),
    };

    Ok(quote
        .with_name(entry.name.clone())
        .with_limits(
            parse_price(entry.upper_limit.as_deref()),
            parse_price(entry.lower_limit.as_deref()),
        ))
}

#[async_trait]
impl QuoteSource for TwseProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn is_session_open(&self) -> bool {
        self.session.is_open()
    }

    async fn fetch_quotes(&self, codes: &[InstrumentCode]) -> QuoteMap {
        let requested: HashSet<&str> = codes.iter().map(String::as_str).collect();
        if requested.is_empty() {
            return QuoteMap::new();
        }

        let ordered: Vec<InstrumentCode> = requested.iter().map(|c| c.to_string()).collect();
        let requests: Vec<_> = ordered
            .chunks(CODES_PER_REQUEST)
            .map(<[InstrumentCode]>::to_vec)
            .map(|chunk| async move {
                let outcome = self.fetch_chunk(&chunk).await;
                (chunk, outcome)
            })
            .collect();

        let outcomes: Vec<_> = stream::iter(requests)
            .buffer_unordered(self.policy.max_concurrency.max(1))
            .collect()
            .await;

        let fetched_at = Utc::now();
        let mut quotes = QuoteMap::with_capacity(requested.len());
        for (chunk, outcome) in outcomes {
            let entries = match outcome {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("TWSE: dropped {} codes: {}", chunk.len(), e);
                    continue;
                }
            };
            for entry in entries {
                match entry_to_quote(&entry, fetched_at) {
                    Ok(quote) if requested.contains(quote.code.as_str()) => {
                        quotes.insert(quote.code.clone(), quote);
                    }
                    Ok(quote) => debug!("TWSE: ignoring unrequested code {}", quote.code),
                    Err(e) => warn!("TWSE: skipped entry: {}", e),
                }
            }
        }

        debug!("TWSE: fetched {}/{} quotes", quotes.len(), requested.len());
        quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceLimit;
    use rust_decimal_macros::dec;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap()
    }

    fn parse_entries(json: &str) -> Vec<MisEntry> {
        serde_json::from_str::<MisResponse>(json).unwrap().msg_array
    }

    #[test]
    fn test_channel_list_covers_both_boards() {
        assert_eq!(
            TwseProvider::channel_list(&["2330", "6488"]),
            "tse_2330.tw|otc_2330.tw|tse_6488.tw|otc_6488.tw"
        );
    }

    #[test]
    fn test_entry_with_trade() {
        let entries = parse_entries(
            r#"{"msgArray":[{"c":"2330","n":"台積電","z":"585.0000","y":"580.0000",
                "u":"638.0000","w":"522.0000","b":"584.0000_583.0000_","tlong":"1709520000000","ex":"tse"}],
                "rtcode":"0000"}"#,
        );
        let quote = entry_to_quote(&entries[0], fetched_at()).unwrap();

        assert_eq!(quote.code, "2330");
        assert_eq!(quote.name.as_deref(), Some("台積電"));
        assert_eq!(quote.price, dec!(585));
        assert_eq!(quote.change, dec!(5));
        assert_eq!(quote.change_percent, dec!(0.86));
        assert_eq!(quote.limit, PriceLimit::None);
        assert_eq!(quote.updated_at.timestamp_millis(), 1_709_520_000_000);
        assert_eq!(quote.source, "TWSE");
    }

    #[test]
    fn test_entry_without_trade_uses_best_bid() {
        let entries = parse_entries(
            r#"{"msgArray":[{"c":"2330","z":"-","y":"580.0000","b":"579.0000_578.0000_"}]}"#,
        );
        let quote = entry_to_quote(&entries[0], fetched_at()).unwrap();

        assert_eq!(quote.price, dec!(579));
        assert_eq!(quote.change, dec!(-1));
        assert_eq!(quote.updated_at, fetched_at());
    }

    #[test]
    fn test_entry_without_trade_or_bid_uses_previous_close() {
        let entries = parse_entries(r#"{"msgArray":[{"c":"2330","z":"-","y":"580.0000","b":"-"}]}"#);
        let quote = entry_to_quote(&entries[0], fetched_at()).unwrap();

        assert_eq!(quote.price, dec!(580));
        assert_eq!(quote.change, Decimal::ZERO);
    }

    #[test]
    fn test_limit_up_detected() {
        let entries = parse_entries(
            r#"{"msgArray":[{"c":"1101","z":"49.5000","y":"45.0000","u":"49.5000","w":"40.5000"}]}"#,
        );
        let quote = entry_to_quote(&entries[0], fetched_at()).unwrap();
        assert_eq!(quote.limit, PriceLimit::LimitUp);
    }

    #[test]
    fn test_entry_without_any_price_is_rejected() {
        let entries = parse_entries(r#"{"msgArray":[{"c":"2330","z":"-","y":"-"}]}"#);
        assert!(entry_to_quote(&entries[0], fetched_at()).is_err());
    }

    #[test]
    fn test_entry_without_code_is_rejected() {
        let entries = parse_entries(r#"{"msgArray":[{"z":"10.0"}]}"#);
        assert!(entry_to_quote(&entries[0], fetched_at()).is_err());
    }

    #[test]
    fn test_empty_response_parses() {
        assert!(parse_entries(r#"{"rtcode":"0000"}"#).is_empty());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_fetch_quotes_future_is_send() {
        let provider = TwseProvider::new(FetchPolicy::default()).unwrap();
        let codes = vec!["2330".to_string(), "2317".to_string()];
        let fetch = provider.fetch_quotes(&codes);
        assert_send(&fetch);
    }
}
