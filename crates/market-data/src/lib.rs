//! Stockfolio Market Data Crate
//!
//! This crate provides provider-agnostic live quote fetching for the
//! Stockfolio portfolio tracker.
//!
//! # Overview
//!
//! The market data crate supports:
//! - A polymorphic [`QuoteSource`] contract: "is the market open?" and
//!   "what are the latest prices for these codes?"
//! - Trading-session detection per market ([`TradingSession`])
//! - Batched, partial-failure-tolerant fetching with per-request timeouts
//! - Price-limit detection ([`PriceLimit`]) when the source publishes bounds
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! | RefreshScheduler |  (stockfolio-core)
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! |   QuoteSource    | --> | TradingSession   |  (is_session_open)
//! +------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! |  QuoteFetcher    |  (per-code fetch, bounded concurrency + timeout)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |     Quote        |  (price, change, limit state)
//! +------------------+
//! ```
//!
//! # Providers
//!
//! - [`TwseProvider`] - Taiwan Stock Exchange MIS endpoint (batched, limit bounds)
//! - [`YahooProvider`] - Yahoo Finance chart endpoint (per code)

pub mod errors;
pub mod models;
pub mod provider;
pub mod session;

pub use errors::MarketDataError;
pub use models::{InstrumentCode, PriceLimit, Quote, QuoteMap};
pub use session::TradingSession;

pub use provider::twse::TwseProvider;
pub use provider::yahoo::YahooProvider;
pub use provider::{fetch_concurrently, FetchPolicy, QuoteFetcher, QuoteSource};
