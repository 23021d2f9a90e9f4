//! Live quote management.
//!
//! - [`cache`] - the shared `code -> Quote` map and its merge rule
//! - [`store`] - snapshot persistence for cold starts
//! - [`scheduler`] - session-aware polling that feeds the cache
//!
//! # Architecture
//!
//! ```text
//! RefreshScheduler → QuoteSource (market-data crate)
//!       ↓       ↘
//!  QuoteCache    QuoteSnapshotStore
//!       ↓
//!  PortfolioView
//! ```
//!
//! The scheduler is the only writer of the cache. Everything else reads
//! snapshots or subscribes to changes.

pub mod cache;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod scheduler_tests;

pub use cache::{merge_quotes, QuoteCache, QuoteSnapshot};
pub use scheduler::RefreshScheduler;
pub use store::{InMemorySnapshotStore, JsonFileSnapshotStore, QuoteSnapshotStore};
