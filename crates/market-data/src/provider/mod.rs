//! Quote source abstractions and implementations.
//!
//! This module contains:
//! - The `QuoteSource` trait the refresh scheduler polls
//! - The `QuoteFetcher` trait for providers that answer one code at a time
//! - `fetch_concurrently`, which turns a `QuoteFetcher` into a batched,
//!   timeout-bounded, partial-failure-tolerant fetch
//! - Concrete providers (TWSE, Yahoo)
//!
//! # Failure model
//!
//! A batch fetch never fails as a whole. Codes that cannot be resolved,
//! time out, or return unparseable data are omitted from the result map and
//! logged; the caller keeps whatever it had cached for them.

mod batch;
mod capabilities;
mod traits;

pub mod twse;
pub mod yahoo;

pub use batch::fetch_concurrently;
pub use capabilities::FetchPolicy;
pub use traits::{QuoteFetcher, QuoteSource};
