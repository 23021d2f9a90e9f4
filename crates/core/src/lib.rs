//! Stockfolio Core - Domain entities, services, and traits.
//!
//! This crate contains the business logic for Stockfolio:
//!
//! - [`transactions`] - the ledger model, repository trait and CSV interchange
//! - [`portfolio`] - the pure valuation engine and the reactive portfolio view
//! - [`quotes`] - the live quote cache, its snapshot persistence and the
//!   session-aware refresh scheduler
//! - [`settings`] - runtime-adjustable refresh settings
//!
//! It is storage-agnostic: the ledger and the quote snapshot are reached
//! through traits, with in-memory and file-backed implementations provided.

pub mod constants;
pub mod errors;
pub mod instruments;
pub mod portfolio;
pub mod quotes;
pub mod settings;
pub mod transactions;

pub use instruments::Instrument;
pub use portfolio::*;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
