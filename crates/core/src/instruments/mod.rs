//! Instruments module - the securities a ledger refers to.

mod instruments_model;

pub use instruments_model::{normalize_code, Instrument};
