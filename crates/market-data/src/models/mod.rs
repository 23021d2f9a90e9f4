//! Market data models
//!
//! - `types` - Type aliases for instrument codes and quote maps
//! - `quote` - The live [`Quote`] and its [`PriceLimit`] indicator

mod quote;
mod types;

pub use quote::{PriceLimit, Quote};
pub use types::{InstrumentCode, QuoteMap};
