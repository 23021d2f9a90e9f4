use std::collections::HashMap;

use super::quote::Quote;

/// Instrument code as used by the ledger and the quote sources (e.g. "2330", "AAPL")
pub type InstrumentCode = String;

/// Latest quote per instrument code
pub type QuoteMap = HashMap<InstrumentCode, Quote>;
