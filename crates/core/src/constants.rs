/// Seconds between quote refresh cycles while the market session is open
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;

/// Successful refresh cycles between two snapshot writes during an open session
pub const DEFAULT_PERSIST_BATCH_SIZE: u32 = 10;

/// Buffered ledger notifications per subscriber before it starts lagging
pub const LEDGER_EVENT_CAPACITY: usize = 64;

/// Source tag for transactions entered by hand
pub const SOURCE_MANUAL: &str = "MANUAL";

/// Source tag for transactions loaded from a CSV file
pub const SOURCE_IMPORT: &str = "IMPORT";
