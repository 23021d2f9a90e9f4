use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where the current price sits relative to the session's price limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLimit {
    LimitUp,
    LimitDown,
    #[default]
    None,
}

impl PriceLimit {
    /// Compares `price` against the session bounds.
    ///
    /// Returns [`PriceLimit::None`] when no bound is published or the price
    /// trades strictly inside them.
    pub fn detect(price: Decimal, upper: Option<Decimal>, lower: Option<Decimal>) -> Self {
        match (upper, lower) {
            (Some(up), _) if up > Decimal::ZERO && price >= up => PriceLimit::LimitUp,
            (_, Some(down)) if down > Decimal::ZERO && price <= down => PriceLimit::LimitDown,
            _ => PriceLimit::None,
        }
    }
}

/// Latest trade snapshot for one instrument
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Instrument code the quote belongs to
    pub code: String,

    /// Display name as reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Current (last trade) price
    pub price: Decimal,

    /// Absolute change versus the previous close
    pub change: Decimal,

    /// Percent change versus the previous close
    pub change_percent: Decimal,

    /// Reference price the change is computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<Decimal>,

    /// Session upper price limit, when the market publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_limit: Option<Decimal>,

    /// Session lower price limit, when the market publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_limit: Option<Decimal>,

    /// Limit state derived from `price` and the bounds
    #[serde(default)]
    pub limit: PriceLimit,

    /// Time of the trade (or of the fetch, when the provider has no timestamp)
    pub updated_at: DateTime<Utc>,

    /// Source of the quote (TWSE, YAHOO, ...)
    pub source: String,
}

impl Quote {
    /// Create a quote with no change information
    pub fn new(code: impl Into<String>, price: Decimal, updated_at: DateTime<Utc>, source: &str) -> Self {
        Self {
            code: code.into(),
            name: None,
            price,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            previous_close: None,
            upper_limit: None,
            lower_limit: None,
            limit: PriceLimit::None,
            updated_at,
            source: source.to_string(),
        }
    }

    /// Create a quote whose change is derived from the previous close
    pub fn with_previous_close(
        code: impl Into<String>,
        price: Decimal,
        previous_close: Decimal,
        updated_at: DateTime<Utc>,
        source: &str,
    ) -> Self {
        let change = price - previous_close;
        let change_percent = if previous_close > Decimal::ZERO {
            (change / previous_close * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Self {
            change,
            change_percent,
            previous_close: Some(previous_close),
            ..Self::new(code, price, updated_at, source)
        }
    }

    /// Attach session limit bounds and recompute the limit state
    pub fn with_limits(mut self, upper: Option<Decimal>, lower: Option<Decimal>) -> Self {
        self.upper_limit = upper;
        self.lower_limit = lower;
        self.limit = PriceLimit::detect(self.price, upper, lower);
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.trim().is_empty());
        self
    }
}
