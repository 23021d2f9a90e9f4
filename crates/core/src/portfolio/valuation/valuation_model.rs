use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stockfolio_market_data::PriceLimit;

/// Valuation of a single instrument after replaying its ledger against the
/// latest quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,

    // --- Replayed from the ledger ---
    pub shares: Decimal,
    /// Cost basis still attached to the open shares
    pub total_cost: Decimal,
    pub dividend_income: Decimal,
    /// Cost basis removed by sells over the position's lifetime
    pub realized_cost: Decimal,
    pub buy_shares_total: Decimal,
    pub buy_cost_total: Decimal,

    // --- Derived ---
    pub average_cost: Decimal,
    pub buy_average: Decimal,

    // --- Market ---
    /// Zero when no quote is available
    pub current_price: Decimal,
    pub daily_change: Decimal,
    pub change_percent: Decimal,
    pub price_limit: PriceLimit,
    pub has_quote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_updated_at: Option<DateTime<Utc>>,

    pub market_value: Decimal,
    pub total_pl: Decimal,
    pub total_pl_percent: Decimal,
    pub daily_pl: Decimal,

    // --- Data quality ---
    /// Sells that found no shares to sell and were ignored
    pub oversold_sells: u32,
    /// Events skipped for any other reason (bad split ratio, foreign code)
    pub ignored_events: u32,
}

impl PositionState {
    /// Whether the position belongs in the visible holdings list.
    pub fn is_held(&self) -> bool {
        self.shares > Decimal::ZERO
    }
}

/// Portfolio-wide totals. Profit, value and daily figures cover held
/// positions only; dividend income covers every position, including ones
/// that have been sold out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_pl: Decimal,
    pub total_pl_percent: Decimal,
    pub market_value: Decimal,
    /// Sum of average cost times shares over held positions
    pub cost_basis: Decimal,
    pub dividend_income: Decimal,
    pub daily_pl: Decimal,
    pub holding_count: usize,
}

/// Every position in the ledger plus the summary over them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioValuation {
    pub positions: Vec<PositionState>,
    pub summary: PortfolioSummary,
}

impl PortfolioValuation {
    /// Positions with shares above zero, in code order.
    pub fn holdings(&self) -> Vec<PositionState> {
        visible_holdings(&self.positions)
    }

    /// Codes of held positions that have no quote yet.
    pub fn missing_quotes(&self) -> Vec<String> {
        self.positions
            .iter()
            .filter(|p| p.is_held() && !p.has_quote)
            .map(|p| p.code.clone())
            .collect()
    }
}

/// Filters positions down to the ones that should be displayed.
pub fn visible_holdings(positions: &[PositionState]) -> Vec<PositionState> {
    positions.iter().filter(|p| p.is_held()).cloned().collect()
}
