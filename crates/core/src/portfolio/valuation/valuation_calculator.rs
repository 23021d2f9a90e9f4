//! Average-cost valuation engine.
//!
//! Replays a ledger left to right into position state and overlays a quote.
//! Every function here is pure: the same events and quote always produce the
//! same output, with no clock or I/O involved.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use stockfolio_market_data::{PriceLimit, Quote, QuoteMap};

use super::valuation_model::{PortfolioSummary, PortfolioValuation, PositionState};
use crate::instruments::Instrument;
use crate::transactions::{TransactionEvent, TransactionKind};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Running totals of the fold.
#[derive(Debug, Default)]
struct Ledger {
    shares: Decimal,
    total_cost: Decimal,
    dividend_income: Decimal,
    realized_cost: Decimal,
    buy_shares_total: Decimal,
    buy_cost_total: Decimal,
    oversold_sells: u32,
    ignored_events: u32,
}

impl Ledger {
    fn apply(&mut self, kind: &TransactionKind) {
        match kind {
            TransactionKind::Buy {
                price, shares, fee, ..
            } => {
                let cost = *price * *shares + *fee;
                self.shares += *shares;
                self.total_cost += cost;
                self.buy_shares_total += *shares;
                self.buy_cost_total += cost;
            }
            TransactionKind::Sell { shares: qty, .. } => self.sell(*qty),
            TransactionKind::CashDividend { amount, .. } => {
                self.dividend_income += *amount;
            }
            TransactionKind::StockDividend { shares, .. } => {
                self.shares += *shares;
            }
            TransactionKind::Split { ratio } => {
                if *ratio > Decimal::ZERO {
                    self.shares *= *ratio;
                } else {
                    self.ignored_events += 1;
                }
            }
            TransactionKind::CapitalReduction {
                shares_cancelled,
                cash_returned,
            } => {
                self.shares = (self.shares - *shares_cancelled).max(Decimal::ZERO);
                self.total_cost = (self.total_cost - *cash_returned).max(Decimal::ZERO);
            }
        }
    }

    /// Average-cost sell. Cost basis leaves in proportion to the shares sold.
    /// Selling with nothing held is a no-op; selling more than held empties
    /// the position. Both are counted as oversold.
    fn sell(&mut self, qty: Decimal) {
        if self.shares <= Decimal::ZERO {
            self.oversold_sells += 1;
            return;
        }

        let removed = if qty >= self.shares {
            self.total_cost
        } else {
            // Same as qty * (total_cost / shares) without the intermediate rounding
            self.total_cost * qty / self.shares
        };
        self.total_cost = (self.total_cost - removed).max(Decimal::ZERO);
        self.realized_cost += removed;

        if qty > self.shares {
            self.oversold_sells += 1;
        }
        self.shares = (self.shares - qty).max(Decimal::ZERO);
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator > Decimal::ZERO {
        numerator / denominator
    } else {
        Decimal::ZERO
    }
}

/// Replays `events` for `instrument` and values the result at `quote`.
///
/// Events are replayed in (trade date, recorded at, id) order regardless of
/// the order given. Events for other codes are ignored and counted.
pub fn compute_position(
    instrument: &Instrument,
    events: &[TransactionEvent],
    quote: Option<&Quote>,
) -> PositionState {
    fold_position(instrument, events.iter().collect(), quote)
}

fn fold_position(
    instrument: &Instrument,
    mut events: Vec<&TransactionEvent>,
    quote: Option<&Quote>,
) -> PositionState {
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut ledger = Ledger::default();
    for event in events {
        if event.code != instrument.code {
            ledger.ignored_events += 1;
            continue;
        }
        ledger.apply(&event.kind);
    }
    ledger.shares = ledger.shares.max(Decimal::ZERO);

    let (current_price, daily_change, change_percent, price_limit) = match quote {
        Some(q) => (q.price, q.change, q.change_percent, q.limit),
        None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, PriceLimit::None),
    };

    let market_value = ledger.shares * current_price;
    let total_pl = (market_value - ledger.total_cost) + ledger.dividend_income;

    PositionState {
        code: instrument.code.clone(),
        name: instrument.name.clone(),
        market: instrument.market.clone(),
        industry: instrument.industry.clone(),
        shares: ledger.shares,
        total_cost: ledger.total_cost,
        dividend_income: ledger.dividend_income,
        realized_cost: ledger.realized_cost,
        buy_shares_total: ledger.buy_shares_total,
        buy_cost_total: ledger.buy_cost_total,
        average_cost: ratio(ledger.total_cost, ledger.shares),
        buy_average: ratio(ledger.buy_cost_total, ledger.buy_shares_total),
        current_price,
        daily_change,
        change_percent,
        price_limit,
        has_quote: quote.is_some(),
        quote_updated_at: quote.map(|q| q.updated_at),
        market_value,
        total_pl,
        total_pl_percent: ratio(total_pl, ledger.total_cost) * HUNDRED,
        daily_pl: daily_change * ledger.shares,
        oversold_sells: ledger.oversold_sells,
        ignored_events: ledger.ignored_events,
    }
}

/// Aggregates positions into portfolio totals.
pub fn compute_summary(positions: &[PositionState]) -> PortfolioSummary {
    let mut summary = PortfolioSummary::default();

    for position in positions {
        summary.dividend_income += position.dividend_income;
        if !position.is_held() {
            continue;
        }
        summary.total_pl += position.total_pl;
        summary.market_value += position.market_value;
        summary.daily_pl += position.daily_pl;
        summary.cost_basis += position.average_cost * position.shares;
        summary.holding_count += 1;
    }

    summary.total_pl_percent = ratio(summary.total_pl, summary.cost_basis) * HUNDRED;
    summary
}

/// Values the whole ledger: one position per instrument, in code order.
///
/// Instruments without events still get a (zero) position; events whose code
/// has no instrument get one named after the code.
pub fn compute_portfolio(
    instruments: &[Instrument],
    events: &[TransactionEvent],
    quotes: &QuoteMap,
) -> PortfolioValuation {
    let mut by_code: BTreeMap<&str, (Instrument, Vec<&TransactionEvent>)> = instruments
        .iter()
        .map(|i| (i.code.as_str(), (i.clone(), Vec::new())))
        .collect();

    for event in events {
        by_code
            .entry(event.code.as_str())
            .or_insert_with(|| (Instrument::new(&event.code, event.code.clone()), Vec::new()))
            .1
            .push(event);
    }

    let positions: Vec<PositionState> = by_code
        .into_values()
        .map(|(instrument, events)| {
            let quote = quotes.get(&instrument.code);
            fold_position(&instrument, events, quote)
        })
        .collect();

    let summary = compute_summary(&positions);
    PortfolioValuation { positions, summary }
}
