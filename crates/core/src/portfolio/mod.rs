//! Portfolio module - valuation engine and the reactive portfolio view.

pub mod valuation;
pub mod view;

pub use valuation::{
    compute_portfolio, compute_position, compute_summary, visible_holdings, PortfolioSummary,
    PortfolioValuation, PositionState,
};
pub use view::{PortfolioFeed, PortfolioSnapshot, PortfolioView};
