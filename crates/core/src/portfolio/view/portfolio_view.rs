//! Read model joining the ledger with the live quote cache.
//!
//! Every snapshot is recomputed from scratch through the valuation engine;
//! nothing is updated incrementally. Callers can pull a snapshot on demand
//! or spawn a publisher that pushes a new one whenever the ledger or the
//! quote cache changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::Result;
use crate::portfolio::valuation::{
    compute_portfolio, compute_position, PortfolioSummary, PortfolioValuation, PositionState,
};
use crate::quotes::QuoteCache;
use crate::transactions::LedgerRepositoryTrait;

/// What the holdings screen shows: held positions and the totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub holdings: Vec<PositionState>,
    pub summary: PortfolioSummary,
    /// Held codes that have no quote yet
    pub missing_quotes: Vec<String>,
    /// Most recent quote time among the holdings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotes_as_of: Option<DateTime<Utc>>,
}

impl From<PortfolioValuation> for PortfolioSnapshot {
    fn from(valuation: PortfolioValuation) -> Self {
        let missing_quotes = valuation.missing_quotes();
        let holdings = valuation.holdings();
        let quotes_as_of = holdings.iter().filter_map(|p| p.quote_updated_at).max();
        Self {
            holdings,
            summary: valuation.summary,
            missing_quotes,
            quotes_as_of,
        }
    }
}

/// Pushed snapshots plus the task producing them. Dropping every receiver
/// stops the task.
pub struct PortfolioFeed {
    pub receiver: watch::Receiver<Arc<PortfolioSnapshot>>,
    pub task: JoinHandle<()>,
}

pub struct PortfolioView {
    ledger: Arc<dyn LedgerRepositoryTrait>,
    cache: QuoteCache,
    /// Oversold counts already logged, so each anomaly is reported once
    reported_oversold: Mutex<HashMap<String, u32>>,
}

impl PortfolioView {
    pub fn new(ledger: Arc<dyn LedgerRepositoryTrait>, cache: QuoteCache) -> Self {
        Self {
            ledger,
            cache,
            reported_oversold: Mutex::new(HashMap::new()),
        }
    }

    /// Values every instrument in the ledger, held or not.
    pub fn valuation(&self) -> Result<PortfolioValuation> {
        let instruments = self.ledger.list_held_instruments()?;
        let events = self.ledger.list_all_transactions()?;
        let quotes = self.cache.snapshot();

        let valuation = compute_portfolio(&instruments, &events, &quotes);
        self.report_data_quality(&valuation.positions);
        Ok(valuation)
    }

    pub fn snapshot(&self) -> Result<PortfolioSnapshot> {
        Ok(self.valuation()?.into())
    }

    /// One position, including sold-out ones. `None` for an unknown code.
    pub fn position(&self, code: &str) -> Result<Option<PositionState>> {
        let Some(instrument) = self.ledger.get_instrument(code)? else {
            return Ok(None);
        };
        let events = self.ledger.list_transactions(&instrument.code)?;
        let quote = self.cache.get(&instrument.code);
        let position = compute_position(&instrument, &events, quote.as_ref());
        self.report_data_quality(std::slice::from_ref(&position));
        Ok(Some(position))
    }

    fn report_data_quality(&self, positions: &[PositionState]) {
        let mut reported = self
            .reported_oversold
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for position in positions {
            if position.oversold_sells == 0 {
                reported.remove(&position.code);
                continue;
            }
            if reported.get(&position.code) != Some(&position.oversold_sells) {
                warn!(
                    "{}: {} sell(s) exceed the shares held at the time; check the ledger",
                    position.code, position.oversold_sells
                );
                reported.insert(position.code.clone(), position.oversold_sells);
            }
            if position.ignored_events > 0 {
                debug!("{}: {} event(s) ignored", position.code, position.ignored_events);
            }
        }
    }

    fn snapshot_or_default(&self) -> PortfolioSnapshot {
        self.snapshot().unwrap_or_else(|e| {
            warn!("Failed to compute portfolio snapshot: {}", e);
            PortfolioSnapshot::default()
        })
    }

    /// Spawns a task that republishes the snapshot after every ledger change
    /// and every quote cache update.
    pub fn spawn_publisher(self: &Arc<Self>) -> PortfolioFeed {
        let mut ledger_rx = self.ledger.subscribe();
        let mut quotes_rx = self.cache.subscribe();

        let (tx, receiver) = watch::channel(Arc::new(self.snapshot_or_default()));
        let view = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Portfolio feed has no subscribers left");
                        break;
                    }
                    event = ledger_rx.recv() => match event {
                        Ok(event) => debug!("Ledger changed: {:?}", event),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Portfolio feed lagged {} ledger events", skipped)
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = quotes_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                match view.snapshot() {
                    Ok(snapshot) => {
                        tx.send_replace(Arc::new(snapshot));
                    }
                    Err(e) => warn!("Failed to recompute portfolio snapshot: {}", e),
                }
            }
        });

        PortfolioFeed { receiver, task }
    }
}
