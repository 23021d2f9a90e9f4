//! Ledger repository trait.
//!
//! The ledger is the source of truth for instruments and their transactions.
//! Reads are synchronous snapshots; mutations are async so that implementations
//! backed by a database or a file can do their I/O without blocking.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::transactions_model::{
    LedgerEvent, LedgerImportSummary, NewTransaction, TransactionEvent, TransactionUpdate,
};
use crate::errors::Result;
use crate::instruments::Instrument;

/// Trait defining the contract for ledger storage.
///
/// Every committed mutation is followed by exactly one [`LedgerEvent`] on the
/// channel returned from [`subscribe`](LedgerRepositoryTrait::subscribe).
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// Instruments registered in the ledger, ordered by code.
    fn list_held_instruments(&self) -> Result<Vec<Instrument>>;

    fn get_instrument(&self, code: &str) -> Result<Option<Instrument>>;

    /// Transactions for one instrument in replay order.
    fn list_transactions(&self, code: &str) -> Result<Vec<TransactionEvent>>;

    /// All transactions in replay order.
    fn list_all_transactions(&self) -> Result<Vec<TransactionEvent>>;

    /// Registers an instrument or replaces the attributes of an existing one.
    async fn upsert_instrument(&self, instrument: Instrument) -> Result<Instrument>;

    /// Records a transaction. The instrument must already be registered.
    async fn insert_transaction(&self, new_transaction: NewTransaction) -> Result<TransactionEvent>;

    async fn update_transaction(&self, update: TransactionUpdate) -> Result<TransactionEvent>;

    /// Deletes a transaction and returns the removed record.
    async fn delete_transaction(&self, transaction_id: &str) -> Result<TransactionEvent>;

    /// Bulk-loads instruments and fully formed events, preserving their ids
    /// and timestamps. Events whose id already exists are skipped.
    async fn import(
        &self,
        instruments: Vec<Instrument>,
        events: Vec<TransactionEvent>,
    ) -> Result<LedgerImportSummary>;

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;
}
