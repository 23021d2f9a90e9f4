//! Transactions module - the ledger model, its repository contract and
//! CSV interchange.

mod transactions_csv;
mod transactions_model;
mod transactions_repository;
mod transactions_traits;


pub use transactions_csv::{export_csv, import_csv, CsvImport, SkippedRow, CSV_COLUMNS};
pub use transactions_model::{
    sort_events, EntrySource, LedgerEvent, LedgerImportSummary, NewTransaction, TransactionEvent,
    TransactionKind, TransactionUpdate,
};
pub use transactions_repository::InMemoryLedgerRepository;
pub use transactions_traits::LedgerRepositoryTrait;
