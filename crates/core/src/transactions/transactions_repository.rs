//! In-memory ledger repository.
//!
//! Holds the whole ledger behind a single lock. Used by the server (with a
//! CSV file as its durable form) and by tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use tokio::sync::broadcast;

use super::transactions_model::{
    sort_events, LedgerEvent, LedgerImportSummary, NewTransaction, TransactionEvent,
    TransactionUpdate,
};
use super::transactions_traits::LedgerRepositoryTrait;
use crate::constants::LEDGER_EVENT_CAPACITY;
use crate::errors::{LedgerError, Result};
use crate::instruments::{normalize_code, Instrument};

#[derive(Default)]
struct LedgerState {
    instruments: BTreeMap<String, Instrument>,
    events: HashMap<String, TransactionEvent>,
}

pub struct InMemoryLedgerRepository {
    state: RwLock<LedgerState>,
    events_tx: broadcast::Sender<LedgerEvent>,
}

impl Default for InMemoryLedgerRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(LEDGER_EVENT_CAPACITY);
        Self {
            state: RwLock::new(LedgerState::default()),
            events_tx,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>> {
        self.state
            .read()
            .map_err(|e| LedgerError::Unavailable(e.to_string()).into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|e| LedgerError::Unavailable(e.to_string()).into())
    }

    fn publish(&self, event: LedgerEvent) {
        // No receivers is not an error: nobody is watching yet.
        if self.events_tx.send(event).is_err() {
            debug!("Ledger event dropped: no subscribers");
        }
    }
}

#[async_trait]
impl LedgerRepositoryTrait for InMemoryLedgerRepository {
    fn list_held_instruments(&self) -> Result<Vec<Instrument>> {
        Ok(self.read()?.instruments.values().cloned().collect())
    }

    fn get_instrument(&self, code: &str) -> Result<Option<Instrument>> {
        Ok(self.read()?.instruments.get(&normalize_code(code)).cloned())
    }

    fn list_transactions(&self, code: &str) -> Result<Vec<TransactionEvent>> {
        let code = normalize_code(code);
        let mut events: Vec<TransactionEvent> = self
            .read()?
            .events
            .values()
            .filter(|e| e.code == code)
            .cloned()
            .collect();
        sort_events(&mut events);
        Ok(events)
    }

    fn list_all_transactions(&self) -> Result<Vec<TransactionEvent>> {
        let mut events: Vec<TransactionEvent> = self.read()?.events.values().cloned().collect();
        sort_events(&mut events);
        Ok(events)
    }

    async fn upsert_instrument(&self, instrument: Instrument) -> Result<Instrument> {
        let instrument = Instrument {
            code: normalize_code(&instrument.code),
            ..instrument
        };
        instrument.validate()?;
        {
            let mut state = self.write()?;
            state
                .instruments
                .insert(instrument.code.clone(), instrument.clone());
        }
        self.publish(LedgerEvent::InstrumentChanged {
            code: instrument.code.clone(),
        });
        Ok(instrument)
    }

    async fn insert_transaction(&self, new_transaction: NewTransaction) -> Result<TransactionEvent> {
        new_transaction.validate()?;
        let event = TransactionEvent::from_new(new_transaction, Utc::now());
        {
            let mut state = self.write()?;
            if !state.instruments.contains_key(&event.code) {
                return Err(LedgerError::UnknownInstrument(event.code).into());
            }
            state.events.insert(event.id.clone(), event.clone());
        }
        debug!("Recorded {} transaction {} for {}", event.kind.type_name(), event.id, event.code);
        self.publish(LedgerEvent::TransactionRecorded {
            code: event.code.clone(),
            id: event.id.clone(),
        });
        Ok(event)
    }

    async fn update_transaction(&self, update: TransactionUpdate) -> Result<TransactionEvent> {
        update.validate()?;
        let updated = {
            let mut state = self.write()?;
            let existing = state
                .events
                .get(&update.id)
                .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", update.id)))?;
            let updated = update.apply_to(existing, Utc::now());
            state.events.insert(updated.id.clone(), updated.clone());
            updated
        };
        self.publish(LedgerEvent::TransactionUpdated {
            code: updated.code.clone(),
            id: updated.id.clone(),
        });
        Ok(updated)
    }

    async fn delete_transaction(&self, transaction_id: &str) -> Result<TransactionEvent> {
        let removed = self
            .write()?
            .events
            .remove(transaction_id)
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", transaction_id)))?;
        self.publish(LedgerEvent::TransactionDeleted {
            code: removed.code.clone(),
            id: removed.id.clone(),
        });
        Ok(removed)
    }

    async fn import(
        &self,
        instruments: Vec<Instrument>,
        events: Vec<TransactionEvent>,
    ) -> Result<LedgerImportSummary> {
        let instruments: Vec<Instrument> = instruments
            .into_iter()
            .map(|i| Instrument {
                code: normalize_code(&i.code),
                ..i
            })
            .collect();
        for instrument in &instruments {
            instrument.validate()?;
        }
        for event in &events {
            event.validate()?;
        }

        let mut summary = LedgerImportSummary::default();
        let mut touched = BTreeSet::new();
        {
            let mut state = self.write()?;
            // A batch with a dangling reference leaves the ledger untouched.
            if let Some(orphan) = events.iter().find(|e| {
                !state.instruments.contains_key(&e.code)
                    && !instruments.iter().any(|i| i.code == e.code)
            }) {
                return Err(LedgerError::UnknownInstrument(orphan.code.clone()).into());
            }
            for instrument in instruments {
                touched.insert(instrument.code.clone());
                state.instruments.insert(instrument.code.clone(), instrument);
                summary.instruments_upserted += 1;
            }
            for event in events {
                if state.events.contains_key(&event.id) {
                    warn!("Skipping imported transaction {}: id already exists", event.id);
                    summary.duplicates_skipped += 1;
                    continue;
                }
                touched.insert(event.code.clone());
                state.events.insert(event.id.clone(), event);
                summary.transactions_inserted += 1;
            }
        }

        self.publish(LedgerEvent::Imported {
            codes: touched.into_iter().collect(),
            inserted: summary.transactions_inserted,
        });
        Ok(summary)
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events_tx.subscribe()
    }
}
