//! Transaction domain models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{SOURCE_IMPORT, SOURCE_MANUAL};
use crate::instruments::normalize_code;
use crate::{errors::ValidationError, Result};

/// How a transaction entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySource {
    #[default]
    Manual,
    Import,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Manual => SOURCE_MANUAL,
            EntrySource::Import => SOURCE_IMPORT,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            SOURCE_MANUAL => Some(EntrySource::Manual),
            SOURCE_IMPORT => Some(EntrySource::Import),
            _ => None,
        }
    }
}

/// The economic content of a transaction. Each variant carries only the
/// fields that are meaningful for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum TransactionKind {
    Buy {
        price: Decimal,
        shares: Decimal,
        fee: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fee_discount: Option<Decimal>,
    },
    Sell {
        price: Decimal,
        shares: Decimal,
        fee: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fee_discount: Option<Decimal>,
        tax: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tax_rate: Option<Decimal>,
    },
    CashDividend {
        amount: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rate_per_share: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ex_date: Option<NaiveDate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pay_date: Option<NaiveDate>,
    },
    StockDividend {
        shares: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rate_per_share: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ex_date: Option<NaiveDate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pay_date: Option<NaiveDate>,
    },
    Split {
        ratio: Decimal,
    },
    CapitalReduction {
        shares_cancelled: Decimal,
        cash_returned: Decimal,
    },
}

impl TransactionKind {
    /// Type tag as written to JSON and CSV.
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::Buy { .. } => "BUY",
            TransactionKind::Sell { .. } => "SELL",
            TransactionKind::CashDividend { .. } => "CASH_DIVIDEND",
            TransactionKind::StockDividend { .. } => "STOCK_DIVIDEND",
            TransactionKind::Split { .. } => "SPLIT",
            TransactionKind::CapitalReduction { .. } => "CAPITAL_REDUCTION",
        }
    }

    /// Signed cash effect: negative for money paid out, positive for money received.
    pub fn net_amount(&self) -> Decimal {
        match self {
            TransactionKind::Buy {
                price, shares, fee, ..
            } => -(price * shares + fee),
            TransactionKind::Sell {
                price,
                shares,
                fee,
                tax,
                ..
            } => price * shares - fee - tax,
            TransactionKind::CashDividend { amount, .. } => *amount,
            TransactionKind::CapitalReduction { cash_returned, .. } => *cash_returned,
            TransactionKind::StockDividend { .. } | TransactionKind::Split { .. } => Decimal::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TransactionKind::Buy {
                price, shares, fee, ..
            } => {
                non_negative("price", *price)?;
                positive("shares", *shares)?;
                non_negative("fee", *fee)
            }
            TransactionKind::Sell {
                price,
                shares,
                fee,
                tax,
                ..
            } => {
                non_negative("price", *price)?;
                positive("shares", *shares)?;
                non_negative("fee", *fee)?;
                non_negative("tax", *tax)
            }
            TransactionKind::CashDividend { amount, .. } => non_negative("amount", *amount),
            TransactionKind::StockDividend { shares, .. } => non_negative("shares", *shares),
            TransactionKind::Split { ratio } => positive("ratio", *ratio),
            TransactionKind::CapitalReduction {
                shares_cancelled,
                cash_returned,
            } => {
                non_negative("sharesCancelled", *shares_cancelled)?;
                non_negative("cashReturned", *cash_returned)
            }
        }
    }
}

fn non_negative(field: &str, value: Decimal) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::InvalidInput(format!("{} must not be negative", field)).into());
    }
    Ok(())
}

fn positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::InvalidInput(format!("{} must be greater than zero", field)).into());
    }
    Ok(())
}

/// A single ledger entry for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub id: String,
    pub code: String,
    pub trade_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TransactionEvent {
    /// Builds a stored event from user input, stamping a fresh id and timestamps.
    pub fn from_new(new: NewTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            code: normalize_code(&new.code),
            trade_date: new.trade_date,
            recorded_at: now,
            updated_at: now,
            kind: new.kind,
            broker: new.broker,
            account: new.account,
            source: new.source,
            note: new.note,
        }
    }

    /// Replay order: trade date, then insertion time, then id for full determinism.
    pub fn sort_key(&self) -> (NaiveDate, DateTime<Utc>, &str) {
        (self.trade_date, self.recorded_at, self.id.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id".to_string()).into());
        }
        if self.code.trim().is_empty() {
            return Err(ValidationError::MissingField("code".to_string()).into());
        }
        self.kind.validate()
    }
}

/// Sorts events into replay order in place.
pub fn sort_events(events: &mut [TransactionEvent]) {
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Input model for recording a new transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub code: String,
    pub trade_date: NaiveDate,
    #[serde(flatten)]
    pub kind: TransactionKind,
    #[serde(default)]
    pub broker: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewTransaction {
    pub fn new(code: impl Into<String>, trade_date: NaiveDate, kind: TransactionKind) -> Self {
        Self {
            code: code.into(),
            trade_date,
            kind,
            broker: None,
            account: None,
            source: EntrySource::Manual,
            note: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(ValidationError::MissingField("code".to_string()).into());
        }
        self.kind.validate()
    }
}

/// Input model for editing an existing transaction. The instrument code is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub id: String,
    pub trade_date: NaiveDate,
    #[serde(flatten)]
    pub kind: TransactionKind,
    #[serde(default)]
    pub broker: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl TransactionUpdate {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id".to_string()).into());
        }
        self.kind.validate()
    }

    /// Applies the edit on top of `existing`, keeping its id, code and insertion time.
    pub fn apply_to(self, existing: &TransactionEvent, now: DateTime<Utc>) -> TransactionEvent {
        TransactionEvent {
            id: existing.id.clone(),
            code: existing.code.clone(),
            trade_date: self.trade_date,
            recorded_at: existing.recorded_at,
            updated_at: now,
            kind: self.kind,
            broker: self.broker,
            account: self.account,
            source: existing.source,
            note: self.note,
        }
    }
}

/// Notification published by a ledger repository after a committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    InstrumentChanged { code: String },
    TransactionRecorded { code: String, id: String },
    TransactionUpdated { code: String, id: String },
    TransactionDeleted { code: String, id: String },
    Imported { codes: Vec<String>, inserted: usize },
}

/// Outcome of a bulk import into the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerImportSummary {
    pub instruments_upserted: usize,
    pub transactions_inserted: usize,
    /// Events whose id was already present; left untouched.
    pub duplicates_skipped: usize,
}
