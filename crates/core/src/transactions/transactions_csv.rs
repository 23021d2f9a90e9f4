//! CSV interchange for the ledger.
//!
//! One row per transaction with the instrument attributes denormalized onto
//! it. Instruments without any transaction get a row of their own with only
//! the instrument columns filled, so registrations survive a round trip. Files are written with a UTF-8 BOM so spreadsheet tools pick the right
//! encoding; the BOM is optional on import. `net_amount` is derived on export
//! and ignored on import.
//!
//! Import is lenient: a malformed row is skipped and reported with its line
//! number, the rest of the file still loads. Only a missing or unexpected
//! header rejects the whole file.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transactions_model::{EntrySource, TransactionEvent, TransactionKind};
use crate::errors::{Error, ValidationError};
use crate::instruments::{normalize_code, Instrument};
use crate::Result;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column layout shared by export and import, in file order.
pub const CSV_COLUMNS: [&str; 29] = [
    "id",
    "code",
    "name",
    "market",
    "industry",
    "type",
    "trade_date",
    "recorded_at",
    "updated_at",
    "price",
    "shares",
    "fee",
    "fee_discount",
    "tax",
    "tax_rate",
    "net_amount",
    "dividend_amount",
    "dividend_rate",
    "dividend_shares",
    "stock_dividend_rate",
    "ex_dividend_date",
    "payment_date",
    "split_ratio",
    "shares_cancelled",
    "cash_returned",
    "broker",
    "account",
    "source",
    "note",
];

#[derive(Clone, Copy)]
enum Col {
    Id = 0,
    Code,
    Name,
    Market,
    Industry,
    Type,
    TradeDate,
    RecordedAt,
    UpdatedAt,
    Price,
    Shares,
    Fee,
    FeeDiscount,
    Tax,
    TaxRate,
    NetAmount,
    DividendAmount,
    DividendRate,
    DividendShares,
    StockDividendRate,
    ExDividendDate,
    PaymentDate,
    SplitRatio,
    SharesCancelled,
    CashReturned,
    Broker,
    Account,
    Source,
    Note,
}

impl Col {
    fn name(self) -> &'static str {
        CSV_COLUMNS[self as usize]
    }
}

/// A row that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    /// 1-based line number in the file
    pub line: u64,
    pub reason: String,
}

/// Result of decoding a ledger CSV file.
#[derive(Debug, Clone, Default)]
pub struct CsvImport {
    pub instruments: Vec<Instrument>,
    pub events: Vec<TransactionEvent>,
    pub skipped: Vec<SkippedRow>,
}

impl CsvImport {
    pub fn accepted(&self) -> usize {
        self.events.len()
    }
}

/// Encodes instruments and their transactions as a ledger CSV file.
///
/// Rows are written in replay order. Events whose instrument is missing from
/// `instruments` are exported with the code standing in for the name.
pub fn export_csv(instruments: &[Instrument], events: &[TransactionEvent]) -> Result<Vec<u8>> {
    let by_code: BTreeMap<&str, &Instrument> =
        instruments.iter().map(|i| (i.code.as_str(), i)).collect();

    let mut ordered: Vec<&TransactionEvent> = events.iter().collect();
    ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut writer = WriterBuilder::new().from_writer(UTF8_BOM.to_vec());
    writer.write_record(CSV_COLUMNS)?;
    for instrument in instruments {
        if !events.iter().any(|e| e.code == instrument.code) {
            writer.write_record(&encode_instrument(instrument))?;
        }
    }
    for event in ordered {
        let row = encode_row(event, by_code.get(event.code.as_str()).copied());
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Csv(format!("Failed to flush CSV output: {}", e)))
}

fn encode_instrument(instrument: &Instrument) -> Vec<String> {
    let mut row = vec![String::new(); CSV_COLUMNS.len()];
    row[Col::Code as usize] = instrument.code.clone();
    row[Col::Name as usize] = instrument.name.clone();
    row[Col::Market as usize] = opt_text(instrument.market.as_ref());
    row[Col::Industry as usize] = opt_text(instrument.industry.as_ref());
    row
}

fn encode_row(event: &TransactionEvent, instrument: Option<&Instrument>) -> Vec<String> {
    let mut row = vec![String::new(); CSV_COLUMNS.len()];
    let mut set = |col: Col, value: String| row[col as usize] = value;

    set(Col::Id, event.id.clone());
    set(Col::Code, event.code.clone());
    set(
        Col::Name,
        instrument.map_or_else(|| event.code.clone(), |i| i.name.clone()),
    );
    set(Col::Market, opt_text(instrument.and_then(|i| i.market.as_ref())));
    set(Col::Industry, opt_text(instrument.and_then(|i| i.industry.as_ref())));
    set(Col::Type, event.kind.type_name().to_string());
    set(Col::TradeDate, event.trade_date.format(DATE_FORMAT).to_string());
    set(Col::RecordedAt, format_timestamp(&event.recorded_at));
    set(Col::UpdatedAt, format_timestamp(&event.updated_at));
    set(Col::NetAmount, event.kind.net_amount().to_string());

    match &event.kind {
        TransactionKind::Buy {
            price,
            shares,
            fee,
            fee_discount,
        } => {
            set(Col::Price, price.to_string());
            set(Col::Shares, shares.to_string());
            set(Col::Fee, fee.to_string());
            set(Col::FeeDiscount, opt_decimal(fee_discount));
        }
        TransactionKind::Sell {
            price,
            shares,
            fee,
            fee_discount,
            tax,
            tax_rate,
        } => {
            set(Col::Price, price.to_string());
            set(Col::Shares, shares.to_string());
            set(Col::Fee, fee.to_string());
            set(Col::FeeDiscount, opt_decimal(fee_discount));
            set(Col::Tax, tax.to_string());
            set(Col::TaxRate, opt_decimal(tax_rate));
        }
        TransactionKind::CashDividend {
            amount,
            rate_per_share,
            ex_date,
            pay_date,
        } => {
            set(Col::DividendAmount, amount.to_string());
            set(Col::DividendRate, opt_decimal(rate_per_share));
            set(Col::ExDividendDate, opt_date(ex_date));
            set(Col::PaymentDate, opt_date(pay_date));
        }
        TransactionKind::StockDividend {
            shares,
            rate_per_share,
            ex_date,
            pay_date,
        } => {
            set(Col::DividendShares, shares.to_string());
            set(Col::StockDividendRate, opt_decimal(rate_per_share));
            set(Col::ExDividendDate, opt_date(ex_date));
            set(Col::PaymentDate, opt_date(pay_date));
        }
        TransactionKind::Split { ratio } => set(Col::SplitRatio, ratio.to_string()),
        TransactionKind::CapitalReduction {
            shares_cancelled,
            cash_returned,
        } => {
            set(Col::SharesCancelled, shares_cancelled.to_string());
            set(Col::CashReturned, cash_returned.to_string());
        }
    }

    set(Col::Broker, opt_text(event.broker.as_ref()));
    set(Col::Account, opt_text(event.account.as_ref()));
    set(Col::Source, event.source.as_str().to_string());
    set(Col::Note, opt_text(event.note.as_ref()));
    row
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn opt_text(value: Option<&String>) -> String {
    value.cloned().unwrap_or_default()
}

fn opt_decimal(value: &Option<Decimal>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

fn opt_date(value: &Option<NaiveDate>) -> String {
    value
        .map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Decodes a ledger CSV file.
///
/// Rows without an id get a fresh one; rows without timestamps are stamped
/// at midnight UTC of their trade date so the result stays deterministic.
pub fn import_csv(content: &[u8]) -> Result<CsvImport> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers = reader.headers()?.clone();
    check_headers(&headers)?;

    let mut result = CsvImport::default();
    let mut instruments: BTreeMap<String, Instrument> = BTreeMap::new();

    for (idx, record) in reader.records().enumerate() {
        // Header is line 1
        let fallback_line = idx as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map_or(fallback_line, |p| p.line());
                result.skipped.push(SkippedRow {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map_or(fallback_line, |p| p.line());
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        match decode_row(&record) {
            Ok((instrument, event)) => {
                instruments
                    .entry(instrument.code.clone())
                    .or_insert(instrument);
                result.events.extend(event);
            }
            Err(reason) => result.skipped.push(SkippedRow { line, reason }),
        }
    }

    if !result.skipped.is_empty() {
        log::warn!(
            "CSV import skipped {} malformed row(s), accepted {}",
            result.skipped.len(),
            result.events.len()
        );
    }

    result.instruments = instruments.into_values().collect();
    Ok(result)
}

fn check_headers(headers: &StringRecord) -> Result<()> {
    let actual: Vec<&str> = headers.iter().map(str::trim).collect();
    if actual != CSV_COLUMNS {
        return Err(Error::Validation(ValidationError::InvalidInput(format!(
            "Unexpected CSV header. Expected columns: {}",
            CSV_COLUMNS.join(",")
        ))));
    }
    Ok(())
}

/// Typed accessors over one record. Errors are plain strings that end up in
/// the skip report.
struct Row<'a> {
    record: &'a StringRecord,
}

type RowResult<T> = std::result::Result<T, String>;

impl<'a> Row<'a> {
    fn text(&self, col: Col) -> Option<&'a str> {
        self.record
            .get(col as usize)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn owned(&self, col: Col) -> Option<String> {
        self.text(col).map(str::to_string)
    }

    fn required(&self, col: Col) -> RowResult<&'a str> {
        self.text(col)
            .ok_or_else(|| format!("missing required column '{}'", col.name()))
    }

    fn decimal(&self, col: Col) -> RowResult<Option<Decimal>> {
        self.text(col)
            .map(|s| {
                s.parse::<Decimal>()
                    .map_err(|e| format!("invalid number in '{}': {} ({})", col.name(), s, e))
            })
            .transpose()
    }

    fn required_decimal(&self, col: Col) -> RowResult<Decimal> {
        self.decimal(col)?
            .ok_or_else(|| format!("missing required column '{}'", col.name()))
    }

    fn decimal_or_zero(&self, col: Col) -> RowResult<Decimal> {
        Ok(self.decimal(col)?.unwrap_or(Decimal::ZERO))
    }

    fn date(&self, col: Col) -> RowResult<Option<NaiveDate>> {
        self.text(col)
            .map(|s| {
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map_err(|e| format!("invalid date in '{}': {} ({})", col.name(), s, e))
            })
            .transpose()
    }

    fn timestamp(&self, col: Col) -> RowResult<Option<DateTime<Utc>>> {
        self.text(col)
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| format!("invalid timestamp in '{}': {} ({})", col.name(), s, e))
            })
            .transpose()
    }
}

/// Decodes one row. Rows with no type, id or trade date register the
/// instrument only.
fn decode_row(record: &StringRecord) -> RowResult<(Instrument, Option<TransactionEvent>)> {
    if record.len() != CSV_COLUMNS.len() {
        return Err(format!(
            "expected {} columns, found {}",
            CSV_COLUMNS.len(),
            record.len()
        ));
    }
    let row = Row { record };

    let code = normalize_code(row.required(Col::Code)?);
    let instrument = Instrument {
        code: code.clone(),
        name: row.owned(Col::Name).unwrap_or_else(|| code.clone()),
        market: row.owned(Col::Market),
        industry: row.owned(Col::Industry),
    };

    if [Col::Type, Col::Id, Col::TradeDate]
        .iter()
        .all(|col| row.text(*col).is_none())
    {
        return Ok((instrument, None));
    }

    let kind = decode_kind(&row)?;
    kind.validate().map_err(|e| e.to_string())?;

    let trade_date = row
        .date(Col::TradeDate)?
        .ok_or_else(|| format!("missing required column '{}'", Col::TradeDate.name()))?;
    let recorded_at = row
        .timestamp(Col::RecordedAt)?
        .unwrap_or_else(|| trade_date.and_time(NaiveTime::MIN).and_utc());
    let updated_at = row.timestamp(Col::UpdatedAt)?.unwrap_or(recorded_at);

    let source = match row.text(Col::Source) {
        Some(value) => EntrySource::parse(value)
            .ok_or_else(|| format!("unknown source '{}'", value))?,
        None => EntrySource::Import,
    };

    let event = TransactionEvent {
        id: row
            .owned(Col::Id)
            .unwrap_or_else(|| Uuid::now_v7().to_string()),
        code,
        trade_date,
        recorded_at,
        updated_at,
        kind,
        broker: row.owned(Col::Broker),
        account: row.owned(Col::Account),
        source,
        note: row.owned(Col::Note),
    };
    Ok((instrument, Some(event)))
}

fn decode_kind(row: &Row<'_>) -> RowResult<TransactionKind> {
    let type_name = row.required(Col::Type)?.to_uppercase();
    let kind = match type_name.as_str() {
        "BUY" => TransactionKind::Buy {
            price: row.required_decimal(Col::Price)?,
            shares: row.required_decimal(Col::Shares)?,
            fee: row.decimal_or_zero(Col::Fee)?,
            fee_discount: row.decimal(Col::FeeDiscount)?,
        },
        "SELL" => TransactionKind::Sell {
            price: row.required_decimal(Col::Price)?,
            shares: row.required_decimal(Col::Shares)?,
            fee: row.decimal_or_zero(Col::Fee)?,
            fee_discount: row.decimal(Col::FeeDiscount)?,
            tax: row.decimal_or_zero(Col::Tax)?,
            tax_rate: row.decimal(Col::TaxRate)?,
        },
        "CASH_DIVIDEND" => TransactionKind::CashDividend {
            amount: row.required_decimal(Col::DividendAmount)?,
            rate_per_share: row.decimal(Col::DividendRate)?,
            ex_date: row.date(Col::ExDividendDate)?,
            pay_date: row.date(Col::PaymentDate)?,
        },
        "STOCK_DIVIDEND" => TransactionKind::StockDividend {
            shares: row.required_decimal(Col::DividendShares)?,
            rate_per_share: row.decimal(Col::StockDividendRate)?,
            ex_date: row.date(Col::ExDividendDate)?,
            pay_date: row.date(Col::PaymentDate)?,
        },
        "SPLIT" => TransactionKind::Split {
            ratio: row.required_decimal(Col::SplitRatio)?,
        },
        "CAPITAL_REDUCTION" => TransactionKind::CapitalReduction {
            shares_cancelled: row.decimal_or_zero(Col::SharesCancelled)?,
            cash_returned: row.decimal_or_zero(Col::CashReturned)?,
        },
        other => return Err(format!("unknown transaction type '{}'", other)),
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    fn event(id: &str, code: &str, day: u32, kind: TransactionKind) -> TransactionEvent {
        TransactionEvent {
            id: id.to_string(),
            code: code.to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            recorded_at: ts(1, day),
            updated_at: ts(2, day),
            kind,
            broker: None,
            account: None,
            source: EntrySource::Manual,
            note: None,
        }
    }

    fn sample_ledger() -> (Vec<Instrument>, Vec<TransactionEvent>) {
        let instruments = vec![
            Instrument::new("2330", "台積電")
                .with_market("TWSE")
                .with_industry("Semiconductors"),
            Instrument::new("0050", "Yuanta, \"Taiwan 50\""),
        ];
        let mut sell = event(
            "e2",
            "2330",
            5,
            TransactionKind::Sell {
                price: dec!(600),
                shares: dec!(400),
                fee: dec!(20),
                fee_discount: Some(dec!(0.6)),
                tax: dec!(720),
                tax_rate: Some(dec!(0.003)),
            },
        );
        sell.note = Some("line one\nline two".to_string());
        sell.broker = Some("Fubon".to_string());
        let events = vec![
            event(
                "e1",
                "2330",
                1,
                TransactionKind::Buy {
                    price: dec!(100),
                    shares: dec!(1000),
                    fee: dec!(20),
                    fee_discount: None,
                },
            ),
            sell,
            event(
                "e3",
                "0050",
                6,
                TransactionKind::CashDividend {
                    amount: dec!(150.5),
                    rate_per_share: Some(dec!(1.505)),
                    ex_date: NaiveDate::from_ymd_opt(2024, 3, 6),
                    pay_date: None,
                },
            ),
            event("e4", "0050", 7, TransactionKind::Split { ratio: dec!(4) }),
            event(
                "e5",
                "0050",
                8,
                TransactionKind::CapitalReduction {
                    shares_cancelled: dec!(10),
                    cash_returned: dec!(55),
                },
            ),
            event(
                "e6",
                "2330",
                9,
                TransactionKind::StockDividend {
                    shares: dec!(25),
                    rate_per_share: Some(dec!(0.05)),
                    ex_date: None,
                    pay_date: None,
                },
            ),
        ];
        (instruments, events)
    }

    #[test]
    fn test_export_starts_with_bom_and_header() {
        let (instruments, events) = sample_ledger();
        let bytes = export_csv(&instruments, &events).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let text = std::str::from_utf8(&bytes[UTF8_BOM.len()..]).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, CSV_COLUMNS.join(","));
    }

    #[test]
    fn test_export_import_is_lossless() {
        let (instruments, events) = sample_ledger();
        let bytes = export_csv(&instruments, &events).unwrap();
        let imported = import_csv(&bytes).unwrap();

        assert!(imported.skipped.is_empty());
        assert_eq!(imported.events, events);

        let mut expected = instruments.clone();
        expected.sort_by(|a, b| a.code.cmp(&b.code));
        assert_eq!(imported.instruments, expected);
    }

    #[test]
    fn test_export_writes_derived_net_amount() {
        let (instruments, events) = sample_ledger();
        let bytes = export_csv(&instruments, &events[..1]).unwrap();
        let imported_text = String::from_utf8(bytes).unwrap();
        // -(100 * 1000 + 20)
        assert!(imported_text.contains(",-100020,"));
    }

    #[test]
    fn test_import_without_bom() {
        let (instruments, events) = sample_ledger();
        let bytes = export_csv(&instruments, &events).unwrap();
        let imported = import_csv(&bytes[UTF8_BOM.len()..]).unwrap();
        assert_eq!(imported.accepted(), events.len());
    }

    #[test]
    fn test_import_skips_malformed_rows() {
        let header = CSV_COLUMNS.join(",");
        let mut good = vec![""; 29];
        good[Col::Code as usize] = "2330";
        good[Col::Type as usize] = "BUY";
        good[Col::TradeDate as usize] = "2024-03-01";
        good[Col::Price as usize] = "100";
        good[Col::Shares as usize] = "10";

        let mut bad_number = good.clone();
        bad_number[Col::Price as usize] = "abc";
        let mut bad_type = good.clone();
        bad_type[Col::Type as usize] = "TRANSFER";

        let content = format!(
            "{}\n{}\n{}\n{}\nonly,three,columns\n",
            header,
            good.join(","),
            bad_number.join(","),
            bad_type.join(",")
        );
        let imported = import_csv(content.as_bytes()).unwrap();

        assert_eq!(imported.accepted(), 1);
        assert_eq!(imported.skipped.len(), 3);
        let lines: Vec<u64> = imported.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![3, 4, 5]);
        assert!(imported.skipped[0].reason.contains("price"));
        assert!(imported.skipped[1].reason.contains("TRANSFER"));

        let accepted = &imported.events[0];
        assert_eq!(accepted.source, EntrySource::Import);
        assert!(!accepted.id.is_empty());
        assert_eq!(accepted.recorded_at, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(imported.instruments[0].name, "2330");
    }

    #[test]
    fn test_import_rejects_unknown_header() {
        let content = "code,type,price\n2330,BUY,100\n";
        assert!(import_csv(content.as_bytes()).is_err());
    }

    #[test]
    fn test_import_ignores_blank_lines() {
        let (instruments, events) = sample_ledger();
        let mut bytes = export_csv(&instruments, &events[..1]).unwrap();
        bytes.extend_from_slice(b"\n\n");
        let imported = import_csv(&bytes).unwrap();
        assert_eq!(imported.accepted(), 1);
        assert!(imported.skipped.is_empty());
    }

    #[test]
    fn test_instrument_without_transactions_round_trips() {
        let watchlist = Instrument::new("2454", "MediaTek").with_market("TWSE");
        let bytes = export_csv(std::slice::from_ref(&watchlist), &[]).unwrap();
        let imported = import_csv(&bytes).unwrap();

        assert!(imported.skipped.is_empty());
        assert!(imported.events.is_empty());
        assert_eq!(imported.instruments, vec![watchlist]);
    }
}
