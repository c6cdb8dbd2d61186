//! Pipe-delimited transaction log.
//!
//! ```text
//! OPTJOURNAL|1
//! // comment
//! T|is_open|next_leg_id|ticker_symbol|ticker_name|future_expiry|category
//! X|trans_date|description|underlying_kind|quantity|price|multiplier|fees|total
//! L|leg_id|back_pointer|original_qty|open_qty|expiry|strike|put_call|action|underlying_kind
//! ```

use crate::domain::{
    journal_date, Action, Decimal, Leg, LegQuote, PutCall, Trade, Transaction, UnderlyingKind,
};
use crate::engine::position;
use chrono::NaiveDate;
use csv::{ByteRecord, QuoteStyle, ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const LOG_MAGIC: &str = "OPTJOURNAL";
pub const LOG_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("journal log has no valid header: expected '{LOG_MAGIC}', found '{0}'")]
    BadHeader(String),
    #[error("journal log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal log format error: {0}")]
    Csv(#[from] csv::Error),
}

/// Load a journal log. A missing file is an empty journal.
///
/// # Errors
/// Fails on I/O errors and on a missing or wrong magic header. Malformed
/// fields inside records never fail the load.
pub fn load_journal(path: &Path) -> Result<Vec<Trade>, StoreError> {
    if !path.exists() {
        info!(path = %path.display(), "Journal log not found, starting empty");
        return Ok(Vec::new());
    }
    let trades = read_journal(BufReader::new(File::open(path)?))?;
    info!(path = %path.display(), trades = trades.len(), "Journal loaded");
    Ok(trades)
}

/// Parse a journal log from any reader and derive every trade.
pub fn read_journal<R: Read>(reader: R) -> Result<Vec<Trade>, StoreError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'/'))
        .from_reader(reader);

    // Byte records: a stray non-UTF-8 byte damages one field, not the load.
    let mut records = rdr.byte_records();
    let header = match records.next() {
        Some(rec) => Fields::new(&rec?),
        None => return Err(StoreError::BadHeader(String::new())),
    };
    let magic = header.text(0);
    if magic.trim() != LOG_MAGIC {
        return Err(StoreError::BadHeader(magic.trim().to_string()));
    }
    let version = header.text(1);
    if version.trim() != LOG_VERSION {
        warn!(version = version.trim(), "Unknown journal log version, loading anyway");
    }

    let mut trades: Vec<Trade> = Vec::new();
    for rec in records {
        let mut fields = Fields::new(&rec?);
        let line = fields.line;
        match fields.text(0).as_str() {
            "T" => trades.push(fields.trade()),
            "X" => match trades.last_mut() {
                Some(trade) => {
                    let tx = fields.transaction();
                    trade.transactions.push(tx);
                }
                None => warn!(line, "Transaction record before any trade, skipped"),
            },
            "L" => match trades
                .last_mut()
                .and_then(|t| t.transactions.last_mut())
            {
                Some(tx) => {
                    let leg = fields.leg();
                    tx.legs.push(leg);
                }
                None => warn!(line, "Leg record before any transaction, skipped"),
            },
            other => warn!(line, record = other, "Unknown record type, skipped"),
        }
        if !fields.notes.is_empty() {
            if let Some(trade) = trades.last_mut() {
                for note in fields.notes.drain(..) {
                    trade.flag_attention(note);
                }
            }
        }
    }

    for trade in trades.iter_mut() {
        finish_loaded_trade(trade);
    }
    Ok(trades)
}

fn finish_loaded_trade(trade: &mut Trade) {
    let max_leg_id = trade.legs().map(|(_, l)| l.leg_id).max().unwrap_or(0);
    if trade.next_leg_id <= max_leg_id {
        warn!(
            ticker = %trade.ticker_symbol,
            next_leg_id = trade.next_leg_id,
            max_leg_id,
            "next_leg_id behind existing legs, advancing"
        );
        match max_leg_id.checked_add(1) {
            Some(next) => trade.next_leg_id = next,
            None => {
                // Ids are never reused, so the trade accepts no new legs.
                trade.next_leg_id = i64::MAX;
                trade.flag_attention(format!("leg id {} leaves no room for new legs", max_leg_id));
            }
        }
    }
    for divergence in position::replay_divergences(trade) {
        warn!(
            ticker = %trade.ticker_symbol,
            leg_id = divergence.leg_id,
            stored = divergence.stored,
            replayed = divergence.replayed,
            "Stored open quantity differs from replayed log"
        );
    }
    position::refresh(trade);
}

/// Cursor over one record that substitutes defaults for malformed fields.
struct Fields {
    values: Vec<String>,
    line: u64,
    notes: Vec<String>,
}

impl Fields {
    /// Decode every field, replacing invalid UTF-8 and noting the damage.
    fn new(rec: &ByteRecord) -> Self {
        let line = rec.position().map(|p| p.line()).unwrap_or(0);
        let mut notes = Vec::new();
        let values = rec
            .iter()
            .enumerate()
            .map(|(i, raw)| match std::str::from_utf8(raw) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    warn!(line, field = i, "Invalid UTF-8 in journal field, replacing");
                    notes.push(format!("line {}: field {} is not valid UTF-8", line, i));
                    String::from_utf8_lossy(raw).into_owned()
                }
            })
            .collect();
        Self { values, line, notes }
    }

    fn get(&self, i: usize) -> &str {
        self.values.get(i).map(String::as_str).unwrap_or("")
    }

    fn text(&self, i: usize) -> String {
        self.get(i).to_string()
    }

    fn malformed(&mut self, name: &str, value: &str) {
        warn!(line = self.line, field = name, value, "Malformed journal field, using default");
        self.notes
            .push(format!("line {}: malformed {} '{}'", self.line, name, value));
    }

    fn int(&mut self, i: usize, name: &str) -> i64 {
        let raw = self.get(i).trim();
        if raw.is_empty() {
            return 0;
        }
        match raw.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                let raw = raw.to_string();
                self.malformed(name, &raw);
                0
            }
        }
    }

    fn decimal(&mut self, i: usize, name: &str) -> Decimal {
        let raw = self.get(i);
        match Decimal::parse_field(raw) {
            Some(v) => v,
            None => {
                let raw = raw.to_string();
                self.malformed(name, &raw);
                Decimal::zero()
            }
        }
    }

    fn date(&mut self, i: usize, name: &str) -> Option<NaiveDate> {
        let raw = self.get(i).trim();
        let parsed = journal_date::parse(raw);
        if parsed.is_none() && !raw.is_empty() {
            let raw = raw.to_string();
            self.malformed(name, &raw);
        }
        parsed
    }

    fn trade(&mut self) -> Trade {
        let is_open = self.int(1, "is_open") != 0;
        let next_leg_id = self.int(2, "next_leg_id");
        let mut trade = Trade::new(self.text(3), self.text(4), 0);
        trade.is_open = is_open;
        trade.next_leg_id = next_leg_id.max(1);
        trade.future_expiry = self.date(5, "future_expiry");
        trade.category = self.int(6, "category");
        trade
    }

    fn transaction(&mut self) -> Transaction {
        Transaction {
            trans_date: self.date(1, "trans_date"),
            description: self.text(2),
            underlying_kind: UnderlyingKind::from_code(self.int(3, "underlying_kind")),
            quantity: self.int(4, "quantity"),
            price: self.decimal(5, "price"),
            multiplier: self.decimal(6, "multiplier"),
            fees: self.decimal(7, "fees"),
            total: self.decimal(8, "total"),
            legs: Vec::new(),
        }
    }

    fn leg(&mut self) -> Leg {
        let original_quantity = self.int(3, "original_quantity");
        let raw_action = self.text(8);
        let action = match raw_action.trim().parse::<i64>().ok().and_then(Action::from_code) {
            Some(action) => action,
            None => {
                if !raw_action.trim().is_empty() {
                    self.malformed("action", &raw_action);
                }
                if original_quantity < 0 {
                    Action::SellToOpen
                } else {
                    Action::BuyToOpen
                }
            }
        };
        // Strikes stay text; an unparsable one is flagged by the deriver, not here.
        Leg {
            leg_id: self.int(1, "leg_id"),
            leg_back_pointer_id: self.int(2, "leg_back_pointer_id"),
            original_quantity,
            open_quantity: self.int(4, "open_quantity"),
            expiry_date: self.date(5, "expiry_date"),
            strike_price: self.text(6).trim().to_string(),
            put_call: PutCall::parse(&self.text(7)),
            action,
            underlying_kind: UnderlyingKind::from_code(self.int(9, "underlying_kind")),
            contract_id: None,
            quote: LegQuote::default(),
        }
    }
}

/// Write `trades` to `path` through a sibling temp file.
pub fn save_journal(path: &Path, trades: &[Trade]) -> Result<(), StoreError> {
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp)?;
        write_journal(BufWriter::new(file), trades)?;
    }
    std::fs::rename(&tmp, path)?;
    info!(path = %path.display(), trades = trades.len(), "Journal saved");
    Ok(())
}

/// `<file name>.tmp` next to `path`, never equal to `path` itself.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn write_journal<W: Write>(mut writer: W, trades: &[Trade]) -> Result<(), StoreError> {
    writeln!(writer, "{}|{}", LOG_MAGIC, LOG_VERSION)?;
    writeln!(writer, "// T|is_open|next_leg_id|ticker_symbol|ticker_name|future_expiry|category")?;
    writeln!(
        writer,
        "// X|trans_date|description|underlying_kind|quantity|price|multiplier|fees|total"
    )?;
    writeln!(
        writer,
        "// L|leg_id|back_pointer|original_qty|open_qty|expiry|strike|put_call|action|underlying_kind"
    )?;

    let mut wtr = WriterBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .flexible(true)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(writer);

    for trade in trades {
        wtr.write_record([
            "T".to_string(),
            if trade.is_open { "1" } else { "0" }.to_string(),
            trade.next_leg_id.to_string(),
            trade.ticker_symbol.clone(),
            trade.ticker_name.clone(),
            journal_date::to_log(trade.future_expiry),
            trade.category.to_string(),
        ])?;
        for tx in &trade.transactions {
            wtr.write_record([
                "X".to_string(),
                journal_date::to_log(tx.trans_date),
                tx.description.clone(),
                tx.underlying_kind.code().to_string(),
                tx.quantity.to_string(),
                tx.price.to_log_string(),
                tx.multiplier.to_log_string(),
                tx.fees.to_log_string(),
                tx.total.to_log_string(),
            ])?;
            for leg in &tx.legs {
                wtr.write_record([
                    "L".to_string(),
                    leg.leg_id.to_string(),
                    leg.leg_back_pointer_id.to_string(),
                    leg.original_quantity.to_string(),
                    leg.open_quantity.to_string(),
                    journal_date::to_log(leg.expiry_date),
                    leg.strike_price.clone(),
                    leg.put_call.map(|p| p.as_str()).unwrap_or("").to_string(),
                    leg.action.code().to_string(),
                    leg.underlying_kind.code().to_string(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}
