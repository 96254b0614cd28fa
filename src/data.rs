//! Data loading and export
//!
//! CSV adapters for the trade feed, the position snapshot and the output
//! tables. Loading is lenient about header case; malformed or missing trade
//! values are left for validation so a bad row never fails the whole file.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Position, PositionRow, TradeRow};

const TRADE_ID: &[&str] = &["trade_id"];
const SYMBOL: &[&str] = &["symbol"];
const SIDE: &[&str] = &["side"];
const QUANTITY: &[&str] = &["quantity"];
const PRICE: &[&str] = &["price"];
const EXECUTION_TS: &[&str] = &["execution_ts", "execution_timestamp"];
const ACCOUNT_ID: &[&str] = &["account_id"];
const VENUE: &[&str] = &["venue"];
const TRADER_ID: &[&str] = &["trader_id"];
const ORDER_ID: &[&str] = &["order_id"];

pub const DAILY_METRICS_FILE: &str = "daily_metrics.csv";
pub const DAILY_PNL_FACTS_FILE: &str = "daily_pnl_facts.csv";
pub const ACCOUNT_SUMMARY_FILE: &str = "account_summary.csv";

// =============================================================================
// CSV Data Loading
// =============================================================================

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader)
}

/// Column positions of the trade feed, resolved from the header row
struct TradeColumns {
    trade_id: usize,
    symbol: usize,
    side: usize,
    quantity: usize,
    price: usize,
    execution_ts: usize,
    account_id: usize,
    venue: Option<usize>,
    trader_id: Option<usize>,
    order_id: Option<usize>,
}

impl TradeColumns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|name| h.eq_ignore_ascii_case(name)))
        };
        let require = |names: &[&str]| {
            find(names).with_context(|| format!("Trade file has no '{}' column", names[0]))
        };

        Ok(Self {
            trade_id: require(TRADE_ID)?,
            symbol: require(SYMBOL)?,
            side: require(SIDE)?,
            quantity: require(QUANTITY)?,
            price: require(PRICE)?,
            execution_ts: require(EXECUTION_TS)?,
            account_id: require(ACCOUNT_ID)?,
            venue: find(VENUE),
            trader_id: find(TRADER_ID),
            order_id: find(ORDER_ID),
        })
    }

    /// Build a row from one record. Cells past the end of a short record
    /// read as empty and are rejected later by trade validation.
    fn row(&self, record: &csv::ByteRecord) -> TradeRow {
        let cell = |idx: usize| {
            record
                .get(idx)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        };
        let optional = |idx: Option<usize>| idx.map(cell).filter(|value| !value.is_empty());

        TradeRow {
            trade_id: cell(self.trade_id),
            symbol: cell(self.symbol),
            side: cell(self.side),
            quantity: cell(self.quantity),
            price: cell(self.price),
            execution_timestamp: cell(self.execution_ts),
            account_id: cell(self.account_id),
            venue: optional(self.venue),
            trader_id: optional(self.trader_id),
            order_id: optional(self.order_id),
        }
    }
}

/// Read raw trade rows from any CSV source.
///
/// Only a missing required column or an I/O error fails the file; short rows
/// and undecodable bytes come through as rows that fail validation.
pub fn read_trades<R: Read>(reader: R) -> Result<Vec<TradeRow>> {
    let mut reader = csv_reader(reader);
    let headers = reader.headers().context("Failed to read trade header")?;
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let width = headers.len();
    let columns = TradeColumns::from_headers(headers)?;
    let mut rows = Vec::new();

    for (row_idx, result) in reader.byte_records().enumerate() {
        let record = result.with_context(|| format!("Failed to read trade row {}", row_idx + 1))?;
        if record.len() < width {
            warn!(
                "Trade row {} has only {} fields, missing values are left empty",
                row_idx + 1,
                record.len()
            );
        }
        rows.push(columns.row(&record));
    }

    Ok(rows)
}

/// Load one trade batch file
pub fn load_trades(path: impl AsRef<Path>) -> Result<Vec<TradeRow>> {
    let path = path.as_ref();
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open trade file: {}", path.display()))?;
    let rows = read_trades(file).with_context(|| format!("Failed to load {}", path.display()))?;

    info!("Loaded {} trades from {}", rows.len(), path.display());
    Ok(rows)
}

/// Read position rows from any CSV source. Rows that parse but fail
/// position validation are skipped with a warning.
pub fn read_positions<R: Read>(reader: R) -> Result<Vec<Position>> {
    let mut reader = csv_reader(reader);
    let mut positions = Vec::new();

    for (row_idx, result) in reader.deserialize::<PositionRow>().enumerate() {
        let row =
            result.with_context(|| format!("Failed to read position row {}", row_idx + 1))?;
        match Position::try_from(row) {
            Ok(position) => positions.push(position),
            Err(err) => warn!("Skipping position row {}: {}", row_idx + 1, err),
        }
    }

    Ok(positions)
}

/// Load the position snapshot file. A missing file yields no positions.
pub fn load_positions(path: impl AsRef<Path>) -> Result<Vec<Position>> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(
            "Position file not found: {}, treating every trade as opening",
            path.display()
        );
        return Ok(Vec::new());
    }

    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open position file: {}", path.display()))?;
    let positions =
        read_positions(file).with_context(|| format!("Failed to load {}", path.display()))?;

    info!("Loaded {} positions from {}", positions.len(), path.display());
    Ok(positions)
}

// =============================================================================
// CSV Export
// =============================================================================

/// Write rows to `dir/filename` with a header, replacing any previous file
pub fn write_csv<T: Serialize>(dir: impl AsRef<Path>, filename: &str, rows: &[T]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let filepath = dir.join(filename);
    let mut writer = csv::Writer::from_path(&filepath)
        .with_context(|| format!("Failed to create output file: {}", filepath.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", rows.len(), filepath.display());
    Ok(filepath)
}

// =============================================================================
// Tests
// =============================================================================
