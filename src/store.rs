// Metric store for the P&L engine
// SQLite-based persistence plus an in-memory variant for tests
//
// Holds the append-only enriched trade history, the daily metrics written by
// upsert-by-natural-key, and the checkpoint log of processed batches.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{AccountId, DailyMetric, EnrichedTrade, MetricKey, Money, Side, Symbol, Trade};

// =============================================================================
// Data Models
// =============================================================================

/// Record of one processed batch.
///
/// `watermark` is the latest execution timestamp seen in the batch and can be
/// handed back to the pipeline as the boundary for the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub batch_id: String,
    pub watermark: Option<DateTime<Utc>>,
    pub trades_received: usize,
    pub trades_enriched: usize,
    pub duplicates_skipped: usize,
    pub late_arrivals: usize,
    pub trades_rejected: usize,
    pub metrics_upserted: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub enriched_trades: usize,
    pub daily_metrics: usize,
    pub checkpoints: usize,
}

/// Storage seam used by the pipeline.
///
/// `upsert_metrics` must replace an existing row for the same key rather than
/// add to it; implementations rely on the backend for atomicity of each call.
pub trait PnlStore {
    /// Append enriched trades, ignoring trade ids that are already stored.
    /// Returns the number of trades actually inserted.
    fn append_enriched(&mut self, trades: &[EnrichedTrade]) -> Result<usize>;

    /// Which of the given trade ids are already stored
    fn known_trade_ids(&self, trade_ids: &[&str]) -> Result<HashSet<String>>;

    /// Full enriched history for each key
    fn enriched_for_keys(&self, keys: &BTreeSet<MetricKey>) -> Result<Vec<EnrichedTrade>>;

    fn upsert_metrics(&mut self, metrics: &[DailyMetric]) -> Result<()>;

    fn load_metrics(&self) -> Result<Vec<DailyMetric>>;

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()>;

    /// Most recent checkpoint, if any batch has been processed
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>>;

    fn stats(&self) -> Result<StoreStats>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    trades: Vec<EnrichedTrade>,
    trade_ids: HashSet<String>,
    metrics: BTreeMap<MetricKey, DailyMetric>,
    checkpoints: Vec<Checkpoint>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PnlStore for InMemoryStore {
    fn append_enriched(&mut self, trades: &[EnrichedTrade]) -> Result<usize> {
        let mut inserted = 0;
        for trade in trades {
            if self.trade_ids.insert(trade.trade.trade_id.clone()) {
                self.trades.push(trade.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn known_trade_ids(&self, trade_ids: &[&str]) -> Result<HashSet<String>> {
        Ok(trade_ids
            .iter()
            .filter(|id| self.trade_ids.contains(**id))
            .map(|id| id.to_string())
            .collect())
    }

    fn enriched_for_keys(&self, keys: &BTreeSet<MetricKey>) -> Result<Vec<EnrichedTrade>> {
        Ok(self
            .trades
            .iter()
            .filter(|t| keys.contains(&t.metric_key()))
            .cloned()
            .collect())
    }

    fn upsert_metrics(&mut self, metrics: &[DailyMetric]) -> Result<()> {
        for metric in metrics {
            self.metrics.insert(metric.key(), metric.clone());
        }
        Ok(())
    }

    fn load_metrics(&self) -> Result<Vec<DailyMetric>> {
        Ok(self.metrics.values().cloned().collect())
    }

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.last().cloned())
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            enriched_trades: self.trades.len(),
            daily_metrics: self.metrics.len(),
            checkpoints: self.checkpoints.len(),
        })
    }
}

// =============================================================================
// SQLite column conversions
// =============================================================================

impl ToSql for Money {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Money {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<Money>()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Symbol {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Symbol {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(Symbol::new)
    }
}

impl ToSql for AccountId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AccountId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(AccountId::new)
    }
}

impl ToSql for Side {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Side {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<Side>()
            .map_err(|side| FromSqlError::Other(format!("unknown side '{}'", side).into()))
    }
}

// =============================================================================
// SQLite implementation
// =============================================================================

const ENRICHED_COLUMNS: &str = "trade_id, account_id, symbol, side, quantity, price,
     execution_ts, venue, trader_id, order_id, notional_value,
     position_quantity_before, average_cost_before, realized_pnl, is_closing";

const METRIC_COLUMNS: &str = "trade_date, account_id, symbol, buy_quantity, sell_quantity,
     net_quantity, total_notional, realized_pnl, trade_count, updated_at";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directories
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL lets readers (status, facts) run while a batch is being written
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

        let store = Self { conn };
        store.create_tables()?;
        info!("SQLite metric store initialized at {}", db_path.display());

        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS enriched_trades (
                trade_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                execution_ts TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                venue TEXT,
                trader_id TEXT,
                order_id TEXT,
                notional_value TEXT NOT NULL,
                position_quantity_before TEXT,
                average_cost_before TEXT,
                realized_pnl TEXT NOT NULL,
                is_closing INTEGER NOT NULL,
                processed_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_metrics (
                trade_date TEXT NOT NULL,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                buy_quantity TEXT NOT NULL,
                sell_quantity TEXT NOT NULL,
                net_quantity TEXT NOT NULL,
                total_notional TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                trade_count INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (trade_date, account_id, symbol)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL,
                watermark TEXT,
                trades_received INTEGER NOT NULL,
                trades_enriched INTEGER NOT NULL,
                duplicates_skipped INTEGER NOT NULL,
                late_arrivals INTEGER NOT NULL DEFAULT 0,
                trades_rejected INTEGER NOT NULL,
                metrics_upserted INTEGER NOT NULL,
                completed_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_enriched_key
             ON enriched_trades(trade_date, account_id, symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    fn enriched_from_row(row: &Row<'_>) -> rusqlite::Result<EnrichedTrade> {
        Ok(EnrichedTrade {
            trade: Trade {
                trade_id: row.get(0)?,
                account_id: row.get(1)?,
                symbol: row.get(2)?,
                side: row.get(3)?,
                quantity: row.get(4)?,
                price: row.get(5)?,
                execution_timestamp: row.get(6)?,
                venue: row.get(7)?,
                trader_id: row.get(8)?,
                order_id: row.get(9)?,
            },
            notional_value: row.get(10)?,
            position_quantity_before: row.get(11)?,
            average_cost_before: row.get(12)?,
            realized_pnl: row.get(13)?,
            is_closing: row.get::<_, i64>(14)? != 0,
        })
    }

    fn metric_from_row(row: &Row<'_>) -> rusqlite::Result<DailyMetric> {
        Ok(DailyMetric {
            trade_date: row.get(0)?,
            account_id: row.get(1)?,
            symbol: row.get(2)?,
            buy_quantity: row.get(3)?,
            sell_quantity: row.get(4)?,
            net_quantity: row.get(5)?,
            total_notional: row.get(6)?,
            realized_pnl: row.get(7)?,
            trade_count: row.get::<_, i64>(8)?.max(0) as u64,
            updated_at: row.get(9)?,
        })
    }
}

impl PnlStore for SqliteStore {
    fn append_enriched(&mut self, trades: &[EnrichedTrade]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO enriched_trades
                 (trade_id, account_id, symbol, side, quantity, price, execution_ts,
                  trade_date, venue, trader_id, order_id, notional_value,
                  position_quantity_before, average_cost_before, realized_pnl, is_closing)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;

            for enriched in trades {
                let t = &enriched.trade;
                inserted += stmt.execute(params![
                    t.trade_id,
                    t.account_id,
                    t.symbol,
                    t.side,
                    t.quantity,
                    t.price,
                    t.execution_timestamp,
                    enriched.trade_date(),
                    t.venue,
                    t.trader_id,
                    t.order_id,
                    enriched.notional_value,
                    enriched.position_quantity_before,
                    enriched.average_cost_before,
                    enriched.realized_pnl,
                    enriched.is_closing as i64,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Appended {} of {} enriched trades ({} already stored)",
            inserted,
            trades.len(),
            trades.len() - inserted
        );
        Ok(inserted)
    }

    fn known_trade_ids(&self, trade_ids: &[&str]) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT trade_id FROM enriched_trades WHERE trade_id = ?1")?;
        let mut known = HashSet::new();
        for id in trade_ids {
            if let Some(found) = stmt
                .query_row(params![id], |row| row.get::<_, String>(0))
                .optional()?
            {
                known.insert(found);
            }
        }
        Ok(known)
    }

    fn enriched_for_keys(&self, keys: &BTreeSet<MetricKey>) -> Result<Vec<EnrichedTrade>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM enriched_trades
             WHERE trade_date = ?1 AND account_id = ?2 AND symbol = ?3
             ORDER BY execution_ts, trade_id",
            ENRICHED_COLUMNS
        ))?;

        let mut trades = Vec::new();
        for key in keys {
            let rows = stmt.query_map(
                params![key.trade_date, key.account_id, key.symbol],
                Self::enriched_from_row,
            )?;
            for row in rows {
                trades.push(row?);
            }
        }

        debug!(
            "Loaded {} enriched trades for {} metric keys",
            trades.len(),
            keys.len()
        );
        Ok(trades)
    }

    fn upsert_metrics(&mut self, metrics: &[DailyMetric]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO daily_metrics ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(trade_date, account_id, symbol) DO UPDATE SET
                    buy_quantity = excluded.buy_quantity,
                    sell_quantity = excluded.sell_quantity,
                    net_quantity = excluded.net_quantity,
                    total_notional = excluded.total_notional,
                    realized_pnl = excluded.realized_pnl,
                    trade_count = excluded.trade_count,
                    updated_at = excluded.updated_at",
                METRIC_COLUMNS
            ))?;

            for m in metrics {
                stmt.execute(params![
                    m.trade_date,
                    m.account_id,
                    m.symbol,
                    m.buy_quantity,
                    m.sell_quantity,
                    m.net_quantity,
                    m.total_notional,
                    m.realized_pnl,
                    m.trade_count as i64,
                    m.updated_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Upserted {} daily metrics", metrics.len());
        Ok(())
    }

    fn load_metrics(&self) -> Result<Vec<DailyMetric>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM daily_metrics ORDER BY trade_date, account_id, symbol",
            METRIC_COLUMNS
        ))?;
        let metrics = stmt
            .query_map([], Self::metric_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} daily metrics", metrics.len());
        Ok(metrics)
    }

    fn save_checkpoint(&mut self, ckpt: &Checkpoint) -> Result<()> {
        self.conn.execute(
            "INSERT INTO checkpoints
             (batch_id, watermark, trades_received, trades_enriched, duplicates_skipped,
              late_arrivals, trades_rejected, metrics_upserted, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ckpt.batch_id,
                ckpt.watermark,
                ckpt.trades_received as i64,
                ckpt.trades_enriched as i64,
                ckpt.duplicates_skipped as i64,
                ckpt.late_arrivals as i64,
                ckpt.trades_rejected as i64,
                ckpt.metrics_upserted as i64,
                ckpt.completed_at,
            ],
        )?;

        debug!(
            "Checkpoint saved: batch={}, watermark={:?}",
            ckpt.batch_id, ckpt.watermark
        );
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let ckpt = self
            .conn
            .query_row(
                "SELECT batch_id, watermark, trades_received, trades_enriched,
                        duplicates_skipped, late_arrivals, trades_rejected, metrics_upserted,
                        completed_at
                 FROM checkpoints ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(Checkpoint {
                        batch_id: row.get(0)?,
                        watermark: row.get(1)?,
                        trades_received: row.get::<_, i64>(2)? as usize,
                        trades_enriched: row.get::<_, i64>(3)? as usize,
                        duplicates_skipped: row.get::<_, i64>(4)? as usize,
                        late_arrivals: row.get::<_, i64>(5)? as usize,
                        trades_rejected: row.get::<_, i64>(6)? as usize,
                        metrics_upserted: row.get::<_, i64>(7)? as usize,
                        completed_at: row.get(8)?,
                    })
                },
            )
            .optional()?;

        match &ckpt {
            Some(c) => debug!("Loaded checkpoint: batch={}", c.batch_id),
            None => debug!("No checkpoint found"),
        }
        Ok(ckpt)
    }

    fn stats(&self) -> Result<StoreStats> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            enriched_trades: count("enriched_trades")?,
            daily_metrics: count("daily_metrics")?,
            checkpoints: count("checkpoints")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::enrich_trade;
    use crate::Position;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn enriched(id: &str, side: Side, qty: rust_decimal::Decimal) -> EnrichedTrade {
        let trade = Trade::new(
            id,
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            side,
            Money::new(qty),
            Money::new(dec!(185.25)),
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        )
        .unwrap()
        .with_venue("NASDAQ");
        let long = Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            Money::from_i64(100),
            Money::new(dec!(180.1234)),
        );
        enrich_trade(&trade, Some(&long)).unwrap()
    }

    fn metric(buy: i64) -> DailyMetric {
        DailyMetric {
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            account_id: AccountId::new("ACCT-001"),
            symbol: Symbol::new("AAPL"),
            buy_quantity: Money::from_i64(buy),
            sell_quantity: Money::ZERO,
            net_quantity: Money::from_i64(buy),
            total_notional: Money::from_i64(buy * 185),
            realized_pnl: Money::ZERO,
            trade_count: 1,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap(),
        }
    }

    fn exercise_store(store: &mut dyn PnlStore) {
        let t1 = enriched("TRD-0001", Side::Sell, dec!(40));
        let t2 = enriched("TRD-0002", Side::Buy, dec!(10.5));

        assert_eq!(store.append_enriched(&[t1.clone(), t2.clone()]).unwrap(), 2);
        assert_eq!(store.append_enriched(&[t1.clone()]).unwrap(), 0);

        let known = store.known_trade_ids(&["TRD-0001", "TRD-9999"]).unwrap();
        assert!(known.contains("TRD-0001"));
        assert_eq!(known.len(), 1);

        let keys: BTreeSet<_> = [t1.metric_key()].into_iter().collect();
        let history = store.enriched_for_keys(&keys).unwrap();
        assert_eq!(history, vec![t1, t2]);

        store.upsert_metrics(&[metric(100)]).unwrap();
        store.upsert_metrics(&[metric(250)]).unwrap();
        let metrics = store.load_metrics().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0], metric(250));

        assert_eq!(store.load_checkpoint().unwrap(), None);
        let ckpt = Checkpoint {
            batch_id: "abc".to_string(),
            watermark: Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
            trades_received: 3,
            trades_enriched: 2,
            duplicates_skipped: 0,
            late_arrivals: 1,
            trades_rejected: 1,
            metrics_upserted: 1,
            completed_at: Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap(),
        };
        store.save_checkpoint(&ckpt).unwrap();
        assert_eq!(store.load_checkpoint().unwrap(), Some(ckpt));

        assert_eq!(
            store.stats().unwrap(),
            StoreStats {
                enriched_trades: 2,
                daily_metrics: 1,
                checkpoints: 1
            }
        );
    }

    #[test]
    fn test_in_memory_store() {
        exercise_store(&mut InMemoryStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise_store(&mut SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_preserves_decimal_precision() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let t = enriched("TRD-0003", Side::Sell, dec!(12.345));
        store.append_enriched(&[t.clone()]).unwrap();

        let keys: BTreeSet<_> = [t.metric_key()].into_iter().collect();
        let loaded = store.enriched_for_keys(&keys).unwrap();
        assert_eq!(loaded[0].realized_pnl, t.realized_pnl);
        assert_eq!(loaded[0].average_cost_before, Some(Money::new(dec!(180.1234))));
        assert_eq!(loaded[0].trade.venue.as_deref(), Some("NASDAQ"));
    }
}
