//! Incremental batch pipeline
//!
//! One run over a trade batch: enrich against the position snapshot, skip
//! trades already processed, append the rest, recompute the daily metrics for
//! every key the batch touched from the stored history, upsert them and record
//! a checkpoint. Replaying the same batch leaves the metrics unchanged.
//!
//! The checkpoint watermark only flags late arrivals: a trade executed at or
//! before it is still admitted when its id is new, since duplicate detection
//! is by `trade_id`, and its id is reported in [`RunReport::late_arrivals`].

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::aggregator::{affected_keys, MetricsAggregator};
use crate::enricher::TradeEnricher;
use crate::facts::PortfolioFactBuilder;
use crate::ledger::PositionLedger;
use crate::store::{Checkpoint, PnlStore};
use crate::{AccountSummary, DailyPnlFact, Money, TradeRow, ValidationError};

/// SHA-256 over the sorted, de-duplicated trade ids of a batch
pub fn batch_fingerprint<'a>(trade_ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = trade_ids.into_iter().map(str::trim).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Outcome of one batch run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub batch_id: String,
    pub trades_received: usize,
    pub trades_enriched: usize,
    pub closing_trades: usize,
    pub duplicates_skipped: usize,
    /// New trades executed at or before `since`, admitted anyway
    pub late_arrivals: Vec<String>,
    pub rejected: Vec<ValidationError>,
    pub metrics_upserted: usize,
    /// `None` if the batch total overflows the decimal range
    pub realized_pnl: Option<Money>,
    pub watermark: Option<DateTime<Utc>>,
}

pub struct PnlPipeline<S: PnlStore> {
    store: S,
    enricher: TradeEnricher,
    aggregator: MetricsAggregator,
    fact_builder: PortfolioFactBuilder,
}

impl<S: PnlStore> PnlPipeline<S> {
    pub fn new(store: S, enricher: TradeEnricher) -> Self {
        Self {
            store,
            enricher,
            aggregator: MetricsAggregator::new(),
            fact_builder: PortfolioFactBuilder::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Boundary for the next batch, taken from the last checkpoint
    pub fn resume_point(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.load_checkpoint()?.and_then(|c| c.watermark))
    }

    /// Process one batch of raw trade rows.
    ///
    /// `since` is the previous watermark: new trades at or before it are
    /// admitted and reported as late arrivals. `now` stamps the upserted
    /// metrics and the checkpoint.
    pub fn run_batch<L>(
        &mut self,
        rows: Vec<TradeRow>,
        ledger: &L,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RunReport>
    where
        L: PositionLedger + ?Sized,
    {
        let trades_received = rows.len();
        let batch_id = batch_fingerprint(rows.iter().map(|r| r.trade_id.as_str()));
        info!(
            "Processing batch {} ({} trades, since={:?})",
            &batch_id[..12],
            trades_received,
            since
        );

        let report = self.enricher.enrich_batch(rows, ledger);
        let rejected = report.rejected;
        let candidates = report.enriched;

        // Replayed trades still mark their keys, so a run interrupted between
        // append and upsert is repaired by delivering the batch again.
        let keys = affected_keys(&candidates);

        // At-least-once delivery: drop repeats inside the batch and trades
        // already stored by an earlier run.
        let ids: Vec<&str> = candidates.iter().map(|t| t.trade.trade_id.as_str()).collect();
        let stored = self.store.known_trade_ids(&ids)?;
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(candidates.len());
        let mut duplicates_skipped = 0;
        for enriched in candidates {
            if stored.contains(&enriched.trade.trade_id)
                || !seen.insert(enriched.trade.trade_id.clone())
            {
                debug!("Skipping duplicate trade {}", enriched.trade.trade_id);
                duplicates_skipped += 1;
                continue;
            }
            fresh.push(enriched);
        }

        let late_arrivals: Vec<String> = match since {
            Some(boundary) => fresh
                .iter()
                .filter(|t| t.trade.execution_timestamp <= boundary)
                .map(|t| t.trade.trade_id.clone())
                .collect(),
            None => Vec::new(),
        };
        if !late_arrivals.is_empty() {
            warn!(
                "{} trades executed at or before the watermark {:?}: {}",
                late_arrivals.len(),
                since,
                late_arrivals.join(", ")
            );
        }

        let inserted = self.store.append_enriched(&fresh)?;
        duplicates_skipped += fresh.len() - inserted;

        let metrics_upserted = if keys.is_empty() {
            0
        } else {
            let history = self.store.enriched_for_keys(&keys)?;
            let metrics = self.aggregator.aggregate(&history, now)?;
            self.store.upsert_metrics(&metrics)?;
            metrics.len()
        };

        let watermark = fresh
            .iter()
            .map(|t| t.trade.execution_timestamp)
            .max()
            .max(since);

        let run = RunReport {
            batch_id,
            trades_received,
            trades_enriched: inserted,
            closing_trades: fresh.iter().filter(|t| t.is_closing).count(),
            duplicates_skipped,
            late_arrivals,
            rejected,
            metrics_upserted,
            realized_pnl: Money::checked_sum(fresh.iter().map(|t| t.realized_pnl)),
            watermark,
        };

        self.store.save_checkpoint(&Checkpoint {
            batch_id: run.batch_id.clone(),
            watermark: run.watermark,
            trades_received: run.trades_received,
            trades_enriched: run.trades_enriched,
            duplicates_skipped: run.duplicates_skipped,
            late_arrivals: run.late_arrivals.len(),
            trades_rejected: run.rejected.len(),
            metrics_upserted: run.metrics_upserted,
            completed_at: now,
        })?;

        info!(
            "Batch complete: {} enriched, {} duplicates, {} late, {} rejected, {} metrics upserted, realized P&L {:?}",
            run.trades_enriched,
            run.duplicates_skipped,
            run.late_arrivals.len(),
            run.rejected.len(),
            run.metrics_upserted,
            run.realized_pnl
        );
        Ok(run)
    }

    /// Full refresh of daily facts and account summaries from stored metrics
    pub fn build_facts<L>(&self, ledger: &L) -> Result<(Vec<DailyPnlFact>, Vec<AccountSummary>)>
    where
        L: PositionLedger + ?Sized,
    {
        let metrics = self.store.load_metrics()?;
        let facts = self.fact_builder.build_daily_facts(&metrics, ledger)?;
        let summaries = self.fact_builder.build_account_summaries(&facts)?;
        Ok((facts, summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionSnapshot;
    use crate::store::InMemoryStore;
    use crate::{AccountId, Position, Symbol};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn row(id: &str, side: &str, qty: &str, price: &str, ts: &str) -> TradeRow {
        TradeRow {
            trade_id: id.to_string(),
            symbol: "AAPL".to_string(),
            side: side.to_string(),
            quantity: qty.to_string(),
            price: price.to_string(),
            execution_timestamp: ts.to_string(),
            account_id: "ACCT-001".to_string(),
            ..Default::default()
        }
    }

    fn ledger() -> PositionSnapshot {
        PositionSnapshot::from_positions(vec![Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            Money::from_i64(100),
            Money::from_i64(180),
        )])
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_order_and_repeats() {
        let a = batch_fingerprint(["T2", "T1", "T3"]);
        let b = batch_fingerprint(["T3", "T1", "T2", "T1"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, batch_fingerprint(["T1", "T2"]));
    }

    #[test]
    fn test_second_batch_recomputes_from_history() {
        let mut pipeline = PnlPipeline::new(InMemoryStore::new(), TradeEnricher::new(false));
        let ledger = ledger();

        let first = pipeline
            .run_batch(
                vec![row("T1", "SELL", "40", "185", "2024-01-15T10:00:00Z")],
                &ledger,
                None,
                now(),
            )
            .unwrap();
        assert_eq!(first.metrics_upserted, 1);

        let second = pipeline
            .run_batch(
                vec![row("T2", "BUY", "10", "186", "2024-01-15T11:00:00Z")],
                &ledger,
                None,
                now(),
            )
            .unwrap();
        assert_eq!(second.trades_enriched, 1);

        let metrics = pipeline.store().load_metrics().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].trade_count, 2);
        assert_eq!(metrics[0].realized_pnl, Money::from_i64(200));
        assert_eq!(metrics[0].net_quantity, Money::from_i64(-30));
    }

    #[test]
    fn test_duplicates_within_and_across_batches() {
        let mut pipeline = PnlPipeline::new(InMemoryStore::new(), TradeEnricher::default());
        let ledger = ledger();
        let t1 = row("T1", "SELL", "40", "185", "2024-01-15T10:00:00Z");

        let first = pipeline
            .run_batch(vec![t1.clone(), t1.clone()], &ledger, None, now())
            .unwrap();
        assert_eq!(first.trades_enriched, 1);
        assert_eq!(first.duplicates_skipped, 1);

        let replay = pipeline.run_batch(vec![t1], &ledger, None, now()).unwrap();
        assert_eq!(replay.trades_enriched, 0);
        assert_eq!(replay.duplicates_skipped, 1);
        assert_eq!(replay.metrics_upserted, 1);

        let metrics = pipeline.store().load_metrics().unwrap();
        assert_eq!(metrics[0].trade_count, 1);
        assert_eq!(metrics[0].realized_pnl, Money::new(dec!(200)));
    }

    #[test]
    fn test_late_arrivals_and_resume_point() {
        let mut pipeline = PnlPipeline::new(InMemoryStore::new(), TradeEnricher::default());
        let ledger = ledger();
        assert_eq!(pipeline.resume_point().unwrap(), None);

        pipeline
            .run_batch(
                vec![row("T1", "BUY", "5", "185", "2024-01-15T10:00:00Z")],
                &ledger,
                None,
                now(),
            )
            .unwrap();
        let since = pipeline.resume_point().unwrap();
        assert_eq!(since, Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()));

        let report = pipeline
            .run_batch(
                vec![
                    row("T0", "BUY", "5", "185", "2024-01-15T09:00:00Z"),
                    row("T2", "BUY", "5", "185", "2024-01-15T12:00:00Z"),
                ],
                &ledger,
                since,
                now(),
            )
            .unwrap();
        assert_eq!(report.late_arrivals, vec!["T0".to_string()]);
        assert_eq!(report.trades_enriched, 2);
        assert_eq!(
            report.watermark,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
        );
        let ckpt = pipeline.store().load_checkpoint().unwrap().unwrap();
        assert_eq!(ckpt.late_arrivals, 1);

        let metrics = pipeline.store().load_metrics().unwrap();
        assert_eq!(metrics[0].trade_count, 3);
    }

    #[test]
    fn test_trade_on_the_watermark_is_admitted() {
        let mut pipeline = PnlPipeline::new(InMemoryStore::new(), TradeEnricher::default());
        let ledger = ledger();

        pipeline
            .run_batch(
                vec![row("T1", "BUY", "5", "185", "2024-01-15T10:00:00Z")],
                &ledger,
                None,
                now(),
            )
            .unwrap();
        let since = pipeline.resume_point().unwrap();

        // same execution time as T1, delivered in the next batch
        let report = pipeline
            .run_batch(
                vec![
                    row("T1", "BUY", "5", "185", "2024-01-15T10:00:00Z"),
                    row("T2", "BUY", "7", "185", "2024-01-15T10:00:00Z"),
                ],
                &ledger,
                since,
                now(),
            )
            .unwrap();
        assert_eq!(report.trades_enriched, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.late_arrivals, vec!["T2".to_string()]);
        assert_eq!(report.watermark, since);

        let metrics = pipeline.store().load_metrics().unwrap();
        assert_eq!(metrics[0].trade_count, 2);
        assert_eq!(metrics[0].buy_quantity, Money::from_i64(12));
    }

    #[test]
    fn test_empty_batch_keeps_watermark() {
        let mut pipeline = PnlPipeline::new(InMemoryStore::new(), TradeEnricher::default());
        let since = Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
        let report = pipeline
            .run_batch(Vec::new(), &PositionSnapshot::new(), since, now())
            .unwrap();

        assert_eq!(report.trades_received, 0);
        assert_eq!(report.watermark, since);
        assert_eq!(pipeline.resume_point().unwrap(), since);
    }

    #[test]
    fn test_rejections_are_reported_not_stored() {
        let mut pipeline = PnlPipeline::new(InMemoryStore::new(), TradeEnricher::default());
        let report = pipeline
            .run_batch(
                vec![
                    row("T1", "BUY", "-5", "185", "2024-01-15T10:00:00Z"),
                    row("T2", "BUY", "5", "185", "not a time"),
                    row("T3", "BUY", "5", "185", "2024-01-15T10:00:00Z"),
                ],
                &ledger(),
                None,
                now(),
            )
            .unwrap();

        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.trades_enriched, 1);
        let ckpt = pipeline.store().load_checkpoint().unwrap().unwrap();
        assert_eq!(ckpt.trades_rejected, 2);
        assert_eq!(ckpt.trades_received, 3);
    }
}
