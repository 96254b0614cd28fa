//! Trade enrichment
//!
//! Joins each new trade against the position snapshot to derive notional
//! value, the closing flag and realized P&L. This is the single shared
//! implementation used by every call site (CLI batches, pipeline runs, tests).
//!
//! # Realized P&L convention
//!
//! ```text
//! SELL vs long : (price - avg_cost) * min(qty, position_qty)
//! BUY  vs short: (avg_cost - price) * min(qty, |position_qty|)
//! otherwise    : 0
//! ```
//!
//! Only the portion of the trade that closes existing exposure is priced.
//! Any excess quantity (which in practice opens a position in the opposite
//! direction) contributes nothing here.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ledger::PositionLedger;
use crate::{EnrichedTrade, Money, Position, Side, Trade, TradeRow, ValidationError};

/// Realized P&L and closing flag for one trade against a position.
///
/// An absent or flat position is never closed by a trade. Returns `None`
/// when the P&L does not fit the decimal range.
pub fn calculate_realized_pnl(
    side: Side,
    quantity: Money,
    price: Money,
    position: Option<&Position>,
) -> Option<(Money, bool)> {
    let Some(position) = position else {
        return Some((Money::ZERO, false));
    };

    match side {
        Side::Sell if position.is_long() => {
            let closing_qty = quantity.min(position.quantity);
            let pnl = price
                .checked_sub(position.average_cost)?
                .checked_mul(closing_qty)?;
            Some((pnl, true))
        }
        Side::Buy if position.is_short() => {
            let closing_qty = quantity.min(position.quantity.abs());
            let pnl = position
                .average_cost
                .checked_sub(price)?
                .checked_mul(closing_qty)?;
            Some((pnl, true))
        }
        _ => Some((Money::ZERO, false)),
    }
}

/// Enrich a single validated trade. Pure: the position is only read.
///
/// Fails with [`ValidationError::Overflow`] when the notional or realized P&L
/// falls outside the decimal range.
pub fn enrich_trade(
    trade: &Trade,
    position: Option<&Position>,
) -> Result<EnrichedTrade, ValidationError> {
    let overflow = || ValidationError::Overflow {
        trade_id: trade.trade_id.clone(),
    };
    let notional_value = trade.quantity.checked_mul(trade.price).ok_or_else(overflow)?;
    let (realized_pnl, is_closing) =
        calculate_realized_pnl(trade.side, trade.quantity, trade.price, position)
            .ok_or_else(overflow)?;

    Ok(EnrichedTrade {
        trade: trade.clone(),
        notional_value,
        position_quantity_before: position.map(|p| p.quantity),
        average_cost_before: position.and_then(Position::open_average_cost),
        realized_pnl,
        is_closing,
    })
}

/// Outcome of enriching one batch: accepted records plus every rejection
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentReport {
    pub enriched: Vec<EnrichedTrade>,
    pub rejected: Vec<ValidationError>,
}

impl EnrichmentReport {
    pub fn total(&self) -> usize {
        self.enriched.len() + self.rejected.len()
    }

    pub fn closing_trades(&self) -> usize {
        self.enriched.iter().filter(|t| t.is_closing).count()
    }

    /// Total realized P&L of the batch, `None` if the sum overflows
    pub fn realized_pnl(&self) -> Option<Money> {
        Money::checked_sum(self.enriched.iter().map(|t| t.realized_pnl))
    }
}

/// Batch enricher.
///
/// Trades in a batch are independent of each other because they are all
/// evaluated against the same fixed snapshot, so the batch can be split
/// across threads without changing the result.
#[derive(Debug, Clone, Copy)]
pub struct TradeEnricher {
    parallel: bool,
}

impl Default for TradeEnricher {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl TradeEnricher {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Validate and enrich raw feed rows
    pub fn enrich_batch<L>(&self, rows: Vec<TradeRow>, ledger: &L) -> EnrichmentReport
    where
        L: PositionLedger + ?Sized,
    {
        let process = |row: TradeRow| -> Result<EnrichedTrade, ValidationError> {
            let trade = Trade::try_from(row)?;
            enrich_trade(&trade, ledger.lookup(&trade.account_id, &trade.symbol))
        };

        let results: Vec<_> = if self.parallel {
            rows.into_par_iter().map(process).collect()
        } else {
            rows.into_iter().map(process).collect()
        };

        Self::into_report(results)
    }

    /// Enrich trades that were constructed in code; they are re-validated
    /// since their fields are public.
    pub fn enrich_trades<L>(&self, trades: &[Trade], ledger: &L) -> EnrichmentReport
    where
        L: PositionLedger + ?Sized,
    {
        let process = |trade: &Trade| -> Result<EnrichedTrade, ValidationError> {
            trade.validate()?;
            enrich_trade(trade, ledger.lookup(&trade.account_id, &trade.symbol))
        };

        let results: Vec<_> = if self.parallel {
            trades.par_iter().map(process).collect()
        } else {
            trades.iter().map(process).collect()
        };

        Self::into_report(results)
    }

    fn into_report(results: Vec<Result<EnrichedTrade, ValidationError>>) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();
        for result in results {
            match result {
                Ok(enriched) => {
                    debug!(
                        "Enriched {} {} {} {} @ {} | closing={} pnl={}",
                        enriched.trade.trade_id,
                        enriched.trade.side,
                        enriched.trade.quantity,
                        enriched.trade.symbol,
                        enriched.trade.price,
                        enriched.is_closing,
                        enriched.realized_pnl
                    );
                    report.enriched.push(enriched);
                }
                Err(err) => {
                    warn!("Rejected trade {}: {}", err.trade_id(), err);
                    report.rejected.push(err);
                }
            }
        }

        report.enriched.sort_by(|a, b| {
            a.trade
                .execution_timestamp
                .cmp(&b.trade.execution_timestamp)
                .then_with(|| a.trade.trade_id.cmp(&b.trade.trade_id))
        });

        info!(
            "Enrichment complete: {} enriched ({} closing), {} rejected",
            report.enriched.len(),
            report.closing_trades(),
            report.rejected.len()
        );
        report
    }
}
