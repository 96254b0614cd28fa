//! Daily metrics aggregation
//!
//! Folds enriched trades into one [`DailyMetric`] per
//! (trade_date, account_id, symbol). The aggregate for a key is always
//! recomputed from every enriched trade known for that key, never accumulated
//! from deltas, so replaying a batch cannot double count.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{DailyMetric, EnrichedTrade, MetricKey, Money, OverflowError, Side};

/// Keys touched by a set of enriched trades
pub fn affected_keys<'a>(trades: impl IntoIterator<Item = &'a EnrichedTrade>) -> BTreeSet<MetricKey> {
    trades.into_iter().map(EnrichedTrade::metric_key).collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAggregator;

impl MetricsAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate the given trades, one row per key, ordered by key.
    ///
    /// `trades` must hold the full history for every key it touches. Fails
    /// when a total for some key no longer fits the decimal range.
    pub fn aggregate(
        &self,
        trades: &[EnrichedTrade],
        updated_at: DateTime<Utc>,
    ) -> Result<Vec<DailyMetric>, OverflowError> {
        let mut groups: BTreeMap<MetricKey, DailyMetric> = BTreeMap::new();

        for enriched in trades {
            let key = enriched.metric_key();
            let metric = groups.entry(key).or_insert_with_key(|key| DailyMetric {
                trade_date: key.trade_date,
                account_id: key.account_id.clone(),
                symbol: key.symbol.clone(),
                buy_quantity: Money::ZERO,
                sell_quantity: Money::ZERO,
                net_quantity: Money::ZERO,
                total_notional: Money::ZERO,
                realized_pnl: Money::ZERO,
                trade_count: 0,
                updated_at,
            });

            let overflow = |what| OverflowError::new(what, &enriched.metric_key());
            match enriched.trade.side {
                Side::Buy => {
                    metric.buy_quantity = metric
                        .buy_quantity
                        .checked_add(enriched.trade.quantity)
                        .ok_or_else(|| overflow("buy quantity"))?;
                }
                Side::Sell => {
                    metric.sell_quantity = metric
                        .sell_quantity
                        .checked_add(enriched.trade.quantity)
                        .ok_or_else(|| overflow("sell quantity"))?;
                }
            }
            metric.total_notional = metric
                .total_notional
                .checked_add(enriched.notional_value)
                .ok_or_else(|| overflow("total notional"))?;
            metric.realized_pnl = metric
                .realized_pnl
                .checked_add(enriched.realized_pnl)
                .ok_or_else(|| overflow("realized P&L"))?;
            metric.trade_count += 1;
        }

        let metrics = groups
            .into_iter()
            .map(|(key, mut metric)| {
                metric.net_quantity = metric
                    .buy_quantity
                    .checked_sub(metric.sell_quantity)
                    .ok_or_else(|| OverflowError::new("net quantity", &key))?;
                Ok(metric)
            })
            .collect::<Result<Vec<DailyMetric>, OverflowError>>()?;

        debug!(
            "Aggregated {} trades into {} daily metrics",
            trades.len(),
            metrics.len()
        );
        Ok(metrics)
    }
}
