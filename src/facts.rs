//! Portfolio fact builder
//!
//! Rebuilds the daily P&L fact table and account summaries from the current
//! daily metrics and position snapshot. Both outputs are full refreshes: they
//! are pure views over their inputs and hold no state of their own.

use itertools::Itertools;
use tracing::info;

use crate::ledger::PositionLedger;
use crate::{
    AccountStatus, AccountSummary, DailyMetric, DailyPnlFact, Money, OverflowError, PnlStatus,
};

/// `numerator / denominator`, or `None` when the denominator is zero
pub fn safe_ratio(numerator: Money, denominator: Money) -> Option<Money> {
    if denominator.is_zero() {
        return None;
    }
    numerator.checked_div(denominator)
}

/// Percentage of winning positions, rounded to 2 dp.
/// `None` when there are no winning or losing positions.
pub fn win_rate_pct(profitable: usize, losing: usize) -> Option<f64> {
    let decided = Money::from_i64((profitable + losing) as i64);
    Money::from_i64(profitable as i64)
        .checked_mul(Money::from_i64(100))
        .and_then(|scaled| safe_ratio(scaled, decided))
        .map(|pct| pct.round_dp(2).to_f64())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PortfolioFactBuilder;

impl PortfolioFactBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Left join of daily metrics with current positions on (account, symbol).
    ///
    /// Every metric row is kept; position fields stay `None` when the ledger
    /// has no entry for the key.
    pub fn build_daily_facts<L>(
        &self,
        metrics: &[DailyMetric],
        ledger: &L,
    ) -> Result<Vec<DailyPnlFact>, OverflowError>
    where
        L: PositionLedger + ?Sized,
    {
        let facts = metrics
            .iter()
            .sorted_by_key(|m| m.key())
            .map(|metric| {
                let position = ledger.lookup(&metric.account_id, &metric.symbol);
                let unrealized_pnl = position.and_then(|p| p.unrealized_pnl());
                let total_pnl = metric
                    .realized_pnl
                    .checked_add(unrealized_pnl.unwrap_or(Money::ZERO))
                    .ok_or_else(|| OverflowError::new("total P&L", metric.key()))?;

                Ok(DailyPnlFact {
                    trade_date: metric.trade_date,
                    account_id: metric.account_id.clone(),
                    symbol: metric.symbol.clone(),
                    buy_quantity: metric.buy_quantity,
                    sell_quantity: metric.sell_quantity,
                    net_quantity: metric.net_quantity,
                    total_notional: metric.total_notional,
                    realized_pnl: metric.realized_pnl,
                    trade_count: metric.trade_count,
                    current_quantity: position.map(|p| p.quantity),
                    average_cost: position.and_then(|p| p.open_average_cost()),
                    current_market_value: position.and_then(|p| p.market_value),
                    unrealized_pnl,
                    sector: position.and_then(|p| p.sector.clone()),
                    asset_class: position.and_then(|p| p.asset_class.clone()),
                    total_pnl,
                    pnl_status: PnlStatus::classify(total_pnl),
                })
            })
            .collect::<Result<Vec<DailyPnlFact>, OverflowError>>()?;

        info!(
            "Built {} daily P&L facts ({} matched a position)",
            facts.len(),
            facts.iter().filter(|f| f.current_quantity.is_some()).count()
        );
        Ok(facts)
    }

    /// Roll daily facts up per account, ordered by account id.
    pub fn build_account_summaries(
        &self,
        facts: &[DailyPnlFact],
    ) -> Result<Vec<AccountSummary>, OverflowError> {
        let mut summaries = Vec::new();

        for (account_id, group) in &facts
            .iter()
            .sorted_by(|a, b| a.account_id.cmp(&b.account_id))
            .chunk_by(|f| f.account_id.clone())
        {
            let group: Vec<&DailyPnlFact> = group.collect();
            let overflow = |what| OverflowError::new(what, &account_id);

            let active_trading_days = group.iter().map(|f| f.trade_date).unique().count();
            let symbols_traded = group.iter().map(|f| f.symbol.clone()).unique().count();
            let total_trades = group.iter().map(|f| f.trade_count).sum();
            let total_volume = Money::checked_sum(group.iter().map(|f| f.total_notional))
                .ok_or_else(|| overflow("total volume"))?;
            let total_realized_pnl = Money::checked_sum(group.iter().map(|f| f.realized_pnl))
                .ok_or_else(|| overflow("total realized P&L"))?;
            // The same position is repeated on every day it traded; count it once.
            let total_unrealized_pnl = Money::checked_sum(
                group
                    .iter()
                    .unique_by(|f| f.symbol.clone())
                    .filter_map(|f| f.unrealized_pnl),
            )
            .ok_or_else(|| overflow("total unrealized P&L"))?;
            let total_pnl = total_realized_pnl
                .checked_add(total_unrealized_pnl)
                .ok_or_else(|| overflow("total P&L"))?;

            let profitable_positions = group
                .iter()
                .filter(|f| f.pnl_status == PnlStatus::Profit)
                .count();
            let losing_positions = group
                .iter()
                .filter(|f| f.pnl_status == PnlStatus::Loss)
                .count();

            let best_position_pnl = group
                .iter()
                .map(|f| f.total_pnl)
                .max()
                .unwrap_or(Money::ZERO);
            let worst_position_pnl = group
                .iter()
                .map(|f| f.total_pnl)
                .min()
                .unwrap_or(Money::ZERO);

            summaries.push(AccountSummary {
                account_id,
                active_trading_days,
                symbols_traded,
                total_trades,
                total_volume,
                avg_daily_volume: safe_ratio(
                    total_volume,
                    Money::from_i64(active_trading_days as i64),
                ),
                total_realized_pnl,
                total_unrealized_pnl,
                total_pnl,
                profitable_positions,
                losing_positions,
                win_rate_pct: win_rate_pct(profitable_positions, losing_positions),
                best_position_pnl,
                worst_position_pnl,
                account_status: AccountStatus::classify(total_pnl),
            });
        }

        info!("Built {} account summaries", summaries.len());
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionSnapshot;
    use crate::{AccountId, Position, Symbol};
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn metric(account: &str, symbol: &str, day: u32, realized: i64, notional: i64) -> DailyMetric {
        DailyMetric {
            trade_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            account_id: AccountId::new(account),
            symbol: Symbol::new(symbol),
            buy_quantity: Money::from_i64(10),
            sell_quantity: Money::ZERO,
            net_quantity: Money::from_i64(10),
            total_notional: Money::from_i64(notional),
            realized_pnl: Money::from_i64(realized),
            trade_count: 1,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_safe_ratio_guards_zero() {
        assert_eq!(safe_ratio(Money::from_i64(10), Money::ZERO), None);
        assert_eq!(
            safe_ratio(Money::from_i64(10), Money::from_i64(4)),
            Some(Money::new(dec!(2.5)))
        );
        assert_eq!(win_rate_pct(0, 0), None);
        assert_relative_eq!(win_rate_pct(2, 1).unwrap(), 66.67);
        assert_relative_eq!(win_rate_pct(1, 0).unwrap(), 100.0);
    }

    #[test]
    fn test_metric_without_position_is_kept() {
        let facts = PortfolioFactBuilder::new()
            .build_daily_facts(&[metric("ACCT-001", "NVDA", 15, 250, 1000)], &PositionSnapshot::new())
            .unwrap();

        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.unrealized_pnl, None);
        assert_eq!(fact.current_quantity, None);
        assert_eq!(fact.total_pnl, Money::from_i64(250));
        assert_eq!(fact.pnl_status, PnlStatus::Profit);
    }

    #[test]
    fn test_metric_joined_with_position() {
        let ledger = PositionSnapshot::from_positions(vec![Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            Money::from_i64(100),
            Money::from_i64(180),
        )
        .with_market_value(Money::from_i64(17_000))
        .with_classification("Technology", "EQUITY")]);

        let facts = PortfolioFactBuilder::new()
            .build_daily_facts(&[metric("ACCT-001", "AAPL", 15, 300, 1000)], &ledger)
            .unwrap();
        let fact = &facts[0];

        assert_eq!(fact.unrealized_pnl, Some(Money::from_i64(-1000)));
        assert_eq!(fact.total_pnl, Money::from_i64(-700));
        assert_eq!(fact.pnl_status, PnlStatus::Loss);
        assert_eq!(fact.average_cost, Some(Money::from_i64(180)));
        assert_eq!(fact.sector.as_deref(), Some("Technology"));
        assert_eq!(
            fact.total_pnl,
            fact.realized_pnl + fact.unrealized_pnl.unwrap_or(Money::ZERO)
        );
    }

    #[test]
    fn test_account_summary_rollup() {
        let ledger = PositionSnapshot::from_positions(vec![Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            Money::from_i64(100),
            Money::from_i64(180),
        )
        .with_unrealized_pnl(Money::from_i64(50))]);

        let metrics = vec![
            metric("ACCT-001", "AAPL", 15, 100, 1000),
            metric("ACCT-001", "AAPL", 16, -300, 3000),
            metric("ACCT-001", "MSFT", 16, 0, 2000),
            metric("ACCT-002", "JPM", 15, -40, 500),
        ];
        let builder = PortfolioFactBuilder::new();
        let facts = builder.build_daily_facts(&metrics, &ledger).unwrap();
        let summaries = builder.build_account_summaries(&facts).unwrap();

        assert_eq!(summaries.len(), 2);
        let acct1 = &summaries[0];
        assert_eq!(acct1.account_id, AccountId::new("ACCT-001"));
        assert_eq!(acct1.active_trading_days, 2);
        assert_eq!(acct1.symbols_traded, 2);
        assert_eq!(acct1.total_trades, 3);
        assert_eq!(acct1.total_volume, Money::from_i64(6000));
        assert_eq!(acct1.avg_daily_volume, Some(Money::from_i64(3000)));
        assert_eq!(acct1.total_realized_pnl, Money::from_i64(-200));
        // AAPL position counted once even though it appears on two days
        assert_eq!(acct1.total_unrealized_pnl, Money::from_i64(50));
        assert_eq!(acct1.total_pnl, Money::from_i64(-150));
        // facts: AAPL 15 = 150 (profit), AAPL 16 = -250 (loss), MSFT 16 = 0 (breakeven)
        assert_eq!(acct1.profitable_positions, 1);
        assert_eq!(acct1.losing_positions, 1);
        assert_relative_eq!(acct1.win_rate_pct.unwrap(), 50.0);
        assert_eq!(acct1.best_position_pnl, Money::from_i64(150));
        assert_eq!(acct1.worst_position_pnl, Money::from_i64(-250));
        assert_eq!(acct1.account_status, AccountStatus::Losing);

        let acct2 = &summaries[1];
        assert_eq!(acct2.total_pnl, Money::from_i64(-40));
        assert_relative_eq!(acct2.win_rate_pct.unwrap(), 0.0);
    }

    #[test]
    fn test_breakeven_only_account_has_no_win_rate() {
        let builder = PortfolioFactBuilder::new();
        let facts = builder.build_daily_facts(
            &[metric("ACCT-003", "PG", 15, 0, 800)],
            &PositionSnapshot::new(),
        )
        .unwrap();
        let summaries = builder.build_account_summaries(&facts).unwrap();

        assert_eq!(summaries[0].profitable_positions, 0);
        assert_eq!(summaries[0].losing_positions, 0);
        assert_eq!(summaries[0].win_rate_pct, None);
        assert_eq!(summaries[0].account_status, AccountStatus::Profitable);
    }

    #[test]
    fn test_no_facts_no_summaries() {
        assert!(PortfolioFactBuilder::new()
            .build_account_summaries(&[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_overflowing_totals_are_errors() {
        let ledger = PositionSnapshot::from_positions(vec![Position::new(
            AccountId::new("ACCT-001"),
            Symbol::new("AAPL"),
            Money::from_i64(100),
            Money::from_i64(180),
        )
        .with_unrealized_pnl(Money::new(rust_decimal::Decimal::MAX))]);
        let builder = PortfolioFactBuilder::new();

        let err = builder
            .build_daily_facts(&[metric("ACCT-001", "AAPL", 15, 1, 1000)], &ledger)
            .unwrap_err();
        assert_eq!(err.what, "total P&L");

        let mut big = metric("ACCT-002", "JPM", 15, 0, 0);
        big.total_notional = Money::new(rust_decimal::Decimal::MAX);
        let mut next_day = big.clone();
        next_day.trade_date = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let facts = builder
            .build_daily_facts(&[big, next_day], &PositionSnapshot::new())
            .unwrap();
        let err = builder.build_account_summaries(&facts).unwrap_err();
        assert_eq!(err.what, "total volume");
        assert!(err.context.contains("ACCT-002"));
    }
}
