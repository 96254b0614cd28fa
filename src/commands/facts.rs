//! Facts command implementation

use anyhow::Result;
use trade_pnl_engine::data::{self, ACCOUNT_SUMMARY_FILE, DAILY_PNL_FACTS_FILE};
use trade_pnl_engine::ledger::PositionSnapshot;
use trade_pnl_engine::pipeline::PnlPipeline;
use trade_pnl_engine::store::SqliteStore;
use trade_pnl_engine::TradeEnricher;
use tracing::info;

pub fn run(
    config_path: String,
    positions: Option<String>,
    db: Option<String>,
    output: Option<String>,
) -> Result<()> {
    info!("Rebuilding P&L facts");

    let config = super::load_config(&config_path, positions, db, output)?;
    let ledger =
        PositionSnapshot::from_positions(data::load_positions(&config.inputs.positions_path)?);
    let store = SqliteStore::open(&config.storage.db_path)?;
    let pipeline = PnlPipeline::new(store, TradeEnricher::default());

    let (facts, summaries) = pipeline.build_facts(&ledger)?;
    data::write_csv(&config.output.dir, DAILY_PNL_FACTS_FILE, &facts)?;
    data::write_csv(&config.output.dir, ACCOUNT_SUMMARY_FILE, &summaries)?;

    println!("\n{}", "=".repeat(96));
    println!("ACCOUNT SUMMARY");
    println!("{}", "=".repeat(96));
    println!(
        "{:<14} {:>5} {:>7} {:>7} {:>14} {:>14} {:>14} {:>8} {:<10}",
        "Account", "Days", "Symbols", "Trades", "Realized", "Unrealized", "Total", "Win %", "Status"
    );
    for s in &summaries {
        let win_rate = s
            .win_rate_pct
            .map(|w| format!("{:.2}", w))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<14} {:>5} {:>7} {:>7} {:>14} {:>14} {:>14} {:>8} {:<10}",
            s.account_id,
            s.active_trading_days,
            s.symbols_traded,
            s.total_trades,
            s.total_realized_pnl.round_dp(2),
            s.total_unrealized_pnl.round_dp(2),
            s.total_pnl.round_dp(2),
            win_rate,
            s.account_status
        );
    }
    println!("{}", "=".repeat(96));

    info!(
        "Facts rebuilt: {} daily facts, {} accounts",
        facts.len(),
        summaries.len()
    );
    Ok(())
}
