//! Run command implementation

use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use trade_pnl_engine::data::{self, ACCOUNT_SUMMARY_FILE, DAILY_METRICS_FILE, DAILY_PNL_FACTS_FILE};
use trade_pnl_engine::ledger::PositionSnapshot;
use trade_pnl_engine::pipeline::{PnlPipeline, RunReport};
use trade_pnl_engine::store::{PnlStore, SqliteStore};
use trade_pnl_engine::{Money, TradeEnricher};
use tracing::info;

pub fn run(
    config_path: String,
    trades: Vec<String>,
    positions: Option<String>,
    db: Option<String>,
    output: Option<String>,
    resume: bool,
    sequential: bool,
) -> Result<()> {
    info!("Starting P&L run");

    let mut config = super::load_config(&config_path, positions, db, output)?;
    if !trades.is_empty() {
        config.inputs.trade_paths = trades;
    }
    if resume {
        config.processing.resume_from_checkpoint = true;
    }
    if sequential {
        config.processing.parallel = false;
    }

    if config.inputs.trade_paths.is_empty() {
        anyhow::bail!("No trade files given. Pass them as arguments or set inputs.trade_paths in the config");
    }

    let ledger =
        PositionSnapshot::from_positions(data::load_positions(&config.inputs.positions_path)?);
    info!("Position snapshot: {} positions", ledger.len());

    let store = SqliteStore::open(&config.storage.db_path)?;
    let mut pipeline = PnlPipeline::new(store, TradeEnricher::new(config.processing.parallel));

    let mut since = if config.processing.resume_from_checkpoint {
        let since = pipeline.resume_point()?;
        info!("Resuming after watermark: {:?}", since);
        since
    } else {
        None
    };

    let pb = ProgressBar::new(config.inputs.trade_paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} batches [{elapsed}] {msg}")?
            .progress_chars("█░ "),
    );

    let mut reports: Vec<(String, RunReport)> = Vec::new();
    for path in &config.inputs.trade_paths {
        pb.set_message(path.clone());
        let rows = data::load_trades(path)?;
        let report = pipeline.run_batch(rows, &ledger, since, Utc::now())?;
        if config.processing.resume_from_checkpoint {
            since = report.watermark;
        }
        reports.push((path.clone(), report));
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let metrics = pipeline.store().load_metrics()?;
    let (facts, summaries) = pipeline.build_facts(&ledger)?;

    let out_dir = &config.output.dir;
    data::write_csv(out_dir, DAILY_METRICS_FILE, &metrics)?;
    data::write_csv(out_dir, DAILY_PNL_FACTS_FILE, &facts)?;
    data::write_csv(out_dir, ACCOUNT_SUMMARY_FILE, &summaries)?;

    println!("\n{}", "=".repeat(72));
    println!("P&L RUN RESULTS");
    println!("{}", "=".repeat(72));
    println!(
        "{:<24} {:>8} {:>8} {:>6} {:>6} {:>8} {:>14}",
        "Batch", "Received", "Enriched", "Dups", "Late", "Rejected", "Realized P&L"
    );
    for (path, report) in &reports {
        println!(
            "{:<24} {:>8} {:>8} {:>6} {:>6} {:>8} {:>14}",
            path,
            report.trades_received,
            report.trades_enriched,
            report.duplicates_skipped,
            report.late_arrivals.len(),
            report.rejected.len(),
            format_pnl(report.realized_pnl)
        );
    }
    println!("{}", "-".repeat(72));

    let total_realized = reports
        .iter()
        .map(|(_, r)| r.realized_pnl)
        .collect::<Option<Vec<Money>>>()
        .and_then(Money::checked_sum);
    println!("Daily metrics:      {}", metrics.len());
    println!("P&L facts:          {}", facts.len());
    println!("Accounts:           {}", summaries.len());
    println!("Batch realized P&L: {}", format_pnl(total_realized));
    println!("Output directory:   {}", out_dir);

    let late: Vec<&String> = reports.iter().flat_map(|(_, r)| &r.late_arrivals).collect();
    if !late.is_empty() {
        println!("\nLate arrivals (at or before the previous watermark):");
        for trade_id in late {
            println!("  {}", trade_id);
        }
    }

    let rejected: Vec<_> = reports.iter().flat_map(|(_, r)| &r.rejected).collect();
    if !rejected.is_empty() {
        println!("\nRejected trades:");
        for err in rejected {
            println!("  {:<16} {}", err.trade_id(), err);
        }
    }
    println!("{}", "=".repeat(72));

    let stats = pipeline.store().stats()?;
    info!(
        "Run completed: {} enriched trades, {} metrics, {} checkpoints in store",
        stats.enriched_trades, stats.daily_metrics, stats.checkpoints
    );

    Ok(())
}

fn format_pnl(pnl: Option<Money>) -> String {
    match pnl {
        Some(pnl) => pnl.round_dp(2).to_string(),
        None => "overflow".to_string(),
    }
}
