//! Status command implementation

use anyhow::Result;
use trade_pnl_engine::store::{PnlStore, SqliteStore};
use tracing::info;

pub fn run(config_path: String, db: Option<String>) -> Result<()> {
    let config = super::load_config(&config_path, None, db, None)?;
    let store = SqliteStore::open(&config.storage.db_path)?;
    let stats = store.stats()?;

    println!("\n{}", "=".repeat(60));
    println!("STORE STATUS: {}", config.storage.db_path);
    println!("{}", "=".repeat(60));
    println!("Enriched trades:    {}", stats.enriched_trades);
    println!("Daily metrics:      {}", stats.daily_metrics);
    println!("Batches processed:  {}", stats.checkpoints);

    match store.load_checkpoint()? {
        Some(ckpt) => {
            println!("{}", "-".repeat(60));
            println!("Last batch:         {}", ckpt.batch_id);
            println!("Completed at:       {}", ckpt.completed_at);
            match ckpt.watermark {
                Some(w) => println!("Watermark:          {}", w),
                None => println!("Watermark:          -"),
            }
            println!("Received:           {}", ckpt.trades_received);
            println!("Enriched:           {}", ckpt.trades_enriched);
            println!("Duplicates skipped: {}", ckpt.duplicates_skipped);
            println!("Late arrivals:      {}", ckpt.late_arrivals);
            println!("Rejected:           {}", ckpt.trades_rejected);
            println!("Metrics upserted:   {}", ckpt.metrics_upserted);
        }
        None => println!("No batches processed yet"),
    }
    println!("{}", "=".repeat(60));

    info!("Status reported for {}", config.storage.db_path);
    Ok(())
}
