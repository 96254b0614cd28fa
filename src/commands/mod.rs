//! Subcommand implementations

pub mod facts;
pub mod run;
pub mod status;

use anyhow::Result;
use trade_pnl_engine::Config;
use tracing::info;

/// Load configuration and apply CLI overrides on top of it
pub(crate) fn load_config(
    config_path: &str,
    positions: Option<String>,
    db: Option<String>,
    output: Option<String>,
) -> Result<Config> {
    let mut config = Config::load_or_default(config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(positions) = positions {
        info!("Overriding positions file to: {}", positions);
        config.inputs.positions_path = positions;
    }
    if let Some(db) = db {
        info!("Overriding database path to: {}", db);
        config.storage.db_path = db;
    }
    if let Some(output) = output {
        info!("Overriding output directory to: {}", output);
        config.output.dir = output;
    }

    Ok(config)
}
