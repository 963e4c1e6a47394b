//! StockSync CLI
//!
//! Runs one batch command and prints the batch report as JSON on stdout.

use anyhow::Result;
use clap::Parser;
use stocksync::app::{self, BrokerMode};
use stocksync::cli::Args;
use stocksync::config::AppConfig;
use stocksync::telemetry::init_tracing;
use stocksync_core::BatchCommand;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    let _guard = init_tracing(&args.log_level, &config.logging)?;

    let mode = if args.paper {
        BrokerMode::Paper
    } else {
        BrokerMode::Live
    };
    let command = BatchCommand::from(args.command);
    info!(
        version = stocksync::VERSION,
        command = command.name(),
        ?mode,
        broker_url = %config.broker.base_url,
        max_concurrent_accounts = config.execution.max_concurrent_accounts,
        "starting batch"
    );

    match app::run(&config, mode, command).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "batch failed");
            Err(e)
        }
    }
}
