//! # StockSync
//!
//! Copy-trading execution for brokerage accounts: a teacher's entry or exit is fanned out to
//! every eligible student account, each through its own authenticated session, with the results
//! gathered into one structured batch report.
//!
//! The system is organized into crates:
//! - `broker-connectors`: brokerage sessions (Angel One SmartAPI, paper)
//! - `stocksync-database`: accounts, instruments and the position ledger
//! - `stocksync-core`: order submission, per-account workflow and batch orchestration
//!
//! This crate adds configuration, tracing setup and the command line.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod app;
pub mod cli;
pub mod config;
pub mod telemetry;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::app::BrokerMode;
    pub use crate::config::AppConfig;
    pub use stocksync_core::{BatchCommand, BatchOrchestrator, BatchReport, BatchStatus};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
