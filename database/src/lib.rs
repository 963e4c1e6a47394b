//! # Database Layer
//!
//! Accounts, instruments and the position ledger. Stores are exposed as async traits with a
//! Postgres implementation (sqlx) and an in-memory one for paper runs and tests.

pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::*;
pub use database::*;
pub use error::*;
pub use memory::{MemoryAccountStore, MemoryInstrumentStore, MemoryLedger};
pub use postgres::PgStore;
pub use store::*;
pub use types::*;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
