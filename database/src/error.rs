//! Database error types
//!
//! This module provides error types for the account, instrument and ledger stores.

use thiserror::Error;

/// Database-related errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A fill that cannot be applied to the current position
    #[error("Ledger conflict: {0}")]
    Conflict(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Type alias for database results
pub type DatabaseResult<T> = Result<T, DatabaseError>;
