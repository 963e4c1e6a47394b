//! Execution error taxonomy.
//!
//! `ExecutionError` covers everything that can go wrong for one account or one order and is
//! captured into that account's result. `BatchError` is reserved for whole-batch preconditions.

use stocksync_database::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Missing or invalid order fields; never reaches the brokerage
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// Explicit rejection by the brokerage, reason verbatim
    #[error("order rejected: {0}")]
    BrokerRejection(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    TransientExhausted { attempts: u32, last_error: String },

    /// Accepted by the brokerage but the order book could not confirm it
    #[error("order {order_id} accepted but unconfirmed: {reason}")]
    Unconfirmed { order_id: String, reason: String },

    #[error("no quote for {symbol}: {reason}")]
    QuoteUnavailable { symbol: String, reason: String },

    /// The brokerage filled the order but the ledger write failed
    #[error("order {order_id} filled but ledger update failed: {reason}")]
    Persistence { order_id: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Store(String),
}

impl ExecutionError {
    /// Stable code reported in per-account results
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::Validation(_) => "validation",
            ExecutionError::Auth(_) => "auth-failed",
            ExecutionError::BrokerRejection(_) => "broker-rejected",
            ExecutionError::TransientExhausted { .. } => "transient-failure-exhausted",
            ExecutionError::Unconfirmed { .. } => "unconfirmed",
            ExecutionError::QuoteUnavailable { .. } => "quote-unavailable",
            ExecutionError::Persistence { .. } => "ledger-out-of-sync",
            ExecutionError::NotFound(_) => "not-found",
            ExecutionError::Store(_) => "store-unavailable",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecutionError::NotFound(_))
    }

    /// `code: message` form used in result details
    pub fn detail(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

impl From<DatabaseError> for ExecutionError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => ExecutionError::NotFound(what),
            other => ExecutionError::Store(other.to_string()),
        }
    }
}

/// Failures that abort a whole batch before any account runs
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("no eligible accounts found: {0}")]
    NoEligibleAccounts(String),

    #[error("account store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),

    #[error("orchestrator misconfigured: {0}")]
    Configuration(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ExecutionError::TransientExhausted { attempts: 5, last_error: "timeout".into() }.code(),
            "transient-failure-exhausted"
        );
        assert_eq!(ExecutionError::BrokerRejection("x".into()).code(), "broker-rejected");
        assert_eq!(
            ExecutionError::Persistence { order_id: "1".into(), reason: "down".into() }.code(),
            "ledger-out-of-sync"
        );
    }

    #[test]
    fn detail_prefixes_code() {
        let err = ExecutionError::NotFound("no trades found".into());
        assert_eq!(err.detail(), "not-found: no trades found");
    }

    #[test]
    fn database_not_found_maps_to_not_found() {
        let err: ExecutionError = DatabaseError::NotFound("position".into()).into();
        assert!(err.is_not_found());

        let err: ExecutionError = DatabaseError::Connection("refused".into()).into();
        assert_eq!(err.code(), "store-unavailable");
    }
}
