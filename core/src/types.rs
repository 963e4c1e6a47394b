//! Batch commands and the structured results they produce.

use broker_connectors::{Exchange, OrderType, ProductType, TransactionSide};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use stocksync_database::{AccountId, AccountRecord, PositionFilter};
use uuid::Uuid;

use crate::error::ExecutionError;

/// One instrument to enter on every account of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOrder {
    pub instrument: String,
    pub side: TransactionSide,
    pub exchange: Exchange,
    pub order_type: OrderType,
    pub product_type: ProductType,
}

/// Operator command fanned out across accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum BatchCommand {
    /// Open positions on the teacher and its students
    Enter {
        teacher_id: AccountId,
        orders: Vec<EntryOrder>,
        /// Restrict the batch to the teacher's own account
        #[serde(default)]
        only_teacher_execute: bool,
    },
    /// Close every open position of the teacher group
    ExitPending { teacher_id: AccountId },
    /// Close one instrument on one account
    ExitInstrument {
        account_id: AccountId,
        symbol: String,
        #[serde(default)]
        token: Option<String>,
    },
    /// Close every open position of one account
    ExitAccount { account_id: AccountId },
    /// Close the listed instruments across the teacher group
    ExitSelected {
        teacher_id: AccountId,
        instruments: Vec<String>,
    },
}

impl BatchCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BatchCommand::Enter { .. } => "enter",
            BatchCommand::ExitPending { .. } => "exit-pending",
            BatchCommand::ExitInstrument { .. } => "exit-instrument",
            BatchCommand::ExitAccount { .. } => "exit-account",
            BatchCommand::ExitSelected { .. } => "exit-selected",
        }
    }

    /// Per-account operation this command runs
    pub fn operation(&self) -> Operation {
        match self {
            BatchCommand::Enter { orders, .. } => Operation::Enter(orders.clone()),
            BatchCommand::ExitPending { .. } | BatchCommand::ExitAccount { .. } => {
                Operation::Exit(PositionFilter::All)
            }
            BatchCommand::ExitInstrument { symbol, token, .. } => {
                Operation::Exit(PositionFilter::Instrument {
                    symbol: symbol.clone(),
                    token: token.clone(),
                })
            }
            BatchCommand::ExitSelected { instruments, .. } => {
                Operation::Exit(PositionFilter::Symbols {
                    symbols: instruments.clone(),
                })
            }
        }
    }
}

/// What a single account's workflow does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Enter(Vec<EntryOrder>),
    /// Close the open positions selected by the filter with opposite-side orders
    Exit(PositionFilter),
}

impl Operation {
    pub fn is_exit(&self) -> bool {
        matches!(self, Operation::Exit(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountStatus {
    Success,
    Partial,
    Error,
    NotFound,
    TimedOut,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Success => "success",
            AccountStatus::Partial => "partial",
            AccountStatus::Error => "error",
            AccountStatus::NotFound => "not-found",
            AccountStatus::TimedOut => "timed-out",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one order within an account's workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentOutcome {
    pub symbol: String,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InstrumentOutcome {
    pub fn succeeded(
        symbol: impl Into<String>,
        order_id: impl Into<String>,
        unique_order_id: Option<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            status: AccountStatus::Success,
            code: None,
            order_id: Some(order_id.into()),
            unique_order_id,
            message: None,
        }
    }

    pub fn failed(symbol: impl Into<String>, error: &ExecutionError) -> Self {
        let order_id = match error {
            ExecutionError::Unconfirmed { order_id, .. }
            | ExecutionError::Persistence { order_id, .. } => Some(order_id.clone()),
            _ => None,
        };
        Self {
            symbol: symbol.into(),
            status: if error.is_not_found() {
                AccountStatus::NotFound
            } else {
                AccountStatus::Error
            },
            code: Some(error.code().to_string()),
            order_id,
            unique_order_id: None,
            message: Some(error.detail()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AccountStatus::Success
    }
}

/// Per-account entry of a batch result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResult {
    pub account_id: AccountId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<InstrumentOutcome>,
}

impl AccountResult {
    /// Roll the order outcomes of an account up into one status
    pub fn from_outcomes(account: &AccountRecord, instruments: Vec<InstrumentOutcome>) -> Self {
        let total = instruments.len();
        let succeeded = instruments.iter().filter(|o| o.is_success()).count();
        let first_failure = instruments
            .iter()
            .find(|o| !o.is_success())
            .and_then(|o| o.message.clone());

        let (status, detail) = if total == 0 {
            (AccountStatus::NotFound, Some("not-found: no trades found".to_string()))
        } else if succeeded == total {
            (AccountStatus::Success, None)
        } else if succeeded > 0 {
            (
                AccountStatus::Partial,
                Some(format!("{} of {} orders failed", total - succeeded, total)),
            )
        } else if instruments.iter().all(|o| o.status == AccountStatus::NotFound) {
            (AccountStatus::NotFound, first_failure)
        } else {
            (AccountStatus::Error, first_failure)
        };

        Self {
            account_id: account.id,
            name: Some(account.name.clone()),
            status,
            detail,
            instruments,
        }
    }

    /// Account-level failure before any order was attempted
    pub fn failed(account_id: AccountId, name: Option<String>, error: &ExecutionError) -> Self {
        Self {
            account_id,
            name,
            status: if error.is_not_found() {
                AccountStatus::NotFound
            } else {
                AccountStatus::Error
            },
            detail: Some(error.detail()),
            instruments: Vec::new(),
        }
    }

    /// Cut off by the batch deadline; `instruments` holds whatever finished before it
    pub fn timed_out(
        account_id: AccountId,
        name: Option<String>,
        instruments: Vec<InstrumentOutcome>,
    ) -> Self {
        Self {
            account_id,
            name,
            status: AccountStatus::TimedOut,
            detail: Some("timed-out: batch deadline reached".to_string()),
            instruments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    Success,
    Partial,
    NotFound,
    Error,
}

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchState {
    Pending,
    FetchingAccounts,
    Dispatching,
    Collecting,
    Completed,
    PartialFailure,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Completed | BatchState::PartialFailure)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Pending, FetchingAccounts)
                | (FetchingAccounts, Dispatching)
                | (Dispatching, Collecting)
                | (Collecting, Completed)
                | (Collecting, PartialFailure)
        )
    }
}

/// A confirmed fill the ledger could not record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub account_id: AccountId,
    pub symbol: String,
    pub order_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub success: usize,
    pub partial: usize,
    pub error: usize,
    pub not_found: usize,
    pub timed_out: usize,
}

impl BatchCounts {
    pub fn tally(results: &[AccountResult]) -> Self {
        let mut counts = BatchCounts {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                AccountStatus::Success => counts.success += 1,
                AccountStatus::Partial => counts.partial += 1,
                AccountStatus::Error => counts.error += 1,
                AccountStatus::NotFound => counts.not_found += 1,
                AccountStatus::TimedOut => counts.timed_out += 1,
            }
        }
        counts
    }

    pub fn status(&self) -> BatchStatus {
        let failed = self.error + self.timed_out + self.partial;
        if self.not_found == self.total {
            BatchStatus::NotFound
        } else if failed == 0 {
            BatchStatus::Success
        } else if self.success + self.partial > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Error
        }
    }
}

/// Aggregate result of a batch command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub command: String,
    pub status: BatchStatus,
    pub state: BatchState,
    #[serde(rename = "msg")]
    pub message: String,
    pub counts: BatchCounts,
    pub per_account_results: Vec<AccountResult>,
    pub reconciliation_required: Vec<ReconciliationItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountRecord {
        AccountRecord {
            id: 3,
            name: "S1".into(),
            teacher_id: Some(1),
            broker_connected: true,
            active: true,
            trading_enabled: true,
            lot_multiplier: 2,
            broker: "angel_one".into(),
        }
    }

    fn result(status: AccountStatus) -> AccountResult {
        AccountResult {
            account_id: 1,
            name: None,
            status,
            detail: None,
            instruments: vec![],
        }
    }

    #[test]
    fn account_rollup() {
        let ok = InstrumentOutcome::succeeded("A", "1", None);
        let bad = InstrumentOutcome::failed("B", &ExecutionError::BrokerRejection("margin".into()));
        let missing = InstrumentOutcome::failed("C", &ExecutionError::NotFound("instrument C".into()));

        assert_eq!(AccountResult::from_outcomes(&account(), vec![ok.clone()]).status, AccountStatus::Success);
        assert_eq!(
            AccountResult::from_outcomes(&account(), vec![ok, bad.clone()]).status,
            AccountStatus::Partial
        );

        let failed = AccountResult::from_outcomes(&account(), vec![bad, missing.clone()]);
        assert_eq!(failed.status, AccountStatus::Error);
        assert_eq!(failed.detail.as_deref(), Some("broker-rejected: order rejected: margin"));

        assert_eq!(
            AccountResult::from_outcomes(&account(), vec![missing]).status,
            AccountStatus::NotFound
        );
    }

    #[test]
    fn batch_status_rules() {
        use AccountStatus::*;
        let status = |s: &[AccountStatus]| {
            BatchCounts::tally(&s.iter().map(|s| result(*s)).collect::<Vec<_>>()).status()
        };

        assert_eq!(status(&[Success, Success]), BatchStatus::Success);
        assert_eq!(status(&[Success, NotFound]), BatchStatus::Success);
        assert_eq!(status(&[NotFound, NotFound]), BatchStatus::NotFound);
        assert_eq!(status(&[Success, Error]), BatchStatus::Partial);
        assert_eq!(status(&[TimedOut, Error]), BatchStatus::Error);
        assert_eq!(status(&[Partial]), BatchStatus::Partial);
    }

    #[test]
    fn state_machine_edges() {
        assert!(BatchState::Pending.can_advance_to(BatchState::FetchingAccounts));
        assert!(BatchState::Collecting.can_advance_to(BatchState::PartialFailure));
        assert!(!BatchState::Pending.can_advance_to(BatchState::Collecting));
        assert!(!BatchState::Completed.can_advance_to(BatchState::Pending));
        assert!(BatchState::Completed.is_terminal());
    }

    #[test]
    fn commands_map_to_operations() {
        let command = BatchCommand::ExitSelected {
            teacher_id: 1,
            instruments: vec!["ABC".into()],
        };
        assert_eq!(command.name(), "exit-selected");
        assert!(command.operation().is_exit());

        let json = serde_json::json!({ "command": "exit-account", "account_id": 9 });
        let parsed: BatchCommand = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, BatchCommand::ExitAccount { account_id: 9 });
    }
}
