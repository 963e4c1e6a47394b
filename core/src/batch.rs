//! Batch fan-out across the accounts of a teacher group.
//!
//! Accounts run concurrently, bounded by a semaphore and a shared deadline. Every account gets
//! exactly one result, in the order the accounts were selected, whatever happens to its task.
//! An account cut off by the deadline keeps the orders it finished, and any order the brokerage
//! accepted but the ledger never saw is raised for reconciliation.

use broker_connectors::BrokerConnector;
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use stocksync_database::{AccountRecord, AccountStore, InstrumentStore, PositionLedger};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::error::BatchError;
use crate::resolver::InstrumentResolver;
use crate::session::SessionManager;
use crate::types::{
    AccountResult, AccountStatus, BatchCommand, BatchCounts, BatchReport, BatchState,
    BatchStatus, Operation, ReconciliationItem,
};
use crate::workflow::{panic_message, AccountProgress, AccountRun, AccountWorkflow};

/// Runs batch commands against the configured brokerage and stores
pub struct BatchOrchestrator {
    accounts: Arc<dyn AccountStore>,
    workflow: AccountWorkflow,
    config: Arc<ExecutionConfig>,
}

/// Builder for BatchOrchestrator
#[derive(Default)]
pub struct BatchOrchestratorBuilder {
    connector: Option<Arc<dyn BrokerConnector>>,
    accounts: Option<Arc<dyn AccountStore>>,
    instruments: Option<Arc<dyn InstrumentStore>>,
    ledger: Option<Arc<dyn PositionLedger>>,
    config: ExecutionConfig,
}

impl BatchOrchestratorBuilder {
    pub fn connector(mut self, connector: Arc<dyn BrokerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn account_store(mut self, accounts: Arc<dyn AccountStore>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn instrument_store(mut self, instruments: Arc<dyn InstrumentStore>) -> Self {
        self.instruments = Some(instruments);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn PositionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<BatchOrchestrator, BatchError> {
        self.config.validate().map_err(BatchError::Configuration)?;

        let missing = |what: &str| BatchError::Configuration(format!("{what} is required"));
        let connector = self.connector.ok_or_else(|| missing("broker connector"))?;
        let accounts = self.accounts.ok_or_else(|| missing("account store"))?;
        let instruments = self.instruments.ok_or_else(|| missing("instrument store"))?;
        let ledger = self.ledger.ok_or_else(|| missing("position ledger"))?;

        let config = Arc::new(self.config);
        let workflow = AccountWorkflow::new(
            Arc::clone(&accounts),
            ledger,
            InstrumentResolver::new(instruments),
            SessionManager::new(connector),
            Arc::clone(&config),
        );

        Ok(BatchOrchestrator {
            accounts,
            workflow,
            config,
        })
    }
}

fn advance(state: &mut BatchState, next: BatchState) {
    debug_assert!(state.can_advance_to(next), "illegal batch transition {state:?} -> {next:?}");
    debug!(from = ?state, to = ?next, "batch state");
    *state = next;
}

fn summary(status: BatchStatus, exit: bool) -> &'static str {
    match status {
        BatchStatus::Success if exit => "exit orders placed",
        BatchStatus::Success => "orders placed",
        BatchStatus::Partial => "completed with failures",
        BatchStatus::NotFound => "no trades found",
        BatchStatus::Error => "all accounts failed",
    }
}

impl BatchOrchestrator {
    pub fn builder() -> BatchOrchestratorBuilder {
        BatchOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run `command` across its eligible accounts.
    ///
    /// Only whole-batch preconditions fail the call; account failures land in the report.
    #[instrument(skip_all, fields(command = command.name()))]
    pub async fn run(&self, command: BatchCommand) -> Result<BatchReport, BatchError> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut state = BatchState::Pending;

        advance(&mut state, BatchState::FetchingAccounts);
        let accounts = self.eligible_accounts(&command).await?;
        info!(%batch_id, accounts = accounts.len(), "batch started");

        advance(&mut state, BatchState::Dispatching);
        let operation = command.operation();
        let mut tasks = self.dispatch(&accounts, &operation);

        advance(&mut state, BatchState::Collecting);
        let mut slots: Vec<Option<AccountRun>> = vec![None; accounts.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, run)) => slots[index] = Some(run),
                Err(e) => error!(%batch_id, error = %e, "account task aborted"),
            }
        }

        let mut results = Vec::with_capacity(accounts.len());
        let mut reconciliation: Vec<ReconciliationItem> = Vec::new();
        for (slot, account) in slots.into_iter().zip(&accounts) {
            match slot {
                Some(run) => {
                    reconciliation.extend(run.reconciliation);
                    results.push(run.result);
                }
                None => results.push(AccountResult {
                    account_id: account.id,
                    name: Some(account.name.clone()),
                    status: AccountStatus::Error,
                    detail: Some("internal: account task did not report".to_string()),
                    instruments: Vec::new(),
                }),
            }
        }

        let counts = BatchCounts::tally(&results);
        let status = counts.status();
        let next = match status {
            BatchStatus::Success | BatchStatus::NotFound => BatchState::Completed,
            BatchStatus::Partial | BatchStatus::Error => BatchState::PartialFailure,
        };
        advance(&mut state, next);

        if !reconciliation.is_empty() {
            warn!(%batch_id, items = reconciliation.len(), "ledger reconciliation required");
        }
        info!(
            %batch_id,
            ?status,
            success = counts.success,
            partial = counts.partial,
            error = counts.error,
            not_found = counts.not_found,
            timed_out = counts.timed_out,
            "batch finished"
        );

        Ok(BatchReport {
            batch_id,
            command: command.name().to_string(),
            status,
            state,
            message: summary(status, operation.is_exit()).to_string(),
            counts,
            per_account_results: results,
            reconciliation_required: reconciliation,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn eligible_accounts(&self, command: &BatchCommand) -> Result<Vec<AccountRecord>, BatchError> {
        let candidates = match command {
            BatchCommand::Enter {
                teacher_id,
                only_teacher_execute,
                ..
            } => {
                let group = self.accounts.accounts_for_teacher(*teacher_id).await?;
                group
                    .into_iter()
                    .filter(|a| a.is_teacher_or_student_of(*teacher_id))
                    .filter(|a| !*only_teacher_execute || a.id == *teacher_id)
                    .collect()
            }
            BatchCommand::ExitPending { teacher_id }
            | BatchCommand::ExitSelected { teacher_id, .. } => {
                self.accounts.accounts_for_teacher(*teacher_id).await?
            }
            BatchCommand::ExitInstrument { account_id, .. }
            | BatchCommand::ExitAccount { account_id } => {
                self.accounts.account(*account_id).await?.into_iter().collect()
            }
        };

        let eligible: Vec<AccountRecord> = candidates
            .into_iter()
            .filter(|a| a.is_eligible(&self.config.broker))
            .collect();

        if eligible.is_empty() {
            return Err(BatchError::NoEligibleAccounts(format!(
                "{} has no connected, active, trading-enabled {} accounts",
                command.name(),
                self.config.broker
            )));
        }
        Ok(eligible)
    }

    fn dispatch(&self, accounts: &[AccountRecord], operation: &Operation) -> JoinSet<(usize, AccountRun)> {
        let deadline = Instant::now() + self.config.batch_timeout();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_accounts));
        let mut tasks = JoinSet::new();

        for (index, account) in accounts.iter().cloned().enumerate() {
            let workflow = self.workflow.clone();
            let operation = operation.clone();
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let progress = Mutex::new(AccountProgress::default());
                let work = async {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return AccountRun {
                                result: AccountResult {
                                    account_id: account.id,
                                    name: Some(account.name.clone()),
                                    status: AccountStatus::Error,
                                    detail: Some("internal: concurrency limiter closed".to_string()),
                                    instruments: Vec::new(),
                                },
                                reconciliation: Vec::new(),
                            };
                        }
                    };
                    match AssertUnwindSafe(workflow.run(&account, &operation, &progress))
                        .catch_unwind()
                        .await
                    {
                        Ok(run) => run,
                        Err(payload) => {
                            let message = panic_message(payload);
                            error!(account_id = account.id, panic = %message, "account task panicked");
                            let (instruments, reconciliation) = progress
                                .lock()
                                .drain(account.id, "workflow panicked before the fill was recorded");
                            AccountRun {
                                result: AccountResult {
                                    account_id: account.id,
                                    name: Some(account.name.clone()),
                                    status: AccountStatus::Error,
                                    detail: Some(format!("internal: workflow panicked: {message}")),
                                    instruments,
                                },
                                reconciliation,
                            }
                        }
                    }
                };

                let run = match tokio::time::timeout_at(deadline, work).await {
                    Ok(run) => run,
                    Err(_) => {
                        warn!(account_id = account.id, "account did not finish before the batch deadline");
                        let (instruments, reconciliation) = progress
                            .lock()
                            .drain(account.id, "batch deadline reached before the fill was recorded");
                        AccountRun {
                            result: AccountResult::timed_out(
                                account.id,
                                Some(account.name.clone()),
                                instruments,
                            ),
                            reconciliation,
                        }
                    }
                };
                (index, run)
            });
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries() {
        assert_eq!(summary(BatchStatus::Success, false), "orders placed");
        assert_eq!(summary(BatchStatus::Success, true), "exit orders placed");
        assert_eq!(summary(BatchStatus::NotFound, true), "no trades found");
        assert_eq!(summary(BatchStatus::Error, false), "all accounts failed");
    }

    #[test]
    fn builder_requires_every_seam() {
        let err = BatchOrchestrator::builder().build().err().unwrap();
        assert!(err.to_string().contains("broker connector is required"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = ExecutionConfig {
            max_concurrent_accounts: 0,
            ..Default::default()
        };
        let err = BatchOrchestrator::builder().config(config).build().err().unwrap();
        assert!(matches!(err, BatchError::Configuration(_)));
    }
}
