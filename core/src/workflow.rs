//! The per-account workflow shared by every batch command.
//!
//! Entries and exits run the same sequence: plan the orders from reference data or the ledger,
//! load credentials, open one session, then for each order submit, confirm and record the fill.
//! Only the order planning and the side flip differ between operations.
//!
//! Progress is written to an [`AccountProgress`] owned by the caller, so a run cut short by the
//! batch deadline still reports its finished orders and the accepted orders it never recorded.

use broker_connectors::{BrokerSession, OrderParams};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use stocksync_database::{
    AccountId, AccountRecord, AccountStore, FillKind, InstrumentKey, InstrumentRecord, LedgerFill,
    OrderMeta, PositionFilter, PositionLedger, PositionRecord, SideClass,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::error::{ExecutionError, ExecutionResult};
use crate::resolver::InstrumentResolver;
use crate::session::{SessionGuard, SessionManager};
use crate::submitter::{order_quantity, OrderSubmitter, Placement, SubmissionReport};
use crate::types::{
    AccountResult, AccountStatus, EntryOrder, InstrumentOutcome, Operation, ReconciliationItem,
};

/// Everything one account's workflow needs, shared across the accounts of a batch
#[derive(Clone)]
pub struct AccountWorkflow {
    pub(crate) accounts: Arc<dyn AccountStore>,
    pub(crate) ledger: Arc<dyn PositionLedger>,
    pub(crate) resolver: InstrumentResolver,
    pub(crate) sessions: SessionManager,
    pub(crate) submitter: OrderSubmitter,
    pub(crate) config: Arc<ExecutionConfig>,
}

/// What one account's workflow produced
#[derive(Debug, Clone)]
pub struct AccountRun {
    pub result: AccountResult,
    pub reconciliation: Vec<ReconciliationItem>,
}

impl AccountRun {
    fn finished(result: AccountResult) -> Self {
        Self {
            result,
            reconciliation: Vec::new(),
        }
    }
}

/// Orders finished so far by one account, plus accepted orders whose fill is not recorded yet
#[derive(Debug, Default)]
pub struct AccountProgress {
    outcomes: Vec<InstrumentOutcome>,
    reconciliation: Vec<ReconciliationItem>,
    unrecorded: Vec<(String, String)>,
}

impl AccountProgress {
    fn accepted(&mut self, symbol: &str, order_id: &str) {
        self.unrecorded.push((symbol.to_string(), order_id.to_string()));
    }

    fn settled(&mut self, order_id: &str) {
        self.unrecorded.retain(|(_, id)| id != order_id);
    }

    /// Drain everything recorded so far. Orders still unrecorded become failed outcomes and
    /// reconciliation items carrying `reason`.
    pub fn drain(
        &mut self,
        account_id: AccountId,
        reason: &str,
    ) -> (Vec<InstrumentOutcome>, Vec<ReconciliationItem>) {
        for (symbol, order_id) in std::mem::take(&mut self.unrecorded) {
            let error = ExecutionError::Unconfirmed {
                order_id: order_id.clone(),
                reason: reason.to_string(),
            };
            error!(
                account_id,
                symbol = %symbol,
                order_id = %order_id,
                reconciliation_required = true,
                "accepted order was never recorded in the ledger"
            );
            self.outcomes.push(InstrumentOutcome::failed(&symbol, &error));
            self.reconciliation.push(ReconciliationItem {
                account_id,
                symbol,
                order_id,
                error: reason.to_string(),
            });
        }
        (
            std::mem::take(&mut self.outcomes),
            std::mem::take(&mut self.reconciliation),
        )
    }
}

enum PlannedOrder {
    Entry {
        order: EntryOrder,
        instrument: InstrumentRecord,
        quantity: u64,
        lots: u64,
    },
    Exit(PositionRecord),
}

impl PlannedOrder {
    fn symbol(&self) -> &str {
        match self {
            PlannedOrder::Entry { instrument, .. } => &instrument.symbol,
            PlannedOrder::Exit(position) => &position.symbol,
        }
    }
}

enum Step {
    Ready(PlannedOrder),
    Failed(InstrumentOutcome),
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl AccountWorkflow {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn PositionLedger>,
        resolver: InstrumentResolver,
        sessions: SessionManager,
        config: Arc<ExecutionConfig>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            resolver,
            sessions,
            submitter: OrderSubmitter::new(),
            config,
        }
    }

    /// Run `operation` for one account. Every failure ends up in the returned result.
    ///
    /// `progress` is updated as orders finish; it is what remains if this future is dropped.
    #[instrument(skip_all, fields(account_id = account.id, exit = operation.is_exit()))]
    pub async fn run(
        &self,
        account: &AccountRecord,
        operation: &Operation,
        progress: &Mutex<AccountProgress>,
    ) -> AccountRun {
        let steps = match self.plan(account, operation).await {
            Ok(steps) => steps,
            Err(e) => {
                info!(error = %e, "nothing to execute");
                return AccountRun::finished(AccountResult::failed(
                    account.id,
                    Some(account.name.clone()),
                    &e,
                ));
            }
        };

        if !steps.iter().any(|s| matches!(s, Step::Ready(_))) {
            let outcomes = steps
                .into_iter()
                .filter_map(|s| match s {
                    Step::Failed(outcome) => Some(outcome),
                    Step::Ready(_) => None,
                })
                .collect();
            return AccountRun::finished(AccountResult::from_outcomes(account, outcomes));
        }

        let credentials = match self.accounts.credentials(account.id).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                warn!("broker credentials not found");
                return AccountRun::finished(AccountResult::failed(
                    account.id,
                    Some(account.name.clone()),
                    &ExecutionError::NotFound("broker credentials not found".to_string()),
                ));
            }
            Err(e) => {
                return AccountRun::finished(AccountResult::failed(
                    account.id,
                    Some(account.name.clone()),
                    &ExecutionError::Store(e.to_string()),
                ));
            }
        };

        let guard = match self.sessions.acquire(&credentials).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "session could not be established");
                return AccountRun::finished(AccountResult::failed(
                    account.id,
                    Some(account.name.clone()),
                    &e,
                ));
            }
        };

        let executed = AssertUnwindSafe(self.execute(&guard, account, steps, progress))
            .catch_unwind()
            .await;
        guard.release().await;

        let panicked = executed.err().map(panic_message);
        let reason = match panicked {
            Some(_) => "workflow panicked before the fill was recorded",
            None => "run ended before the fill was recorded",
        };
        let (outcomes, reconciliation) = progress.lock().drain(account.id, reason);

        let result = match panicked {
            None => AccountResult::from_outcomes(account, outcomes),
            Some(message) => {
                error!(panic = %message, "account workflow panicked");
                AccountResult {
                    account_id: account.id,
                    name: Some(account.name.clone()),
                    status: AccountStatus::Error,
                    detail: Some(format!("internal: workflow panicked: {message}")),
                    instruments: outcomes,
                }
            }
        };

        AccountRun {
            result,
            reconciliation,
        }
    }

    async fn plan(&self, account: &AccountRecord, operation: &Operation) -> ExecutionResult<Vec<Step>> {
        match operation {
            Operation::Enter(orders) => {
                if orders.is_empty() {
                    return Err(ExecutionError::Validation("no orders to enter".to_string()));
                }
                let mut steps = Vec::with_capacity(orders.len());
                for order in orders {
                    steps.push(match self.plan_entry(account, order).await {
                        Ok(planned) => Step::Ready(planned),
                        Err(e) => Step::Failed(InstrumentOutcome::failed(&order.instrument, &e)),
                    });
                }
                Ok(steps)
            }
            Operation::Exit(filter) => {
                let positions = self.open_positions(account, filter).await?;
                Ok(positions
                    .into_iter()
                    .map(|p| Step::Ready(PlannedOrder::Exit(p)))
                    .collect())
            }
        }
    }

    async fn plan_entry(&self, account: &AccountRecord, order: &EntryOrder) -> ExecutionResult<PlannedOrder> {
        let instrument = self.resolver.resolve(&order.instrument).await?;
        let quantity = order_quantity(instrument.lot_size, account.lot_multiplier)?;
        Ok(PlannedOrder::Entry {
            order: order.clone(),
            lots: account.lot_multiplier.unsigned_abs().into(),
            instrument,
            quantity,
        })
    }

    async fn open_positions(
        &self,
        account: &AccountRecord,
        filter: &PositionFilter,
    ) -> ExecutionResult<Vec<PositionRecord>> {
        let positions = self
            .ledger
            .open_positions(account.id, filter)
            .await
            .map_err(|e| ExecutionError::Store(e.to_string()))?;

        if positions.is_empty() {
            return Err(ExecutionError::NotFound("no trades found".to_string()));
        }
        debug!(count = positions.len(), "open positions selected for exit");
        Ok(positions)
    }

    async fn execute(
        &self,
        guard: &SessionGuard,
        account: &AccountRecord,
        steps: Vec<Step>,
        progress: &Mutex<AccountProgress>,
    ) {
        let mut placed_any = false;
        for step in steps {
            let planned = match step {
                Step::Failed(outcome) => {
                    progress.lock().outcomes.push(outcome);
                    continue;
                }
                Step::Ready(planned) => planned,
            };

            if placed_any {
                tokio::time::sleep(self.config.inter_order_delay()).await;
            }
            placed_any = true;

            let symbol = planned.symbol().to_string();
            let outcome = match self.execute_one(guard, account, planned, progress).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(symbol = %symbol, code = e.code(), error = %e, "order failed");
                    InstrumentOutcome::failed(symbol, &e)
                }
            };
            progress.lock().outcomes.push(outcome);
        }
    }

    async fn execute_one(
        &self,
        guard: &SessionGuard,
        account: &AccountRecord,
        planned: PlannedOrder,
        progress: &Mutex<AccountProgress>,
    ) -> ExecutionResult<InstrumentOutcome> {
        let session = guard.session();

        let (params, fill) = match planned {
            PlannedOrder::Entry {
                order,
                instrument,
                quantity,
                lots,
            } => {
                let price = session
                    .last_traded_price(order.exchange, &instrument.symbol, &instrument.token)
                    .await
                    .map_err(|e| ExecutionError::QuoteUnavailable {
                        symbol: instrument.symbol.clone(),
                        reason: e.to_string(),
                    })?;

                let meta = OrderMeta {
                    exchange: order.exchange,
                    order_type: order.order_type,
                    product_type: order.product_type,
                    duration: self.config.entry_duration,
                };
                let params = OrderParams::normal(
                    &instrument.symbol,
                    &instrument.token,
                    order.side,
                    meta.exchange,
                    meta.order_type,
                    meta.product_type,
                    meta.duration,
                    Some(price),
                    quantity,
                );
                let fill = LedgerFill {
                    account_id: account.id,
                    instrument: InstrumentKey::from(&instrument),
                    side_class: SideClass::from_entry_side(order.side),
                    kind: FillKind::Entry,
                    quantity,
                    lots,
                    price,
                    order_id: String::new(),
                    unique_order_id: None,
                    meta,
                };
                (params, fill)
            }
            PlannedOrder::Exit(position) => {
                let params = OrderParams::normal(
                    &position.symbol,
                    &position.token,
                    position.exit_side(),
                    position.meta.exchange,
                    position.meta.order_type,
                    position.meta.product_type,
                    position.meta.duration,
                    Some(position.average_price),
                    position.open_quantity(),
                );
                let fill = LedgerFill {
                    account_id: account.id,
                    instrument: position.instrument(),
                    side_class: position.side_class,
                    kind: FillKind::Exit,
                    quantity: position.open_quantity(),
                    lots: position.open_lots(),
                    price: position.average_price,
                    order_id: String::new(),
                    unique_order_id: None,
                    meta: position.meta,
                };
                (params, fill)
            }
        };

        let policy = match fill.kind {
            FillKind::Entry => self.config.entry_policy(),
            FillKind::Exit => self.config.exit_policy(),
        };
        let placement = self.submitter.place(session, &params, &policy).await?;
        let order_id = placement.order_id.clone();
        progress.lock().accepted(&params.symbol, &order_id);

        let settled = self
            .confirm_and_record(session, &params, placement, fill, progress)
            .await;
        progress.lock().settled(&order_id);

        let report = settled?;
        Ok(InstrumentOutcome::succeeded(
            &params.symbol,
            report.order_id,
            report.unique_order_id,
        ))
    }

    async fn confirm_and_record(
        &self,
        session: &dyn BrokerSession,
        params: &OrderParams,
        placement: Placement,
        fill: LedgerFill,
        progress: &Mutex<AccountProgress>,
    ) -> ExecutionResult<SubmissionReport> {
        let report = self.submitter.confirm(session, params, placement).await?;
        let fill = LedgerFill {
            order_id: report.order_id.clone(),
            unique_order_id: report.unique_order_id.clone(),
            ..fill
        };
        self.record(&fill, progress).await?;
        Ok(report)
    }

    /// Write a confirmed fill. A failure here means the brokerage and the ledger disagree.
    async fn record(
        &self,
        fill: &LedgerFill,
        progress: &Mutex<AccountProgress>,
    ) -> ExecutionResult<()> {
        match self.ledger.record_fill(fill).await {
            Ok(position) => {
                debug!(
                    symbol = %fill.instrument.symbol,
                    order_id = %fill.order_id,
                    quantity = position.quantity,
                    average_price = %position.average_price,
                    "fill recorded"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    account_id = fill.account_id,
                    symbol = %fill.instrument.symbol,
                    order_id = %fill.order_id,
                    error = %e,
                    reconciliation_required = true,
                    "confirmed fill could not be written to the ledger"
                );
                progress.lock().reconciliation.push(ReconciliationItem {
                    account_id: fill.account_id,
                    symbol: fill.instrument.symbol.clone(),
                    order_id: fill.order_id.clone(),
                    error: e.to_string(),
                });
                Err(ExecutionError::Persistence {
                    order_id: fill.order_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drained_progress_raises_unrecorded_orders() {
        let mut progress = AccountProgress::default();
        progress.accepted("XYZ25AUG100CE", "501");
        progress.settled("501");
        progress
            .outcomes
            .push(InstrumentOutcome::succeeded("XYZ25AUG100CE", "501", None));
        progress.accepted("XYZ25AUG90PE", "502");

        let (outcomes, reconciliation) = progress.drain(7, "batch deadline reached");

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[1].code.as_deref(), Some("unconfirmed"));
        assert_eq!(outcomes[1].order_id.as_deref(), Some("502"));
        assert_eq!(
            reconciliation,
            vec![ReconciliationItem {
                account_id: 7,
                symbol: "XYZ25AUG90PE".into(),
                order_id: "502".into(),
                error: "batch deadline reached".into(),
            }]
        );

        let (outcomes, reconciliation) = progress.drain(7, "again");
        assert!(outcomes.is_empty() && reconciliation.is_empty());
    }
}
