//! Store seams consumed by the execution core.

use async_trait::async_trait;
use broker_connectors::BrokerCredentials;

use crate::error::DatabaseResult;
use crate::types::{
    AccountId, AccountRecord, FillRecord, InstrumentRecord, LedgerFill, PositionFilter,
    PositionRecord,
};

/// Read access to accounts and their brokerage credentials
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The teacher account together with every account that names it as teacher, ordered by id
    async fn accounts_for_teacher(&self, teacher_id: AccountId) -> DatabaseResult<Vec<AccountRecord>>;

    async fn account(&self, account_id: AccountId) -> DatabaseResult<Option<AccountRecord>>;

    async fn credentials(&self, account_id: AccountId) -> DatabaseResult<Option<BrokerCredentials>>;
}

/// Read access to instrument reference data
#[async_trait]
pub trait InstrumentStore: Send + Sync {
    async fn instrument(&self, symbol: &str) -> DatabaseResult<Option<InstrumentRecord>>;
}

/// The position ledger: an append-only fill log plus one materialised row per position key
#[async_trait]
pub trait PositionLedger: Send + Sync {
    /// Append the fill and update its position in one transaction
    async fn record_fill(&self, fill: &LedgerFill) -> DatabaseResult<PositionRecord>;

    /// Non-flat positions of an account that match `filter`, ordered by symbol then side class
    async fn open_positions(
        &self,
        account_id: AccountId,
        filter: &PositionFilter,
    ) -> DatabaseResult<Vec<PositionRecord>>;

    /// Fill log of an account, oldest first
    async fn fills(&self, account_id: AccountId) -> DatabaseResult<Vec<FillRecord>>;
}
