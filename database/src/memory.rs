//! In-process stores for paper runs and tests.

use async_trait::async_trait;
use broker_connectors::BrokerCredentials;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::DatabaseResult;
use crate::ledger;
use crate::store::{AccountStore, InstrumentStore, PositionLedger};
use crate::types::{
    AccountId, AccountRecord, FillRecord, InstrumentRecord, LedgerFill, PositionFilter,
    PositionRecord, SideClass,
};

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<AccountId, AccountRecord>,
    credentials: DashMap<AccountId, BrokerCredentials>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: AccountRecord, credentials: Option<BrokerCredentials>) {
        if let Some(credentials) = credentials {
            self.credentials.insert(account.id, credentials);
        }
        self.accounts.insert(account.id, account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn accounts_for_teacher(&self, teacher_id: AccountId) -> DatabaseResult<Vec<AccountRecord>> {
        let mut accounts: Vec<AccountRecord> = self
            .accounts
            .iter()
            .filter(|entry| entry.value().is_teacher_or_student_of(teacher_id))
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn account(&self, account_id: AccountId) -> DatabaseResult<Option<AccountRecord>> {
        Ok(self.accounts.get(&account_id).map(|a| a.value().clone()))
    }

    async fn credentials(&self, account_id: AccountId) -> DatabaseResult<Option<BrokerCredentials>> {
        Ok(self.credentials.get(&account_id).map(|c| c.value().clone()))
    }
}

#[derive(Default)]
pub struct MemoryInstrumentStore {
    instruments: DashMap<String, InstrumentRecord>,
}

impl MemoryInstrumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instrument: InstrumentRecord) {
        self.instruments.insert(instrument.symbol.clone(), instrument);
    }
}

#[async_trait]
impl InstrumentStore for MemoryInstrumentStore {
    async fn instrument(&self, symbol: &str) -> DatabaseResult<Option<InstrumentRecord>> {
        Ok(self.instruments.get(symbol).map(|i| i.value().clone()))
    }
}

type PositionKey = (AccountId, String, String, SideClass);

#[derive(Default)]
struct LedgerState {
    positions: BTreeMap<PositionKey, PositionRecord>,
    fills: Vec<FillRecord>,
}

/// Ledger held in memory; a single lock makes the fill append and position update atomic
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every position row including flat ones
    pub fn all_positions(&self) -> Vec<PositionRecord> {
        self.state.lock().positions.values().cloned().collect()
    }
}

#[async_trait]
impl PositionLedger for MemoryLedger {
    async fn record_fill(&self, fill: &LedgerFill) -> DatabaseResult<PositionRecord> {
        let now = Utc::now();
        let key = (
            fill.account_id,
            fill.instrument.symbol.clone(),
            fill.instrument.token.clone(),
            fill.side_class,
        );

        let mut state = self.state.lock();
        let position = ledger::apply_fill(state.positions.get(&key), fill, now)?;
        state.positions.insert(key, position.clone());
        state.fills.push(FillRecord::from_fill(fill, now));

        debug!(
            account_id = fill.account_id,
            symbol = %fill.instrument.symbol,
            quantity = position.quantity,
            "fill recorded in memory ledger"
        );
        Ok(position)
    }

    async fn open_positions(
        &self,
        account_id: AccountId,
        filter: &PositionFilter,
    ) -> DatabaseResult<Vec<PositionRecord>> {
        Ok(self
            .state
            .lock()
            .positions
            .values()
            .filter(|p| p.account_id == account_id && p.is_open() && filter.matches(p))
            .cloned()
            .collect())
    }

    async fn fills(&self, account_id: AccountId) -> DatabaseResult<Vec<FillRecord>> {
        Ok(self
            .state
            .lock()
            .fills
            .iter()
            .filter(|f| f.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FillKind, InstrumentKey, OrderMeta};
    use broker_connectors::{Exchange, OrderDuration, OrderType, ProductType, TransactionSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn entry(account_id: AccountId, symbol: &str, lots: u64, price: Decimal) -> LedgerFill {
        LedgerFill {
            account_id,
            instrument: InstrumentKey::new(symbol, "54321"),
            side_class: SideClass::Long,
            kind: FillKind::Entry,
            quantity: lots * 25,
            lots,
            price,
            order_id: format!("{symbol}-{lots}"),
            unique_order_id: Some("u-1".into()),
            meta: OrderMeta {
                exchange: Exchange::Nfo,
                order_type: OrderType::Market,
                product_type: ProductType::Intraday,
                duration: OrderDuration::Day,
            },
        }
    }

    #[tokio::test]
    async fn fill_then_read_round_trip() {
        let ledger = MemoryLedger::new();
        ledger.record_fill(&entry(1, "XYZ25AUG100CE", 2, dec!(100.10))).await.unwrap();
        ledger.record_fill(&entry(1, "XYZ25AUG100CE", 2, dec!(100.25))).await.unwrap();

        let open = ledger.open_positions(1, &PositionFilter::All).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].quantity, 100);
        assert_eq!(open[0].lots, 4);
        assert_eq!(open[0].average_price, dec!(100.18));
        assert_eq!(ledger.fills(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exit_appends_negative_fill_and_hides_flat_row() {
        let ledger = MemoryLedger::new();
        let open = ledger.record_fill(&entry(1, "ABC", 1, dec!(10))).await.unwrap();

        let exit = LedgerFill {
            kind: FillKind::Exit,
            quantity: open.open_quantity(),
            lots: open.open_lots(),
            order_id: "exit-1".into(),
            ..entry(1, "ABC", 1, dec!(10))
        };
        ledger.record_fill(&exit).await.unwrap();

        assert!(ledger.open_positions(1, &PositionFilter::All).await.unwrap().is_empty());
        assert_eq!(ledger.all_positions().len(), 1);

        let fills = ledger.fills(1).await.unwrap();
        assert_eq!(fills[1].quantity, -25);
        assert_eq!(fills[1].side, TransactionSide::Sell);
    }

    #[tokio::test]
    async fn failed_exit_leaves_ledger_untouched() {
        let ledger = MemoryLedger::new();
        let exit = LedgerFill {
            kind: FillKind::Exit,
            ..entry(1, "ABC", 1, dec!(10))
        };
        assert!(ledger.record_fill(&exit).await.is_err());
        assert!(ledger.fills(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn teacher_group_lookup() {
        let store = MemoryAccountStore::new();
        for (id, teacher) in [(1, None), (2, Some(1)), (3, Some(1)), (4, Some(9))] {
            store.insert(
                AccountRecord {
                    id,
                    name: format!("a{id}"),
                    teacher_id: teacher,
                    broker_connected: true,
                    active: true,
                    trading_enabled: true,
                    lot_multiplier: 1,
                    broker: "angel_one".into(),
                },
                None,
            );
        }

        let ids: Vec<_> = store
            .accounts_for_teacher(1)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(store.credentials(1).await.unwrap().is_none());
    }
}
