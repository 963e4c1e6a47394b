//! Scripted brokerage and in-memory stores shared by the batch tests.

#![allow(dead_code)]

use async_trait::async_trait;
use broker_connectors::{
    AuthReply, BrokerConnector, BrokerCredentials, BrokerError, BrokerResult,
    BrokerSession, Exchange, OrderParams, OrderRecord, OrderType, ProductType, TransactionSide,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stocksync_core::{BatchOrchestrator, EntryOrder, ExecutionConfig};
use stocksync_database::{
    AccountRecord, InstrumentRecord, MemoryAccountStore, MemoryInstrumentStore, MemoryLedger,
    PositionLedger,
};

pub const SYMBOL: &str = "XYZ25AUG100CE";
pub const PUT_SYMBOL: &str = "XYZ25AUG90PE";
pub const TOTP_SECRET: &str = "JBSWY3DPEHPK3PXP";

/// How the brokerage answers order placements for one client
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Accept with the given order id; order book reports it complete
    Accept(&'static str),
    /// Every placement times out
    Timeout,
    /// Accept, but the order book shows the order rejected
    RejectInBook(&'static str),
    /// Accept, but the order book takes 100 seconds to answer
    SlowLookup(&'static str),
    Panic,
}

#[derive(Default)]
pub struct Calls {
    pub logins: Mutex<HashMap<String, usize>>,
    pub placements: Mutex<Vec<(String, OrderParams)>>,
    pub terminations: Mutex<HashMap<String, usize>>,
}

impl Calls {
    pub fn logins(&self, client: &str) -> usize {
        self.logins.lock().get(client).copied().unwrap_or(0)
    }

    pub fn terminations(&self, client: &str) -> usize {
        self.terminations.lock().get(client).copied().unwrap_or(0)
    }

    pub fn placements_for(&self, client: &str) -> Vec<OrderParams> {
        self.placements
            .lock()
            .iter()
            .filter(|(c, _)| c == client)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn placement_count(&self) -> usize {
        self.placements.lock().len()
    }
}

pub struct ScriptedBroker {
    pub calls: Arc<Calls>,
    behaviours: HashMap<String, Behaviour>,
    price: Decimal,
}

impl ScriptedBroker {
    pub fn new(behaviours: &[(&str, Behaviour)]) -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            behaviours: behaviours
                .iter()
                .map(|(client, b)| (client.to_string(), b.clone()))
                .collect(),
            price: dec!(101.5),
        }
    }
}

impl BrokerConnector for ScriptedBroker {
    fn new_session(&self, credentials: &BrokerCredentials) -> Arc<dyn BrokerSession> {
        let behaviour = self
            .behaviours
            .get(&credentials.client_id)
            .cloned()
            .unwrap_or(Behaviour::Timeout);
        Arc::new(ScriptedSession {
            client: credentials.client_id.clone(),
            behaviour,
            calls: Arc::clone(&self.calls),
            price: self.price,
        })
    }
}

struct ScriptedSession {
    client: String,
    behaviour: Behaviour,
    calls: Arc<Calls>,
    price: Decimal,
}

#[async_trait]
impl BrokerSession for ScriptedSession {
    async fn authenticate(&self, client: &str, _: &str, _: &str) -> BrokerResult<AuthReply> {
        *self.calls.logins.lock().entry(client.to_string()).or_default() += 1;
        Ok(AuthReply::accepted())
    }

    async fn place_order(&self, params: &OrderParams) -> BrokerResult<Value> {
        self.calls
            .placements
            .lock()
            .push((self.client.clone(), params.clone()));
        match &self.behaviour {
            Behaviour::Accept(id) | Behaviour::RejectInBook(id) | Behaviour::SlowLookup(id) => {
                Ok(json!(id))
            }
            Behaviour::Timeout => Err(BrokerError::Timeout("placeOrder".into())),
            Behaviour::Panic => panic!("order router crashed"),
        }
    }

    async fn lookup_order(&self, order_id: &str) -> BrokerResult<Option<OrderRecord>> {
        if matches!(self.behaviour, Behaviour::SlowLookup(_)) {
            tokio::time::sleep(Duration::from_secs(100)).await;
        }
        let (status, text) = match &self.behaviour {
            Behaviour::RejectInBook(_) => ("rejected", Some("Insufficient margin".to_string())),
            _ => ("complete", None),
        };
        Ok(Some(OrderRecord {
            order_id: order_id.to_string(),
            unique_order_id: Some(format!("u-{order_id}")),
            status: status.to_string(),
            text,
        }))
    }

    async fn last_traded_price(&self, _: Exchange, _: &str, _: &str) -> BrokerResult<Decimal> {
        Ok(self.price)
    }

    async fn terminate(&self, client: &str) -> BrokerResult<()> {
        *self.calls.terminations.lock().entry(client.to_string()).or_default() += 1;
        Ok(())
    }
}

pub fn account(id: i64, name: &str, teacher_id: Option<i64>, lot_multiplier: i32) -> AccountRecord {
    AccountRecord {
        id,
        name: name.to_string(),
        teacher_id,
        broker_connected: true,
        active: true,
        trading_enabled: true,
        lot_multiplier,
        broker: "angel_one".to_string(),
    }
}

pub fn credentials(client: &str) -> BrokerCredentials {
    BrokerCredentials::new(client, "pw", TOTP_SECRET, "api-key")
}

/// Teacher T (id 1) with students S1 (id 2) and S2 (id 3), each trading two lots
pub fn teacher_group() -> MemoryAccountStore {
    let accounts = MemoryAccountStore::new();
    accounts.insert(account(1, "T", None, 2), Some(credentials("T")));
    accounts.insert(account(2, "S1", Some(1), 2), Some(credentials("S1")));
    accounts.insert(account(3, "S2", Some(1), 2), Some(credentials("S2")));
    accounts
}

pub fn instruments() -> MemoryInstrumentStore {
    let instruments = MemoryInstrumentStore::new();
    instruments.insert(InstrumentRecord {
        symbol: SYMBOL.to_string(),
        token: "54321".to_string(),
        lot_size: 25,
    });
    instruments.insert(InstrumentRecord {
        symbol: PUT_SYMBOL.to_string(),
        token: "54399".to_string(),
        lot_size: 50,
    });
    instruments
}

pub fn buy_call() -> EntryOrder {
    EntryOrder {
        instrument: SYMBOL.to_string(),
        side: TransactionSide::Buy,
        exchange: Exchange::Nfo,
        order_type: OrderType::Market,
        product_type: ProductType::Intraday,
    }
}

pub fn sell_put() -> EntryOrder {
    EntryOrder {
        instrument: PUT_SYMBOL.to_string(),
        side: TransactionSide::Sell,
        ..buy_call()
    }
}

pub fn unknown(symbol: &str) -> EntryOrder {
    EntryOrder {
        instrument: symbol.to_string(),
        ..buy_call()
    }
}

pub fn orchestrator(
    broker: &ScriptedBroker,
    accounts: MemoryAccountStore,
    ledger: Arc<dyn PositionLedger>,
    config: ExecutionConfig,
) -> BatchOrchestrator {
    let connector = ScriptedBroker {
        calls: Arc::clone(&broker.calls),
        behaviours: broker.behaviours.clone(),
        price: broker.price,
    };
    BatchOrchestrator::builder()
        .connector(Arc::new(connector))
        .account_store(Arc::new(accounts))
        .instrument_store(Arc::new(instruments()))
        .ledger(ledger)
        .config(config)
        .build()
        .expect("orchestrator")
}

pub fn memory_ledger() -> Arc<MemoryLedger> {
    Arc::new(MemoryLedger::new())
}
