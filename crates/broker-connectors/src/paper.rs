//! Paper trading connector with simulated acceptance.
//!
//! The `PaperConnector` never talks to a brokerage. It is useful for:
//! - Dry runs of a batch against the real ledger and account tables
//! - Exercising the orchestration flow end to end
//!
//! Every order is accepted with a twelve digit order id and reported as
//! `complete` on lookup. Quotes come from a configured price table.

use crate::credentials::BrokerCredentials;
use crate::{
    AuthReply, BrokerConnector, BrokerError, BrokerResult, BrokerSession, Exchange,
    OrderParams, OrderRecord,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const FIRST_ORDER_ID: u64 = 100_000_000_001;

struct PaperBook {
    prices: RwLock<HashMap<String, Decimal>>,
    fallback_price: Decimal,
    next_order_id: AtomicU64,
    orders: RwLock<HashMap<String, OrderRecord>>,
}

/// Paper connector; all sessions share one simulated order book.
#[derive(Clone)]
pub struct PaperConnector {
    book: Arc<PaperBook>,
}

impl PaperConnector {
    pub fn new(fallback_price: Decimal) -> Self {
        Self {
            book: Arc::new(PaperBook {
                prices: RwLock::new(HashMap::new()),
                fallback_price,
                next_order_id: AtomicU64::new(FIRST_ORDER_ID),
                orders: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Quote a fixed price for a symbol; symbols match case-insensitively
    pub fn with_price(self, symbol: impl AsRef<str>, price: Decimal) -> Self {
        self.book
            .prices
            .write()
            .insert(symbol.as_ref().to_ascii_uppercase(), price);
        self
    }

    /// Number of orders accepted so far
    pub fn order_count(&self) -> usize {
        self.book.orders.read().len()
    }
}

impl BrokerConnector for PaperConnector {
    fn new_session(&self, credentials: &BrokerCredentials) -> Arc<dyn BrokerSession> {
        Arc::new(PaperSession {
            book: Arc::clone(&self.book),
            client_id: credentials.client_id.clone(),
        })
    }
}

struct PaperSession {
    book: Arc<PaperBook>,
    client_id: String,
}

#[async_trait]
impl BrokerSession for PaperSession {
    async fn authenticate(
        &self,
        client_code: &str,
        _password: &str,
        one_time_code: &str,
    ) -> BrokerResult<AuthReply> {
        if one_time_code.len() != 6 {
            return Ok(AuthReply::refused("Invalid totp", Some("AB1050".to_string())));
        }
        debug!(client_code, "paper session authenticated");
        Ok(AuthReply::accepted())
    }

    async fn place_order(&self, params: &OrderParams) -> BrokerResult<Value> {
        if params.quantity == 0 {
            return Err(BrokerError::InvalidRequest("quantity must be positive".into()));
        }

        let order_id = self
            .book
            .next_order_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let record = OrderRecord {
            order_id: order_id.clone(),
            unique_order_id: Some(format!("paper-{}-{}", self.client_id, order_id)),
            status: "complete".to_string(),
            text: None,
        };
        self.book.orders.write().insert(order_id.clone(), record);

        info!(
            client_id = %self.client_id,
            symbol = %params.symbol,
            side = %params.side,
            quantity = params.quantity,
            order_id = %order_id,
            "paper order accepted"
        );
        Ok(Value::String(order_id))
    }

    async fn lookup_order(&self, order_id: &str) -> BrokerResult<Option<OrderRecord>> {
        Ok(self.book.orders.read().get(order_id).cloned())
    }

    async fn last_traded_price(
        &self,
        _exchange: Exchange,
        symbol: &str,
        _token: &str,
    ) -> BrokerResult<Decimal> {
        Ok(self
            .book
            .prices
            .read()
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .unwrap_or(self.book.fallback_price))
    }

    async fn terminate(&self, client_code: &str) -> BrokerResult<()> {
        debug!(client_code, "paper session terminated");
        Ok(())
    }
}
