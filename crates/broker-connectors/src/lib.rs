//! Broker Connectors for StockSync
//!
//! This crate provides brokerage session connectors for:
//! - Angel One SmartAPI REST (live trading)
//! - Paper trading (accepts every order, quotes configured prices)
//!
//! Every connector hands out per-account `BrokerSession`s. A session is created
//! unauthenticated, authenticated with a one-time code, used for a handful of
//! calls and then terminated.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub mod credentials;
pub mod paper;
pub mod smartapi;
pub mod totp;

pub use credentials::BrokerCredentials;

/// Broker connector error types
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Broker API error: {code} - {message}")]
    Api { code: String, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Whether the failure happened on the wire rather than in the broker's business logic
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_) | BrokerError::Timeout(_) | BrokerError::MalformedResponse(_)
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Declares a broker wire enum: upper-case string form, `Display`, `FromStr` and serde.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = BrokerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($wire => Ok($name::$variant),)+
                    other => Err(BrokerError::InvalidRequest(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum! {
    /// Order side enumeration
    TransactionSide {
        Buy => "BUY",
        Sell => "SELL",
    }
}

impl TransactionSide {
    /// The side that unwinds a fill on this side
    pub fn opposite(&self) -> Self {
        match self {
            TransactionSide::Buy => TransactionSide::Sell,
            TransactionSide::Sell => TransactionSide::Buy,
        }
    }
}

wire_enum! {
    /// Exchange segments accepted by the brokerage
    Exchange {
        Nse => "NSE",
        Bse => "BSE",
        Nfo => "NFO",
        Bfo => "BFO",
        Mcx => "MCX",
        Cds => "CDS",
    }
}

wire_enum! {
    /// Order type enumeration
    OrderType {
        Market => "MARKET",
        Limit => "LIMIT",
        StoplossLimit => "STOPLOSS_LIMIT",
        StoplossMarket => "STOPLOSS_MARKET",
    }
}

impl OrderType {
    /// Limit-style orders need an explicit price
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StoplossLimit)
    }
}

wire_enum! {
    /// Product (settlement) type
    ProductType {
        /// Intraday margin product
        Intraday => "INTRADAY",
        Carryforward => "CARRYFORWARD",
        Delivery => "DELIVERY",
        Margin => "MARGIN",
        Bo => "BO",
        Co => "CO",
    }
}

wire_enum! {
    /// Order validity
    OrderDuration {
        Day => "DAY",
        Ioc => "IOC",
    }
}

/// Order parameters in the shape the brokerage expects on the wire
#[derive(Debug, Clone, Serialize)]
pub struct OrderParams {
    pub variety: String,
    #[serde(rename = "tradingsymbol")]
    pub symbol: String,
    #[serde(rename = "symboltoken")]
    pub token: String,
    #[serde(rename = "transactiontype")]
    pub side: TransactionSide,
    pub exchange: Exchange,
    #[serde(rename = "ordertype")]
    pub order_type: OrderType,
    #[serde(rename = "producttype")]
    pub product_type: ProductType,
    pub duration: OrderDuration,
    #[serde(serialize_with = "as_string")]
    pub price: Decimal,
    pub squareoff: String,
    pub stoploss: String,
    #[serde(serialize_with = "as_string")]
    pub quantity: u64,
}

impl OrderParams {
    /// Regular (non bracket/cover) order variety
    pub const VARIETY_NORMAL: &'static str = "NORMAL";

    #[allow(clippy::too_many_arguments)]
    pub fn normal(
        symbol: impl Into<String>,
        token: impl Into<String>,
        side: TransactionSide,
        exchange: Exchange,
        order_type: OrderType,
        product_type: ProductType,
        duration: OrderDuration,
        price: Option<Decimal>,
        quantity: u64,
    ) -> Self {
        Self {
            variety: Self::VARIETY_NORMAL.to_string(),
            symbol: symbol.into(),
            token: token.into(),
            side,
            exchange,
            order_type,
            product_type,
            duration,
            price: price.unwrap_or(Decimal::ZERO),
            squareoff: "0".to_string(),
            stoploss: "0".to_string(),
            quantity,
        }
    }
}

fn as_string<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: fmt::Display,
{
    serializer.collect_str(value)
}

/// Outcome of a session authentication call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub success: bool,
    pub message: String,
    pub error_code: Option<String>,
}

impl AuthReply {
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: "SUCCESS".to_string(),
            error_code: None,
        }
    }

    pub fn refused(message: impl Into<String>, error_code: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_code,
        }
    }
}

/// Order as reported by the brokerage order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub unique_order_id: Option<String>,
    pub status: String,
    /// Free-text reason the brokerage attaches to rejected orders
    pub text: Option<String>,
}

impl OrderRecord {
    pub fn is_rejected(&self) -> bool {
        self.status.eq_ignore_ascii_case("rejected")
    }

    /// Rejection reason, defaulting when the brokerage leaves it blank
    pub fn rejection_reason(&self) -> String {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("No reason provided")
            .to_string()
    }
}

/// One authenticated conversation with the brokerage on behalf of one account.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Exchange client id, password and one-time code for a session token
    async fn authenticate(
        &self,
        client_code: &str,
        password: &str,
        one_time_code: &str,
    ) -> BrokerResult<AuthReply>;

    /// Place an order. The payload is returned untouched: callers classify it.
    async fn place_order(&self, params: &OrderParams) -> BrokerResult<serde_json::Value>;

    /// Look an order up in the order book
    async fn lookup_order(&self, order_id: &str) -> BrokerResult<Option<OrderRecord>>;

    /// Last traded price of an instrument
    async fn last_traded_price(
        &self,
        exchange: Exchange,
        symbol: &str,
        token: &str,
    ) -> BrokerResult<Decimal>;

    /// Terminate the session
    async fn terminate(&self, client_code: &str) -> BrokerResult<()>;
}

/// Factory for brokerage sessions
pub trait BrokerConnector: Send + Sync {
    /// Create a fresh, unauthenticated session for the given account credentials
    fn new_session(&self, credentials: &BrokerCredentials) -> Arc<dyn BrokerSession>;
}

/// Rate limiter for API calls
#[derive(Debug)]
pub struct RateLimiter {
    governor: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        use governor::{Quota, RateLimiter as GovernorRateLimiter};
        use std::num::NonZeroU32;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = GovernorRateLimiter::direct(Quota::per_second(rate));

        Self { governor: limiter }
    }

    pub async fn acquire(&self) -> BrokerResult<()> {
        self.governor.until_ready().await;
        Ok(())
    }
}

/// Utility functions for connector implementations
pub mod utils {
    use super::*;

    /// Read a decimal from a JSON number or numeric string
    pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
        match value {
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64_retain)),
            serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    /// Read an identifier that may arrive as a JSON string or number
    pub fn id_from_json(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
