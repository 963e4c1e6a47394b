//! Database type definitions
//!
//! Accounts, instruments and the position ledger records shared by the Postgres and in-memory
//! stores.

use broker_connectors::{Exchange, OrderDuration, OrderType, ProductType, TransactionSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DatabaseError;

pub type AccountId = i64;

/// A tradable account. Students point at their teacher through `teacher_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AccountRecord {
    pub id: AccountId,
    pub name: String,
    pub teacher_id: Option<AccountId>,
    pub broker_connected: bool,
    pub active: bool,
    pub trading_enabled: bool,
    /// Lots traded per order on this account
    pub lot_multiplier: i32,
    pub broker: String,
}

impl AccountRecord {
    /// All activation flags are set and the account trades on `broker`
    pub fn is_eligible(&self, broker: &str) -> bool {
        self.broker_connected
            && self.active
            && self.trading_enabled
            && self.broker.eq_ignore_ascii_case(broker)
    }

    pub fn is_teacher_or_student_of(&self, teacher_id: AccountId) -> bool {
        self.id == teacher_id || self.teacher_id == Some(teacher_id)
    }
}

/// Static instrument reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub token: String,
    pub lot_size: i32,
}

/// Symbol and exchange token identifying an instrument in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub symbol: String,
    pub token: String,
}

impl InstrumentKey {
    pub fn new(symbol: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            token: token.into(),
        }
    }
}

impl From<&InstrumentRecord> for InstrumentKey {
    fn from(instrument: &InstrumentRecord) -> Self {
        Self::new(instrument.symbol.clone(), instrument.token.clone())
    }
}

/// Direction a position was opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SideClass {
    Long,
    Short,
}

impl SideClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideClass::Long => "LONG",
            SideClass::Short => "SHORT",
        }
    }

    /// Side class opened by an entry on `side`
    pub fn from_entry_side(side: TransactionSide) -> Self {
        match side {
            TransactionSide::Buy => SideClass::Long,
            TransactionSide::Sell => SideClass::Short,
        }
    }

    pub fn entry_side(&self) -> TransactionSide {
        match self {
            SideClass::Long => TransactionSide::Buy,
            SideClass::Short => TransactionSide::Sell,
        }
    }

    pub fn exit_side(&self) -> TransactionSide {
        self.entry_side().opposite()
    }

    /// Sign of an open quantity in this class
    pub fn sign(&self) -> i64 {
        match self {
            SideClass::Long => 1,
            SideClass::Short => -1,
        }
    }
}

impl fmt::Display for SideClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SideClass {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(SideClass::Long),
            "SHORT" => Ok(SideClass::Short),
            other => Err(DatabaseError::Serialization(format!(
                "unknown side class: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillKind {
    Entry,
    Exit,
}

impl FillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillKind::Entry => "entry",
            FillKind::Exit => "exit",
        }
    }
}

impl FromStr for FillKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entry" => Ok(FillKind::Entry),
            "exit" => Ok(FillKind::Exit),
            other => Err(DatabaseError::Serialization(format!("unknown fill kind: {other}"))),
        }
    }
}

/// Order metadata needed to replay an exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMeta {
    pub exchange: Exchange,
    pub order_type: OrderType,
    pub product_type: ProductType,
    pub duration: OrderDuration,
}

/// A confirmed brokerage fill to be written to the ledger.
///
/// `quantity` and `lots` are magnitudes; the sign is derived from `side_class` and `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFill {
    pub account_id: AccountId,
    pub instrument: InstrumentKey,
    pub side_class: SideClass,
    pub kind: FillKind,
    pub quantity: u64,
    pub lots: u64,
    pub price: Decimal,
    pub order_id: String,
    pub unique_order_id: Option<String>,
    pub meta: OrderMeta,
}

impl LedgerFill {
    /// Transaction side the brokerage executed
    pub fn side(&self) -> TransactionSide {
        match self.kind {
            FillKind::Entry => self.side_class.entry_side(),
            FillKind::Exit => self.side_class.exit_side(),
        }
    }

    fn direction(&self) -> i64 {
        match self.kind {
            FillKind::Entry => self.side_class.sign(),
            FillKind::Exit => -self.side_class.sign(),
        }
    }

    pub fn signed_quantity(&self) -> i64 {
        self.direction() * self.quantity as i64
    }

    pub fn signed_lots(&self) -> i64 {
        self.direction() * self.lots as i64
    }
}

/// Materialised position per (account, symbol, token, side class).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub account_id: AccountId,
    pub symbol: String,
    pub token: String,
    pub side_class: SideClass,
    /// Signed: positive for long, negative for short, zero when flat
    pub quantity: i64,
    pub lots: i64,
    pub average_price: Decimal,
    pub last_order_id: String,
    pub last_unique_order_id: Option<String>,
    pub meta: OrderMeta,
    pub updated_at: DateTime<Utc>,
}

impl PositionRecord {
    pub fn is_open(&self) -> bool {
        self.quantity != 0
    }

    pub fn instrument(&self) -> InstrumentKey {
        InstrumentKey::new(self.symbol.clone(), self.token.clone())
    }

    pub fn open_quantity(&self) -> u64 {
        self.quantity.unsigned_abs()
    }

    pub fn open_lots(&self) -> u64 {
        self.lots.unsigned_abs()
    }

    pub fn exit_side(&self) -> TransactionSide {
        self.side_class.exit_side()
    }
}

/// One row of the append-only fill log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub id: Uuid,
    pub account_id: AccountId,
    pub symbol: String,
    pub token: String,
    pub side_class: SideClass,
    pub kind: FillKind,
    pub side: TransactionSide,
    pub quantity: i64,
    pub lots: i64,
    pub price: Decimal,
    pub order_id: String,
    pub unique_order_id: Option<String>,
    pub meta: OrderMeta,
    pub filled_at: DateTime<Utc>,
}

impl FillRecord {
    pub fn from_fill(fill: &LedgerFill, filled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: fill.account_id,
            symbol: fill.instrument.symbol.clone(),
            token: fill.instrument.token.clone(),
            side_class: fill.side_class,
            kind: fill.kind,
            side: fill.side(),
            quantity: fill.signed_quantity(),
            lots: fill.signed_lots(),
            price: fill.price,
            order_id: fill.order_id.clone(),
            unique_order_id: fill.unique_order_id.clone(),
            meta: fill.meta,
            filled_at,
        }
    }
}

/// Which open positions an exit applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionFilter {
    All,
    /// One instrument; a missing token matches any token for the symbol
    Instrument {
        symbol: String,
        token: Option<String>,
    },
    Symbols { symbols: Vec<String> },
}

impl PositionFilter {
    pub fn matches(&self, position: &PositionRecord) -> bool {
        match self {
            PositionFilter::All => true,
            PositionFilter::Instrument { symbol, token } => {
                position.symbol == *symbol
                    && token.as_ref().map_or(true, |t| position.token == *t)
            }
            PositionFilter::Symbols { symbols } => symbols.iter().any(|s| *s == position.symbol),
        }
    }
}
