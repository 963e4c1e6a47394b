//! Postgres stores built on sqlx.
//!
//! Every ledger write runs in its own transaction. A transaction-scoped advisory lock on the
//! position key serialises writers even before the first row exists; the row is then read,
//! recomputed and upserted, and the fill is appended before commit.

use async_trait::async_trait;
use broker_connectors::BrokerCredentials;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::ledger;
use crate::store::{AccountStore, InstrumentStore, PositionLedger};
use crate::types::{
    AccountId, AccountRecord, FillRecord, InstrumentRecord, LedgerFill, OrderMeta, PositionFilter,
    PositionRecord,
};

/// Tables the stores read and write
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    teacher_id BIGINT REFERENCES accounts (id),
    broker_connected BOOLEAN NOT NULL DEFAULT FALSE,
    active BOOLEAN NOT NULL DEFAULT FALSE,
    trading_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    lot_multiplier INTEGER NOT NULL DEFAULT 1,
    broker TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS broker_credentials (
    account_id BIGINT PRIMARY KEY REFERENCES accounts (id),
    client_id TEXT NOT NULL,
    password TEXT NOT NULL,
    totp_secret TEXT NOT NULL,
    api_key TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instruments (
    symbol TEXT NOT NULL,
    token TEXT NOT NULL,
    lot_size INTEGER NOT NULL,
    PRIMARY KEY (symbol, token)
);

CREATE TABLE IF NOT EXISTS positions (
    account_id BIGINT NOT NULL,
    symbol TEXT NOT NULL,
    token TEXT NOT NULL,
    side_class TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    lots BIGINT NOT NULL,
    average_price NUMERIC(18, 2) NOT NULL,
    last_order_id TEXT NOT NULL,
    last_unique_order_id TEXT,
    exchange TEXT NOT NULL,
    order_type TEXT NOT NULL,
    product_type TEXT NOT NULL,
    duration TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (account_id, symbol, token, side_class)
);

CREATE TABLE IF NOT EXISTS ledger_fills (
    id UUID PRIMARY KEY,
    account_id BIGINT NOT NULL,
    symbol TEXT NOT NULL,
    token TEXT NOT NULL,
    side_class TEXT NOT NULL,
    kind TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    lots BIGINT NOT NULL,
    price NUMERIC NOT NULL,
    order_id TEXT NOT NULL,
    unique_order_id TEXT,
    exchange TEXT NOT NULL,
    order_type TEXT NOT NULL,
    product_type TEXT NOT NULL,
    duration TEXT NOT NULL,
    filled_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS ledger_fills_account_idx ON ledger_fills (account_id, filled_at);
"#;

const ACCOUNT_COLUMNS: &str =
    "id, name, teacher_id, broker_connected, active, trading_enabled, lot_multiplier, broker";

const POSITION_COLUMNS: &str = "account_id, symbol, token, side_class, quantity, lots, \
     average_price, last_order_id, last_unique_order_id, exchange, order_type, product_type, \
     duration, updated_at";

fn parse_column<T>(column: &str, value: &str) -> DatabaseResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("column {column}: {e}")))
}

fn parse_meta(
    exchange: &str,
    order_type: &str,
    product_type: &str,
    duration: &str,
) -> DatabaseResult<OrderMeta> {
    Ok(OrderMeta {
        exchange: parse_column("exchange", exchange)?,
        order_type: parse_column("order_type", order_type)?,
        product_type: parse_column("product_type", product_type)?,
        duration: parse_column("duration", duration)?,
    })
}

#[derive(FromRow)]
struct CredentialsRow {
    client_id: String,
    password: String,
    totp_secret: String,
    api_key: String,
}

#[derive(FromRow)]
struct PositionRow {
    account_id: i64,
    symbol: String,
    token: String,
    side_class: String,
    quantity: i64,
    lots: i64,
    average_price: Decimal,
    last_order_id: String,
    last_unique_order_id: Option<String>,
    exchange: String,
    order_type: String,
    product_type: String,
    duration: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for PositionRecord {
    type Error = DatabaseError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(PositionRecord {
            meta: parse_meta(&row.exchange, &row.order_type, &row.product_type, &row.duration)?,
            side_class: parse_column("side_class", &row.side_class)?,
            account_id: row.account_id,
            symbol: row.symbol,
            token: row.token,
            quantity: row.quantity,
            lots: row.lots,
            average_price: row.average_price,
            last_order_id: row.last_order_id,
            last_unique_order_id: row.last_unique_order_id,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct FillRow {
    id: Uuid,
    account_id: i64,
    symbol: String,
    token: String,
    side_class: String,
    kind: String,
    side: String,
    quantity: i64,
    lots: i64,
    price: Decimal,
    order_id: String,
    unique_order_id: Option<String>,
    exchange: String,
    order_type: String,
    product_type: String,
    duration: String,
    filled_at: DateTime<Utc>,
}

impl TryFrom<FillRow> for FillRecord {
    type Error = DatabaseError;

    fn try_from(row: FillRow) -> Result<Self, Self::Error> {
        Ok(FillRecord {
            meta: parse_meta(&row.exchange, &row.order_type, &row.product_type, &row.duration)?,
            side_class: parse_column("side_class", &row.side_class)?,
            kind: parse_column("kind", &row.kind)?,
            side: parse_column("side", &row.side)?,
            id: row.id,
            account_id: row.account_id,
            symbol: row.symbol,
            token: row.token,
            quantity: row.quantity,
            lots: row.lots,
            price: row.price,
            order_id: row.order_id,
            unique_order_id: row.unique_order_id,
            filled_at: row.filled_at,
        })
    }
}

fn position_lock_key(fill: &LedgerFill) -> String {
    format!(
        "positions:{}:{}:{}:{}",
        fill.account_id,
        fill.instrument.symbol,
        fill.instrument.token,
        fill.side_class.as_str()
    )
}

/// Account, instrument and ledger stores over one connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet
    pub async fn ensure_schema(&self) -> DatabaseResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    #[instrument(skip(self))]
    async fn accounts_for_teacher(&self, teacher_id: AccountId) -> DatabaseResult<Vec<AccountRecord>> {
        let accounts = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 OR teacher_id = $1 ORDER BY id"
        ))
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = accounts.len(), "loaded teacher group");
        Ok(accounts)
    }

    async fn account(&self, account_id: AccountId) -> DatabaseResult<Option<AccountRecord>> {
        Ok(sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn credentials(&self, account_id: AccountId) -> DatabaseResult<Option<BrokerCredentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            "SELECT client_id, password, totp_secret, api_key FROM broker_credentials WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| BrokerCredentials::new(r.client_id, r.password, r.totp_secret, r.api_key)))
    }
}

#[async_trait]
impl InstrumentStore for PgStore {
    async fn instrument(&self, symbol: &str) -> DatabaseResult<Option<InstrumentRecord>> {
        Ok(sqlx::query_as::<_, InstrumentRecord>(
            "SELECT symbol, token, lot_size FROM instruments WHERE symbol = $1 ORDER BY token LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl PositionLedger for PgStore {
    #[instrument(skip(self, fill), fields(account_id = fill.account_id, symbol = %fill.instrument.symbol, order_id = %fill.order_id))]
    async fn record_fill(&self, fill: &LedgerFill) -> DatabaseResult<PositionRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // FOR UPDATE locks nothing while the key has no row yet
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(position_lock_key(fill))
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE account_id = $1 AND symbol = $2 AND token = $3 AND side_class = $4 \
             FOR UPDATE"
        ))
        .bind(fill.account_id)
        .bind(&fill.instrument.symbol)
        .bind(&fill.instrument.token)
        .bind(fill.side_class.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(PositionRecord::try_from)
        .transpose()?;

        let position = ledger::apply_fill(existing.as_ref(), fill, now)?;

        sqlx::query(&format!(
            "INSERT INTO positions ({POSITION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (account_id, symbol, token, side_class) DO UPDATE SET \
                 quantity = EXCLUDED.quantity, \
                 lots = EXCLUDED.lots, \
                 average_price = EXCLUDED.average_price, \
                 last_order_id = EXCLUDED.last_order_id, \
                 last_unique_order_id = EXCLUDED.last_unique_order_id, \
                 exchange = EXCLUDED.exchange, \
                 order_type = EXCLUDED.order_type, \
                 product_type = EXCLUDED.product_type, \
                 duration = EXCLUDED.duration, \
                 updated_at = EXCLUDED.updated_at"
        ))
        .bind(position.account_id)
        .bind(&position.symbol)
        .bind(&position.token)
        .bind(position.side_class.as_str())
        .bind(position.quantity)
        .bind(position.lots)
        .bind(position.average_price)
        .bind(&position.last_order_id)
        .bind(&position.last_unique_order_id)
        .bind(position.meta.exchange.as_str())
        .bind(position.meta.order_type.as_str())
        .bind(position.meta.product_type.as_str())
        .bind(position.meta.duration.as_str())
        .bind(position.updated_at)
        .execute(&mut *tx)
        .await?;

        let record = FillRecord::from_fill(fill, now);
        sqlx::query(
            "INSERT INTO ledger_fills (id, account_id, symbol, token, side_class, kind, side, \
             quantity, lots, price, order_id, unique_order_id, exchange, order_type, product_type, \
             duration, filled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(&record.symbol)
        .bind(&record.token)
        .bind(record.side_class.as_str())
        .bind(record.kind.as_str())
        .bind(record.side.as_str())
        .bind(record.quantity)
        .bind(record.lots)
        .bind(record.price)
        .bind(&record.order_id)
        .bind(&record.unique_order_id)
        .bind(record.meta.exchange.as_str())
        .bind(record.meta.order_type.as_str())
        .bind(record.meta.product_type.as_str())
        .bind(record.meta.duration.as_str())
        .bind(record.filled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(quantity = position.quantity, average_price = %position.average_price, "fill committed");
        Ok(position)
    }

    async fn open_positions(
        &self,
        account_id: AccountId,
        filter: &PositionFilter,
    ) -> DatabaseResult<Vec<PositionRecord>> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE account_id = $1 AND quantity <> 0 ORDER BY symbol, side_class"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let position = PositionRecord::try_from(row)?;
            if filter.matches(&position) {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn fills(&self, account_id: AccountId) -> DatabaseResult<Vec<FillRecord>> {
        sqlx::query_as::<_, FillRow>(
            "SELECT id, account_id, symbol, token, side_class, kind, side, quantity, lots, price, \
             order_id, unique_order_id, exchange, order_type, product_type, duration, filled_at \
             FROM ledger_fills WHERE account_id = $1 ORDER BY filled_at, id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(FillRecord::try_from)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_connectors::{Exchange, OrderDuration, OrderType, ProductType};
    use crate::types::SideClass;
    use rust_decimal_macros::dec;

    #[test]
    fn position_row_parses_wire_strings() {
        let row = PositionRow {
            account_id: 5,
            symbol: "XYZ25AUG100CE".into(),
            token: "54321".into(),
            side_class: "SHORT".into(),
            quantity: -50,
            lots: -2,
            average_price: dec!(12.30),
            last_order_id: "1".into(),
            last_unique_order_id: None,
            exchange: "NFO".into(),
            order_type: "MARKET".into(),
            product_type: "INTRADAY".into(),
            duration: "DAY".into(),
            updated_at: Utc::now(),
        };

        let position = PositionRecord::try_from(row).unwrap();
        assert_eq!(position.side_class, SideClass::Short);
        assert_eq!(position.meta.exchange, Exchange::Nfo);
        assert_eq!(position.meta.order_type, OrderType::Market);
        assert_eq!(position.meta.product_type, ProductType::Intraday);
        assert_eq!(position.meta.duration, OrderDuration::Day);
    }

    #[test]
    fn unknown_enum_value_is_a_serialization_error() {
        let err = parse_meta("LSE", "MARKET", "INTRADAY", "DAY").unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(_)));
    }
}
