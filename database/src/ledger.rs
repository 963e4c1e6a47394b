//! Position arithmetic shared by every ledger store.
//!
//! Entry fills accumulate quantity and lots and recompute the lot-weighted average price.
//! Exit fills move quantity and lots toward zero and keep the average as it was.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DatabaseError, DatabaseResult};
use crate::types::{FillKind, LedgerFill, PositionRecord};

/// Decimal places kept on average prices
pub const PRICE_SCALE: u32 = 2;

pub fn round_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `((old_avg * old_lots) + (fill_price * fill_lots)) / (old_lots + fill_lots)`, rounded
pub fn weighted_average(
    old_average: Decimal,
    old_lots: u64,
    fill_price: Decimal,
    fill_lots: u64,
) -> Decimal {
    let total_lots = old_lots + fill_lots;
    if total_lots == 0 {
        return round_price(fill_price);
    }
    let numerator = old_average * Decimal::from(old_lots) + fill_price * Decimal::from(fill_lots);
    round_price(numerator / Decimal::from(total_lots))
}

/// Position that results from applying `fill` to `existing`.
pub fn apply_fill(
    existing: Option<&PositionRecord>,
    fill: &LedgerFill,
    now: DateTime<Utc>,
) -> DatabaseResult<PositionRecord> {
    if fill.quantity == 0 {
        return Err(DatabaseError::Conflict(format!(
            "fill {} for {} has zero quantity",
            fill.order_id, fill.instrument.symbol
        )));
    }

    match fill.kind {
        FillKind::Entry => {
            let (quantity, lots, average_price) = match existing {
                Some(position) => (
                    position.quantity + fill.signed_quantity(),
                    position.lots + fill.signed_lots(),
                    weighted_average(
                        position.average_price,
                        position.open_lots(),
                        fill.price,
                        fill.lots,
                    ),
                ),
                None => (
                    fill.signed_quantity(),
                    fill.signed_lots(),
                    round_price(fill.price),
                ),
            };

            Ok(PositionRecord {
                account_id: fill.account_id,
                symbol: fill.instrument.symbol.clone(),
                token: fill.instrument.token.clone(),
                side_class: fill.side_class,
                quantity,
                lots,
                average_price,
                last_order_id: fill.order_id.clone(),
                last_unique_order_id: fill.unique_order_id.clone(),
                meta: fill.meta,
                updated_at: now,
            })
        }
        FillKind::Exit => {
            let position = existing.filter(|p| p.is_open()).ok_or_else(|| {
                DatabaseError::NotFound(format!(
                    "no open {} position in {} for account {}",
                    fill.side_class, fill.instrument.symbol, fill.account_id
                ))
            })?;

            if fill.quantity > position.open_quantity() {
                return Err(DatabaseError::Conflict(format!(
                    "exit of {} exceeds open quantity {} in {}",
                    fill.quantity,
                    position.open_quantity(),
                    position.symbol
                )));
            }

            let lots = if fill.quantity == position.open_quantity() {
                0
            } else {
                position.lots + fill.signed_lots()
            };

            Ok(PositionRecord {
                quantity: position.quantity + fill.signed_quantity(),
                lots,
                last_order_id: fill.order_id.clone(),
                last_unique_order_id: fill.unique_order_id.clone(),
                updated_at: now,
                ..position.clone()
            })
        }
    }
}
