//! Order submission: validation, response classification, bounded retry and confirmation.
//!
//! The brokerage answers `placeOrder` in several shapes. They are normalised here into
//! [`ResponseClass`] and nothing downstream looks at the raw payload again.

use broker_connectors::{utils, BrokerResult, BrokerSession, OrderParams};
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::{ExecutionError, ExecutionResult};

/// A placement response normalised into one shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    Accepted(String),
    /// Explicit business rejection with its reason; terminal
    Rejected(String),
    /// A payload that does not follow any known success or rejection shape
    ProtocolError(String),
    /// Nothing usable came back: empty body or a failed call
    TransportError(String),
}

impl ResponseClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResponseClass::ProtocolError(_) | ResponseClass::TransportError(_))
    }
}

fn status_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "success" | "ok" | "complete" => Some(true),
            "false" | "failure" | "failed" | "rejected" | "error" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn first_text(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Classify the raw result of a `place_order` call
pub fn classify_response(response: BrokerResult<Value>) -> ResponseClass {
    let payload = match response {
        Ok(payload) => payload,
        Err(e) => return ResponseClass::TransportError(e.to_string()),
    };

    match &payload {
        Value::Null => ResponseClass::TransportError("empty response".to_string()),
        Value::String(_) | Value::Number(_) => match utils::id_from_json(&payload) {
            Some(order_id) => ResponseClass::Accepted(order_id),
            None => ResponseClass::TransportError("empty response".to_string()),
        },
        Value::Object(object) => {
            let succeeded = object.get("status").and_then(status_flag).or_else(|| {
                object
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|m| m.eq_ignore_ascii_case("SUCCESS"))
                    .map(|_| true)
            });

            match succeeded {
                Some(true) => payload
                    .pointer("/data/orderid")
                    .or_else(|| object.get("orderid"))
                    .or_else(|| object.get("order_id"))
                    .and_then(utils::id_from_json)
                    .map(ResponseClass::Accepted)
                    .unwrap_or_else(|| {
                        ResponseClass::ProtocolError(format!("success without order id: {payload}"))
                    }),
                Some(false) => match first_text(object, &["message", "text", "reason"]) {
                    Some(reason) => ResponseClass::Rejected(reason),
                    None => ResponseClass::ProtocolError(format!(
                        "failure without reason: {payload}"
                    )),
                },
                None => ResponseClass::ProtocolError(format!("no status indicator: {payload}")),
            }
        }
        other => ResponseClass::ProtocolError(format!("unexpected payload: {other}")),
    }
}

/// Outcome of one placement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted(String),
    Rejected(String),
    Unparseable(String),
    TransportError(String),
}

impl From<&ResponseClass> for AttemptOutcome {
    fn from(class: &ResponseClass) -> Self {
        match class {
            ResponseClass::Accepted(id) => AttemptOutcome::Accepted(id.clone()),
            ResponseClass::Rejected(reason) => AttemptOutcome::Rejected(reason.clone()),
            ResponseClass::ProtocolError(raw) => AttemptOutcome::Unparseable(raw.clone()),
            ResponseClass::TransportError(e) => AttemptOutcome::TransportError(e.clone()),
        }
    }
}

/// One submission cycle; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAttempt {
    /// One-based attempt number
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Backoff taken after this attempt, if it failed transiently
    pub backoff: Option<Duration>,
}

/// An order the brokerage accepted, before the order book confirmed it
#[derive(Debug, Clone)]
pub struct Placement {
    pub order_id: String,
    pub attempts: Vec<OrderAttempt>,
}

/// A placed order the order book confirmed as not rejected
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub params: OrderParams,
    pub order_id: String,
    pub unique_order_id: Option<String>,
    pub status: String,
    pub attempts: Vec<OrderAttempt>,
}

/// Reject parameters that must never reach the brokerage
pub fn validate(params: &OrderParams) -> ExecutionResult<()> {
    if params.quantity == 0 {
        return Err(ExecutionError::Validation(format!(
            "quantity for {} must be positive",
            params.symbol
        )));
    }
    if params.symbol.trim().is_empty() || params.token.trim().is_empty() {
        return Err(ExecutionError::Validation(
            "symbol and token are required".to_string(),
        ));
    }
    if params.price < Decimal::ZERO {
        return Err(ExecutionError::Validation(format!(
            "price for {} cannot be negative",
            params.symbol
        )));
    }
    if params.order_type.requires_price() && params.price.is_zero() {
        return Err(ExecutionError::Validation(format!(
            "{} orders need a price",
            params.order_type
        )));
    }
    Ok(())
}

/// Order quantity from lot size and the account multiplier; both factors must be positive
pub fn order_quantity(lot_size: i32, lot_multiplier: i32) -> ExecutionResult<u64> {
    if lot_size <= 0 || lot_multiplier <= 0 {
        return Err(ExecutionError::Validation(format!(
            "lot size {lot_size} and lot multiplier {lot_multiplier} must both be positive"
        )));
    }
    let quantity = i64::from(lot_size) * i64::from(lot_multiplier);
    u64::try_from(quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| {
            ExecutionError::Validation(format!(
                "order quantity {quantity} (lot size {lot_size} x multiplier {lot_multiplier}) must be positive"
            ))
        })
}

/// Milliseconds for log fields, saturating like [`RetryPolicy::delay_for`]
fn whole_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderSubmitter;

impl OrderSubmitter {
    pub fn new() -> Self {
        Self
    }

    /// Submit, retrying transient failures per `policy`, then confirm against the order book.
    ///
    /// Confirmation is not retried: the order may already be live, so an unconfirmed order is
    /// reported instead of placed again.
    pub async fn submit(
        &self,
        session: &dyn BrokerSession,
        params: &OrderParams,
        policy: &RetryPolicy,
    ) -> ExecutionResult<SubmissionReport> {
        let placement = self.place(session, params, policy).await?;
        self.confirm(session, params, placement).await
    }

    /// Place the order until the brokerage accepts it, rejects it or `policy` runs out
    pub async fn place(
        &self,
        session: &dyn BrokerSession,
        params: &OrderParams,
        policy: &RetryPolicy,
    ) -> ExecutionResult<Placement> {
        validate(params)?;

        let mut attempts = Vec::with_capacity(policy.max_attempts as usize);
        let mut last_error = String::from("no attempt made");

        for index in 0..policy.max_attempts {
            let number = index + 1;
            let class = classify_response(session.place_order(params).await);
            debug!(symbol = %params.symbol, attempt = number, outcome = ?class, "order placement attempt");

            match class {
                ResponseClass::Accepted(order_id) => {
                    attempts.push(OrderAttempt {
                        attempt: number,
                        outcome: AttemptOutcome::Accepted(order_id.clone()),
                        backoff: None,
                    });
                    return Ok(Placement { order_id, attempts });
                }
                ResponseClass::Rejected(reason) => {
                    warn!(symbol = %params.symbol, attempt = number, %reason, "order rejected at placement");
                    return Err(ExecutionError::BrokerRejection(reason));
                }
                transient => {
                    let delay = policy.delay_for(index);
                    warn!(
                        symbol = %params.symbol,
                        attempt = number,
                        max_attempts = policy.max_attempts,
                        delay_ms = whole_millis(delay),
                        outcome = ?transient,
                        "order placement failed, backing off"
                    );
                    let outcome = AttemptOutcome::from(&transient);
                    last_error = match transient {
                        ResponseClass::ProtocolError(e) | ResponseClass::TransportError(e) => e,
                        _ => last_error,
                    };
                    attempts.push(OrderAttempt {
                        attempt: number,
                        outcome,
                        backoff: Some(delay),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ExecutionError::TransientExhausted {
            attempts: policy.max_attempts,
            last_error,
        })
    }

    /// Look the accepted order up in the order book; a rejection found there is terminal
    pub async fn confirm(
        &self,
        session: &dyn BrokerSession,
        params: &OrderParams,
        placement: Placement,
    ) -> ExecutionResult<SubmissionReport> {
        let Placement { order_id, attempts } = placement;
        let record = match session.lookup_order(&order_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(ExecutionError::Unconfirmed {
                    order_id,
                    reason: "order not found in order book".to_string(),
                })
            }
            Err(e) => {
                return Err(ExecutionError::Unconfirmed {
                    order_id,
                    reason: e.to_string(),
                })
            }
        };

        if record.is_rejected() {
            let reason = record.rejection_reason();
            warn!(order_id = %order_id, %reason, "order rejected after placement");
            return Err(ExecutionError::BrokerRejection(reason));
        }

        info!(
            symbol = %params.symbol,
            side = %params.side,
            quantity = params.quantity,
            order_id = %order_id,
            unique_order_id = record.unique_order_id.as_deref().unwrap_or(""),
            status = %record.status,
            "order confirmed"
        );

        Ok(SubmissionReport {
            params: params.clone(),
            order_id,
            unique_order_id: record.unique_order_id,
            status: record.status,
            attempts,
        })
    }
}
