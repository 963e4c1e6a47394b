//! Symbol to exchange token and lot size.

use std::sync::Arc;
use stocksync_database::{InstrumentRecord, InstrumentStore};
use tracing::debug;

use crate::error::{ExecutionError, ExecutionResult};

/// Pure lookup against instrument reference data. Absence is a data problem and is not retried.
#[derive(Clone)]
pub struct InstrumentResolver {
    store: Arc<dyn InstrumentStore>,
}

impl InstrumentResolver {
    pub fn new(store: Arc<dyn InstrumentStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, symbol: &str) -> ExecutionResult<InstrumentRecord> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ExecutionError::Validation("instrument symbol is empty".to_string()));
        }

        let instrument = self
            .store
            .instrument(symbol)
            .await
            .map_err(|e| ExecutionError::Store(e.to_string()))?
            .ok_or_else(|| ExecutionError::NotFound(format!("instrument not found: {symbol}")))?;

        if instrument.lot_size <= 0 {
            return Err(ExecutionError::Validation(format!(
                "instrument {symbol} has non-positive lot size {}",
                instrument.lot_size
            )));
        }

        debug!(symbol, token = %instrument.token, lot_size = instrument.lot_size, "instrument resolved");
        Ok(instrument)
    }
}
