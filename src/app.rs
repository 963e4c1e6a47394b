//! Wiring from configuration to a ready orchestrator.

use anyhow::{Context, Result};
use broker_connectors::paper::PaperConnector;
use broker_connectors::smartapi::SmartApiConnector;
use broker_connectors::BrokerConnector;
use std::sync::Arc;
use stocksync_core::{BatchCommand, BatchOrchestrator, BatchReport};
use stocksync_database::DatabaseManager;
use tracing::info;

use crate::config::AppConfig;

/// Brokerage the orders are routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    Live,
    Paper,
}

pub fn connector(config: &AppConfig, mode: BrokerMode) -> Result<Arc<dyn BrokerConnector>> {
    Ok(match mode {
        BrokerMode::Live => Arc::new(
            SmartApiConnector::new(config.broker.clone())
                .context("failed to build SmartAPI connector")?,
        ),
        BrokerMode::Paper => Arc::new(
            config
                .paper
                .prices
                .iter()
                .fold(PaperConnector::new(config.paper.fallback_price), |paper, (symbol, price)| {
                    paper.with_price(symbol, *price)
                }),
        ),
    })
}

/// Connect to the database and assemble the orchestrator
pub async fn build_orchestrator(config: &AppConfig, mode: BrokerMode) -> Result<BatchOrchestrator> {
    let database = DatabaseManager::new(config.database.clone()).await?;
    database.health_check().await?;

    let store = Arc::new(database.store());
    store
        .ensure_schema()
        .await
        .context("failed to prepare database schema")?;

    let orchestrator = BatchOrchestrator::builder()
        .connector(connector(config, mode)?)
        .account_store(store.clone())
        .instrument_store(store.clone())
        .ledger(store)
        .config(config.execution.clone())
        .build()?;

    info!(?mode, pool_size = database.pool_size(), "orchestrator ready");
    Ok(orchestrator)
}

pub async fn run(config: &AppConfig, mode: BrokerMode, command: BatchCommand) -> Result<BatchReport> {
    let orchestrator = build_orchestrator(config, mode).await?;
    Ok(orchestrator.run(command).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_connectors::{BrokerCredentials, Exchange};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn paper_connector_quotes_configured_prices() {
        let mut config = AppConfig::default();
        config.paper.fallback_price = dec!(90);
        config.paper.prices.insert("XYZ25AUG100CE".into(), dec!(182.4));

        let paper = connector(&config, BrokerMode::Paper).unwrap();
        let session = paper.new_session(&BrokerCredentials::new("P1", "pw", "SEED", "key"));

        let quoted = session
            .last_traded_price(Exchange::Nfo, "XYZ25AUG100CE", "54321")
            .await
            .unwrap();
        let fallback = session
            .last_traded_price(Exchange::Nfo, "XYZ25AUG90PE", "54399")
            .await
            .unwrap();
        assert_eq!(quoted, dec!(182.4));
        assert_eq!(fallback, dec!(90));
    }
}
