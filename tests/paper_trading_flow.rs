//! End-to-end tests for a batch against the paper brokerage
//!
//! Enter on a teacher group, then exit everything, using the in-memory stores.

use broker_connectors::{
    BrokerConnector, BrokerCredentials, Exchange, OrderType, ProductType, TransactionSide,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use stocksync::app::{connector, BrokerMode};
use stocksync::config::AppConfig;
use stocksync_core::{BatchCommand, BatchOrchestrator, BatchStatus, EntryOrder};
use stocksync_database::{
    AccountRecord, InstrumentRecord, MemoryAccountStore, MemoryInstrumentStore, MemoryLedger,
    PositionFilter, PositionLedger,
};

fn account(id: i64, teacher_id: Option<i64>, lot_multiplier: i32) -> AccountRecord {
    AccountRecord {
        id,
        name: format!("acct-{id}"),
        teacher_id,
        broker_connected: true,
        active: true,
        trading_enabled: true,
        lot_multiplier,
        broker: "angel_one".into(),
    }
}

fn orchestrator(connector: Arc<dyn BrokerConnector>, ledger: Arc<MemoryLedger>) -> BatchOrchestrator {
    let accounts = MemoryAccountStore::new();
    for (id, teacher, multiplier) in [(1, None, 1), (2, Some(1), 3)] {
        accounts.insert(
            account(id, teacher, multiplier),
            Some(BrokerCredentials::new(
                format!("C{id}"),
                "pw",
                "JBSWY3DPEHPK3PXP",
                "key",
            )),
        );
    }

    let instruments = MemoryInstrumentStore::new();
    instruments.insert(InstrumentRecord {
        symbol: "NIFTY25AUG24500CE".into(),
        token: "43210".into(),
        lot_size: 75,
    });

    let mut config = AppConfig::default().execution;
    config.inter_order_delay_ms = 0;

    BatchOrchestrator::builder()
        .connector(connector)
        .account_store(Arc::new(accounts))
        .instrument_store(Arc::new(instruments))
        .ledger(ledger)
        .config(config)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_paper_entry_then_exit_pending() {
    let config = AppConfig::default();
    let connector = connector(&config, BrokerMode::Paper).unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = orchestrator(connector, ledger.clone());

    let report = orchestrator
        .run(BatchCommand::Enter {
            teacher_id: 1,
            orders: vec![EntryOrder {
                instrument: "NIFTY25AUG24500CE".into(),
                side: TransactionSide::Sell,
                exchange: Exchange::Nfo,
                order_type: OrderType::Market,
                product_type: ProductType::Intraday,
            }],
            only_teacher_execute: false,
        })
        .await
        .unwrap();

    assert_eq!(report.status, BatchStatus::Success);
    assert_eq!(report.counts.success, 2);

    let student = ledger.open_positions(2, &PositionFilter::All).await.unwrap();
    assert_eq!(student[0].quantity, -225);
    assert_eq!(student[0].lots, -3);
    assert_eq!(student[0].average_price, dec!(100));

    let report = orchestrator
        .run(BatchCommand::ExitPending { teacher_id: 1 })
        .await
        .unwrap();
    assert_eq!(report.status, BatchStatus::Success);
    assert_eq!(report.message, "exit orders placed");
    assert!(ledger.open_positions(2, &PositionFilter::All).await.unwrap().is_empty());

    let report = orchestrator
        .run(BatchCommand::ExitPending { teacher_id: 1 })
        .await
        .unwrap();
    assert_eq!(report.status, BatchStatus::NotFound);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["msg"], "no trades found");
    assert_eq!(json["status"], "not-found");
    assert_eq!(json["per_account_results"][1]["status"], "not-found");
}
