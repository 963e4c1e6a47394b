mod common;

use broker_connectors::TransactionSide;
use common::*;
use rust_decimal_macros::dec;
use stocksync_core::{AccountStatus, BatchCommand, BatchState, BatchStatus, ExecutionConfig};
use stocksync_database::{FillKind, PositionFilter, PositionLedger};

fn enter() -> BatchCommand {
    BatchCommand::Enter {
        teacher_id: 1,
        orders: vec![buy_call()],
        only_teacher_execute: false,
    }
}

fn accepting_broker() -> ScriptedBroker {
    ScriptedBroker::new(&[
        ("T", Behaviour::Accept("100")),
        ("S1", Behaviour::Accept("200")),
        ("S2", Behaviour::Accept("300")),
    ])
}

#[tokio::test(start_paused = true)]
async fn exit_without_positions_is_not_found_and_never_logs_in() {
    let broker = accepting_broker();
    let orchestrator = orchestrator(&broker, teacher_group(), memory_ledger(), ExecutionConfig::default());

    let report = orchestrator
        .run(BatchCommand::ExitAccount { account_id: 2 })
        .await
        .unwrap();

    assert_eq!(report.status, BatchStatus::NotFound);
    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.message, "no trades found");
    assert_eq!(report.per_account_results[0].status, AccountStatus::NotFound);
    assert_eq!(
        report.per_account_results[0].detail.as_deref(),
        Some("not-found: no trades found")
    );
    assert_eq!(broker.calls.placement_count(), 0);
    assert_eq!(broker.calls.logins("S1"), 0);
}

#[tokio::test(start_paused = true)]
async fn exit_pending_flattens_every_position_with_opposite_orders() {
    let broker = accepting_broker();
    let ledger = memory_ledger();

    let entry = orchestrator(&broker, teacher_group(), ledger.clone(), ExecutionConfig::default());
    assert_eq!(entry.run(enter()).await.unwrap().status, BatchStatus::Success);

    let exit = orchestrator(&broker, teacher_group(), ledger.clone(), ExecutionConfig::default());
    let report = exit.run(BatchCommand::ExitPending { teacher_id: 1 }).await.unwrap();

    assert_eq!(report.status, BatchStatus::Success);
    assert_eq!(report.message, "exit orders placed");

    let s1_orders = broker.calls.placements_for("S1");
    assert_eq!(s1_orders.len(), 2);
    assert_eq!(s1_orders[1].side, TransactionSide::Sell);
    assert_eq!(s1_orders[1].quantity, 50);
    assert_eq!(s1_orders[1].price, dec!(101.5));

    for account_id in 1..=3 {
        assert!(ledger
            .open_positions(account_id, &PositionFilter::All)
            .await
            .unwrap()
            .is_empty());
    }

    let fills = ledger.fills(2).await.unwrap();
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[1].kind, FillKind::Exit);
    assert_eq!(fills[1].quantity, -50);
}

#[tokio::test(start_paused = true)]
async fn exit_instrument_touches_only_the_named_account() {
    let broker = accepting_broker();
    let ledger = memory_ledger();

    let entry = orchestrator(&broker, teacher_group(), ledger.clone(), ExecutionConfig::default());
    entry.run(enter()).await.unwrap();

    let exit = orchestrator(&broker, teacher_group(), ledger.clone(), ExecutionConfig::default());
    let report = exit
        .run(BatchCommand::ExitInstrument {
            account_id: 2,
            symbol: SYMBOL.to_string(),
            token: Some("54321".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(report.per_account_results.len(), 1);
    assert_eq!(report.status, BatchStatus::Success);
    assert!(ledger.open_positions(2, &PositionFilter::All).await.unwrap().is_empty());
    assert_eq!(ledger.open_positions(1, &PositionFilter::All).await.unwrap().len(), 1);
    assert_eq!(broker.calls.placements_for("T").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exit_selected_with_unknown_symbols_finds_nothing() {
    let broker = accepting_broker();
    let ledger = memory_ledger();

    let entry = orchestrator(&broker, teacher_group(), ledger.clone(), ExecutionConfig::default());
    entry.run(enter()).await.unwrap();
    let placed_before = broker.calls.placement_count();

    let exit = orchestrator(&broker, teacher_group(), ledger.clone(), ExecutionConfig::default());
    let report = exit
        .run(BatchCommand::ExitSelected {
            teacher_id: 1,
            instruments: vec!["OTHER25AUG200PE".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(report.status, BatchStatus::NotFound);
    assert_eq!(report.counts.not_found, 3);
    assert_eq!(broker.calls.placement_count(), placed_before);
}
