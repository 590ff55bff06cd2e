/// Integration tests for the scenario harness and its reports
///
/// Run with: cargo test --test harness_tests
use rustlockdb::{
    CounterRow, Discipline, ErrorKind, FaultPoint, Harness, HarnessConfig, Phase, Store,
    WorkerOutcome,
};
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pessimistic_then_optimistic_on_one_store() {
    let harness = Harness::new(Store::new());

    let pessimistic = assert_ok!(
        harness
            .run(&HarnessConfig::pessimistic().delays(Duration::from_millis(20), Duration::ZERO))
            .await
    );
    let optimistic = assert_ok!(
        harness
            .run(&HarnessConfig::optimistic().delays(Duration::from_millis(20), Duration::ZERO))
            .await
    );

    assert_eq!(pessimistic.discipline, Discipline::Pessimistic);
    assert_eq!(pessimistic.final_counter, CounterRow::plain(8));
    assert_eq!(optimistic.discipline, Discipline::Optimistic);
    assert_eq!(optimistic.final_counter, CounterRow::versioned(9, 2));
    assert_ne!(pessimistic.run_id, optimistic.run_id);

    // Counters are independent
    assert_eq!(harness.store().counters().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rerun_resets_counter() {
    let harness = Harness::new(Store::new());
    let config = HarnessConfig::pessimistic().delays(Duration::ZERO, Duration::ZERO);

    assert_ok!(harness.run(&config).await);
    let second = assert_ok!(harness.run(&config).await);

    assert_eq!(second.initial.row.value, 10);
    assert_eq!(second.final_counter.value, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_phases_are_recorded() {
    let harness = Harness::new(Store::new());
    let config = HarnessConfig::optimistic().delays(Duration::from_millis(30), Duration::ZERO);

    let report = assert_ok!(harness.run(&config).await);

    let winner = report.worker("t2").unwrap();
    assert_eq!(
        winner.phases,
        vec![
            Phase::Idle,
            Phase::TransactionOpen,
            Phase::Working,
            Phase::Committed
        ]
    );
    let loser = report.worker("t1").unwrap();
    assert_eq!(loser.phases.last(), Some(&Phase::Aborted));
    assert!(matches!(
        loser.outcome,
        WorkerOutcome::Aborted {
            kind: ErrorKind::WriteConflict,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_injected_failure_is_reported_not_raised() {
    let harness = Harness::new(Store::new());
    harness.store().faults().fail_next(FaultPoint::Begin);
    let config = HarnessConfig::pessimistic().delays(Duration::from_millis(10), Duration::ZERO);

    let report = assert_ok!(harness.run(&config).await);

    let failed: Vec<_> = report
        .workers
        .iter()
        .filter(|w| w.error_kind() == Some(ErrorKind::StoreUnavailable))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(report.decrements(), 1);
    assert_eq!(report.final_counter.value, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_serializes_to_json() {
    let harness = Harness::new(Store::new());
    let config = HarnessConfig::optimistic().delays(Duration::from_millis(10), Duration::ZERO);

    let report = assert_ok!(harness.run(&config).await);
    let json = assert_ok!(serde_json::to_value(&report));

    assert_eq!(json["discipline"], "optimistic");
    assert_eq!(json["final_counter"]["value"], 9);
    assert_eq!(json["workers"].as_array().map(|w| w.len()), Some(2));
    let statuses: Vec<_> = json["workers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["outcome"]["status"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(statuses.contains(&"decremented".to_string()));
    assert!(statuses.contains(&"aborted".to_string()));
}
