/// Integration tests for optimistic locking
///
/// Run with: cargo test --test optimistic_tests
use rustlockdb::{
    Counter, CounterId, CounterRow, ErrorKind, Harness, HarnessConfig, OptimisticWorker, Store,
    Worker, WorkerOutcome, WorkerSpec,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_test::{assert_err, assert_ok};

const COUNTER: CounterId = CounterId(2);

async fn seeded(value: i64, version: u64) -> Store {
    let store = Store::new();
    assert_ok!(store.seed(Counter::versioned(COUNTER, value, version)).await);
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exactly_one_writer_wins() {
    let store = seeded(10, 1).await;
    let barrier = Arc::new(Barrier::new(2));
    let worker = Arc::new(
        OptimisticWorker::new(store.clone(), COUNTER).with_read_barrier(Arc::clone(&barrier)),
    );

    let slow = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run("t1", Duration::from_millis(100)).await })
    };
    let fast = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run("t2", Duration::ZERO).await })
    };
    let slow = slow.await.unwrap();
    let fast = fast.await.unwrap();

    // Both read the same version before anyone wrote
    assert_eq!(slow.observed, Some(CounterRow::versioned(10, 1)));
    assert_eq!(fast.observed, Some(CounterRow::versioned(10, 1)));

    assert_eq!(
        fast.outcome,
        WorkerOutcome::Decremented {
            from: 10,
            to: 9,
            version: Some(2)
        }
    );
    assert!(slow.is_conflict());
    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(9, 2)
    );
}

#[tokio::test]
async fn test_conditional_write_reports_rows_affected() {
    let store = seeded(10, 1).await;

    let mut stale = assert_ok!(store.begin_deferred().await);
    assert_eq!(assert_ok!(stale.write_decrement(COUNTER, Some(7)).await), 0);
    assert_ok!(stale.rollback().await);

    let mut fresh = assert_ok!(store.begin_deferred().await);
    assert_eq!(assert_ok!(fresh.write_decrement(COUNTER, Some(1)).await), 1);
    let info = assert_ok!(fresh.commit().await);
    assert_eq!(info.rows_written, 1);

    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(9, 2)
    );
}

#[tokio::test]
async fn test_loser_leaves_no_side_effects() {
    let store = seeded(10, 1).await;

    let mut loser = assert_ok!(store.begin_deferred().await);
    let seen = assert_ok!(loser.read(COUNTER).await);
    assert_eq!(seen, CounterRow::versioned(10, 1));

    let mut winner = assert_ok!(store.begin_deferred().await);
    assert_eq!(assert_ok!(winner.write_decrement(COUNTER, Some(1)).await), 1);
    assert_ok!(winner.commit().await);

    assert_eq!(assert_ok!(loser.write_decrement(COUNTER, Some(1)).await), 0);
    assert_ok!(loser.rollback().await);

    let stats = store.stats().await;
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.active_transactions, 0);
    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(9, 2)
    );
}

#[tokio::test]
async fn test_write_while_locked_conflicts_immediately() {
    let store = seeded(10, 1).await;

    let mut holder = assert_ok!(store.begin_deferred().await);
    assert_ok!(holder.write_decrement(COUNTER, Some(1)).await);

    let mut other = assert_ok!(store.begin_deferred().await);
    let err = assert_err!(other.write_decrement(COUNTER, Some(1)).await);
    assert!(err.is_conflict());
    drop(other);

    assert_ok!(holder.commit().await);
    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(9, 2)
    );
}

#[tokio::test]
async fn test_floor_never_writes() {
    let store = seeded(0, 3).await;
    let worker = OptimisticWorker::new(store.clone(), COUNTER);

    let report = worker.run("t1", Duration::ZERO).await;

    assert_eq!(report.outcome, WorkerOutcome::NoOp { value: 0 });
    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(0, 3)
    );
}

#[tokio::test]
async fn test_conditional_write_on_zero_is_rejected() {
    let store = seeded(0, 1).await;
    let mut txn = assert_ok!(store.begin_deferred().await);

    let err = assert_err!(txn.write_decrement(COUNTER, Some(1)).await);
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    drop(txn);

    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(0, 1)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_readers_one_winner() {
    let harness = Harness::new(Store::new());
    let workers = (1..=5)
        .map(|i| WorkerSpec::new(&format!("t{}", i), Duration::from_millis(5 * i)))
        .collect();
    let config = HarnessConfig::optimistic().workers(workers);

    let report = assert_ok!(harness.run(&config).await);

    assert_eq!(report.decrements(), 1);
    assert_eq!(report.conflicts(), 4);
    assert_eq!(report.final_counter, CounterRow::versioned(9, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_without_rendezvous_no_update_is_lost() {
    let harness = Harness::new(Store::new());
    let config = HarnessConfig::optimistic()
        .read_rendezvous(false)
        .delays(Duration::from_millis(20), Duration::ZERO);

    let report = assert_ok!(harness.run(&config).await);

    // Either both serialized cleanly or one lost the race; never a lost update
    let decrements = report.decrements() as i64;
    assert!(decrements >= 1);
    assert_eq!(report.decrements() + report.conflicts(), 2);
    assert_eq!(report.final_counter.value, 10 - decrements);
    assert_eq!(report.final_counter.version, Some(1 + decrements as u64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_between_read_and_write_conflicts() {
    let store = seeded(10, 1).await;
    let barrier = Arc::new(Barrier::new(2));
    let worker = OptimisticWorker::new(store.clone(), COUNTER)
        .with_read_barrier(Arc::clone(&barrier));

    let run = tokio::spawn(async move { worker.run("t1", Duration::from_millis(50)).await });

    barrier.wait().await;
    assert_ok!(store.reset(Counter::versioned(COUNTER, 10, 1)).await);

    let report = run.await.unwrap();
    assert!(report.is_conflict());
    assert_eq!(
        assert_ok!(store.read(COUNTER).await),
        CounterRow::versioned(10, 1)
    );
}
