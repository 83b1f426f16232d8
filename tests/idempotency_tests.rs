mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coordination_engine::error::AppError;
use coordination_engine::idempotency::IdempotencyCoordinator;
use coordination_engine::store::{KeyValueStore, UnavailableStore};

#[tokio::test]
async fn test_replay_returns_original_result_without_re_executing() {
    let store = common::memory_store();
    let coordinator =
        IdempotencyCoordinator::new(Arc::clone(&store), common::idempotency_settings());
    let executions = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&executions);
    let first: String = coordinator
        .execute("order-1", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("receipt-1".to_string())
        })
        .await
        .expect("first call failed");

    // Different operation body with the same key; it must not run.
    let second: String = coordinator
        .execute("order-1", || async { Ok("receipt-2".to_string()) })
        .await
        .expect("replay call failed");

    assert_eq!(first, "receipt-1");
    assert_eq!(second, "receipt-1");
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.metrics().snapshot().replayed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_concurrent_execution() {
    let store = common::memory_store();
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        Arc::clone(&store),
        common::idempotency_settings(),
    ));
    let executions = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(8));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        let executions = Arc::clone(&executions);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            coordinator
                .execute("order-42", || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok("receipt-42".to_string())
                })
                .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(value) => {
                // Late arrivals may see the cached result instead of the
                // conflict, but every success observes the one value.
                assert_eq!(value, "receipt-42");
                successes += 1;
            }
            Err(AppError::ConcurrentExecution) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(successes >= 1);
    assert_eq!(successes + conflicts, 8);
}

#[tokio::test]
async fn test_failed_operation_releases_lock_and_caches_nothing() {
    let store = common::memory_store();
    let coordinator =
        IdempotencyCoordinator::new(Arc::clone(&store), common::idempotency_settings());

    let err = coordinator
        .execute::<String, _, _>("order-9", || async {
            Err(AppError::Internal(anyhow::anyhow!("downstream rejected")))
        })
        .await
        .expect_err("operation error must propagate");
    assert!(matches!(err, AppError::Internal(_)));

    // Lock released and no response cached: the retry re-executes.
    let result: String = coordinator
        .execute("order-9", || async { Ok("recovered".to_string()) })
        .await
        .expect("retry failed");
    assert_eq!(result, "recovered");
}

#[tokio::test]
async fn test_call_while_lock_held_surfaces_conflict() {
    let store = common::memory_store();
    let coordinator =
        IdempotencyCoordinator::new(Arc::clone(&store), common::idempotency_settings());

    // A second process instance holds the lock for this key.
    let held = store
        .set_if_absent(&coordinator.lock_key("order-7"), "other-token", 30)
        .await
        .unwrap();
    assert!(held);

    let err = coordinator
        .execute::<String, _, _>("order-7", || async { Ok("never".to_string()) })
        .await
        .expect_err("expected conflict");
    assert!(err.is_conflict());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_caller_still_releases_lock() {
    let store = common::memory_store();
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        Arc::clone(&store),
        common::idempotency_settings(),
    ));

    let task = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .execute::<String, _, _>("order-5", || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("never".to_string())
                })
                .await
        })
    };

    // Wait until the lock is visible, then cancel mid-operation.
    let lock_key = coordinator.lock_key("order-5");
    for _ in 0..100 {
        if store.get(&lock_key).await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(store.get(&lock_key).await.unwrap().is_some());

    task.abort();
    assert!(task.await.expect_err("task should be cancelled").is_cancelled());

    // The drop guard schedules the release on the runtime; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get(&lock_key).await.unwrap().is_none());

    let result: String = coordinator
        .execute("order-5", || async { Ok("after-cancel".to_string()) })
        .await
        .expect("key stayed wedged after cancellation");
    assert_eq!(result, "after-cancel");
}

#[tokio::test]
async fn test_store_outage_degrades_lookup_but_fails_lock() {
    let coordinator =
        IdempotencyCoordinator::new(Arc::new(UnavailableStore), common::idempotency_settings());
    let executions = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&executions);
    let err = coordinator
        .execute::<String, _, _>("order-3", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("never".to_string())
        })
        .await
        .expect_err("lock acquisition must not be granted silently");

    // The response lookup fell through, but the lock step surfaced the
    // outage before the operation could run.
    assert!(err.is_store_unavailable());
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_ascii_key_replays_and_conflicts_cleanly() {
    let store = common::memory_store();
    let coordinator =
        IdempotencyCoordinator::new(Arc::clone(&store), common::idempotency_settings());

    // Client-supplied keys are opaque UTF-8; the replay path must handle them.
    let first: String = coordinator
        .execute("주문-2024-0001", || async { Ok("receipt-kr".to_string()) })
        .await
        .expect("first call failed");
    let replay: String = coordinator
        .execute("주문-2024-0001", || async { Ok("other".to_string()) })
        .await
        .expect("replay with a multi-byte key failed");
    assert_eq!(first, "receipt-kr");
    assert_eq!(replay, "receipt-kr");

    // And so must the conflict path.
    store
        .set_if_absent(&coordinator.lock_key("주문-9999-재시도"), "token", 30)
        .await
        .unwrap();
    let err = coordinator
        .execute::<String, _, _>("주문-9999-재시도", || async { Ok("never".to_string()) })
        .await
        .expect_err("expected conflict");
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_corrupt_cached_response_re_executes_and_overwrites() {
    let store = common::memory_store();
    let coordinator =
        IdempotencyCoordinator::new(Arc::clone(&store), common::idempotency_settings());

    store
        .set(&coordinator.response_key("order-8"), "{not json", 600)
        .await
        .unwrap();

    let result: String = coordinator
        .execute("order-8", || async { Ok("fresh".to_string()) })
        .await
        .expect("corrupt cache entry must not fail the call");
    assert_eq!(result, "fresh");

    // The fresh result replaced the corrupt entry and replays normally.
    let replay: String = coordinator
        .execute("order-8", || async { Ok("other".to_string()) })
        .await
        .unwrap();
    assert_eq!(replay, "fresh");
}
