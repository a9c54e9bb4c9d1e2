//! At-most-once memoization under concurrency.

use promptloom::cache::{CacheError, CacheLayer};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn concurrent_cold_misses_compute_exactly_once() {
    let cache = Arc::new(CacheLayer::new(None));
    let computations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let computations = computations.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute("rules:ESS", None, || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    // Hold the computation open long enough that every other
                    // caller observes the miss and parks.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!(["rule-1", "rule-2"]))
                })
                .await
        }));
    }

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| v == &json!(["rule-1", "rule-2"])));
}

#[tokio::test]
async fn concurrent_waiters_share_the_propagated_failure() {
    let cache = Arc::new(CacheLayer::new(None));
    let computations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let cache = cache.clone();
        let computations = computations.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute("flaky", None, || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err("upstream unavailable".into())
                })
                .await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        match err {
            CacheError::ComputationFailed { key, message } => {
                assert_eq!(key, "flaky");
                assert_eq!(message, "upstream unavailable");
            }
        }
    }
    assert_eq!(computations.load(Ordering::SeqCst), 1);

    // The failure was not stored; the next caller recomputes and succeeds.
    let value = cache
        .get_or_compute("flaky", None, || async { Ok(json!("recovered")) })
        .await
        .unwrap();
    assert_eq!(value, json!("recovered"));
}

#[tokio::test]
async fn distinct_keys_do_not_serialize_behind_each_other() {
    let cache = Arc::new(CacheLayer::new(None));

    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute("slow", None, || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("slow"))
                })
                .await
        })
    };

    // The fast key must complete while the slow computation is in flight.
    let fast = tokio::time::timeout(
        Duration::from_millis(100),
        cache.get_or_compute("fast", None, || async { Ok(json!("fast")) }),
    )
    .await
    .expect("fast key must not wait for the slow one")
    .unwrap();

    assert_eq!(fast, json!("fast"));
    assert_eq!(slow.await.unwrap().unwrap(), json!("slow"));
}

#[tokio::test]
async fn invalidate_forces_recomputation() {
    let cache = CacheLayer::new(None);
    cache
        .get_or_compute("k", None, || async { Ok(json!("v1")) })
        .await
        .unwrap();

    cache.invalidate("k");

    let value = cache
        .get_or_compute("k", None, || async { Ok(json!("v2")) })
        .await
        .unwrap();
    assert_eq!(value, json!("v2"));
}
