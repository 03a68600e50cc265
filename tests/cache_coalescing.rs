use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use vizier::cache::CacheStatus;
use vizier::dispatch::{DispatchError, FetchOutcome, FetchResult};
use vizier::store::Row;
use vizier::{fingerprint, ResultCache};

fn outcome_with_rows(n: usize) -> FetchOutcome {
    let rows: Vec<Row> = (0..n)
        .map(|i| {
            let mut row = Row::new();
            row.insert("v".into(), json!(i));
            row
        })
        .collect();
    FetchOutcome {
        result: FetchResult::new(rows, Some("SELECT v FROM t".into())),
        messages: Vec::new(),
    }
}

/// N concurrent callers for one fingerprint run the computation exactly once
/// and all observe the same rows.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_queries_share_one_computation() {
    let cache = Arc::new(ResultCache::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());
    let key = fingerprint("sales", "monthly revenue");

    // Leader registers the in-flight computation, then blocks until released.
    let leader = {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let release = Arc::clone(&release);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok(outcome_with_rows(3))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let followers: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(outcome_with_rows(999))
                    })
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_waiters();

    let (leader_outcome, leader_status) = leader.await.unwrap();
    assert_eq!(leader_outcome.unwrap().result.total_rows, 3);
    assert_eq!(leader_status, CacheStatus::Computed);

    for follower in followers {
        let (outcome, status) = follower.await.unwrap();
        assert_eq!(outcome.unwrap().result.total_rows, 3);
        assert_eq!(status, CacheStatus::Coalesced);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get(&key).map(|r| r.total_rows), Some(3));
}

/// A failing computation fans the same error out to every waiter and leaves
/// the cache empty, so the next caller recomputes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_fans_out_to_all_waiters_and_is_not_cached() {
    let cache = Arc::new(ResultCache::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());
    let key = fingerprint("sales", "monthly revenue");

    let leader = {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let release = Arc::clone(&release);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Err(DispatchError::Store("connection refused".into()))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let followers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, move || async move {
                        Err(DispatchError::Store("unreachable".into()))
                    })
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_waiters();

    let (leader_outcome, _) = leader.await.unwrap();
    assert!(matches!(
        leader_outcome.unwrap_err(),
        DispatchError::Store(msg) if msg == "connection refused"
    ));
    for follower in followers {
        let (outcome, status) = follower.await.unwrap();
        assert!(matches!(
            outcome.unwrap_err(),
            DispatchError::Store(msg) if msg == "connection refused"
        ));
        assert_eq!(status, CacheStatus::Coalesced);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get(&key).is_none());

    // A fresh caller after settlement runs its own computation.
    let (outcome, status) = cache
        .get_or_compute(&key, || async { Ok(outcome_with_rows(2)) })
        .await;
    assert_eq!(outcome.unwrap().result.total_rows, 2);
    assert_eq!(status, CacheStatus::Computed);
}

/// A waiter that attached to an in-flight computation but wakes only after
/// the settled entry has been cleared must not republish it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_waiter_does_not_resurrect_cleared_entry() {
    let cache = Arc::new(ResultCache::new());
    let release = Arc::new(Notify::new());
    let key = fingerprint("sales", "monthly revenue");

    let leader = {
        let cache = Arc::clone(&cache);
        let release = Arc::clone(&release);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&key, move || async move {
                    release.notified().await;
                    Ok(outcome_with_rows(3))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Attach a waiter to the pending computation but park it un-driven.
    let waiter_cache = Arc::clone(&cache);
    let waiter_key = key.clone();
    let mut waiter = Box::pin(async move {
        waiter_cache
            .get_or_compute(&waiter_key, || async {
                Err(DispatchError::Store("must coalesce".into()))
            })
            .await
    });
    assert!(futures::poll!(waiter.as_mut()).is_pending());

    release.notify_waiters();
    let (outcome, _) = leader.await.unwrap();
    assert_eq!(outcome.unwrap().result.total_rows, 3);
    assert_eq!(cache.get(&key).map(|r| r.total_rows), Some(3));

    cache.clear(Some("sales"));
    assert!(cache.get(&key).is_none());

    // Driving the parked waiter yields the settled result and leaves the
    // cleared cache alone.
    let (outcome, status) = waiter.await;
    assert_eq!(outcome.unwrap().result.total_rows, 3);
    assert_eq!(status, CacheStatus::Coalesced);
    assert!(cache.get(&key).is_none());
}

/// Empty results are returned to the caller but never stored.
#[tokio::test]
async fn empty_results_pass_through_without_caching() {
    let cache = ResultCache::new();
    let key = fingerprint("sales", "rows from the future");

    let (outcome, _) = cache
        .get_or_compute(&key, || async { Ok(outcome_with_rows(0)) })
        .await;
    assert_eq!(outcome.unwrap().result.total_rows, 0);
    assert!(cache.get(&key).is_none());

    let (_, status) = cache
        .get_or_compute(&key, || async { Ok(outcome_with_rows(5)) })
        .await;
    assert_eq!(status, CacheStatus::Computed);
    assert_eq!(cache.get(&key).map(|r| r.total_rows), Some(5));
}

/// clear(Some(source)) drops exactly that source's entries.
#[tokio::test]
async fn clear_is_prefix_scoped_to_the_source() {
    let cache = ResultCache::new();
    for (source, query) in [("sales", "q1"), ("sales", "q2"), ("inventory", "q1")] {
        let (outcome, _) = cache
            .get_or_compute(&fingerprint(source, query), || async {
                Ok(outcome_with_rows(1))
            })
            .await;
        assert!(outcome.is_ok());
    }
    assert_eq!(cache.len(), 3);

    cache.clear(Some("sales"));
    assert!(cache.get(&fingerprint("sales", "q1")).is_none());
    assert!(cache.get(&fingerprint("sales", "q2")).is_none());
    assert!(cache.get(&fingerprint("inventory", "q1")).is_some());

    cache.clear(None);
    assert!(cache.is_empty());
}
