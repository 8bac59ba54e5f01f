//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 进程内锁测试

#[path = "../common/mod.rs"]
mod common;

use common::setup_logging;
use oxsync::context::SyncContext;
use oxsync::error::SyncError;
use oxsync::locker::{LockTable, Locker, MemoryLocker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_held_lock_times_out_with_lock_unavailable() {
    setup_logging();
    let locker = MemoryLocker::new().with_retry(Duration::from_millis(5), Duration::from_millis(20));
    let ctx = SyncContext::background();
    let _lease = locker.obtain_lock(&ctx, "job").await.unwrap();

    let err = locker
        .obtain_lock(&ctx.with_timeout(Duration::from_millis(50)), "job")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::LockUnavailable(key) if key == "job"));
}

#[tokio::test]
async fn test_lease_ends_with_parent_deadline() {
    setup_logging();
    let locker = MemoryLocker::new();
    let ctx = SyncContext::background().with_timeout(Duration::from_millis(50));
    let lease = locker.obtain_lock(&ctx, "job").await.unwrap();
    assert!(!lease.is_lost());

    lease.context().done().await;
    assert!(lease.is_lost());
    assert!(matches!(
        lease.context().err(),
        Some(SyncError::DeadlineExceeded)
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!locker.table().is_held("job"));
}

#[tokio::test]
async fn test_stale_release_does_not_free_new_owner() {
    setup_logging();
    let table = Arc::new(LockTable::new());
    let locker = MemoryLocker::with_table(table.clone());
    let ctx = SyncContext::background();

    let mut first = locker.obtain_lock(&ctx, "job").await.unwrap();
    first.release();
    let _second = locker.obtain_lock(&ctx, "job").await.unwrap();

    // 旧租约再次释放不影响新持有者
    first.release();
    drop(first);
    assert!(table.is_held("job"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_across_lockers() {
    setup_logging();
    let table = Arc::new(LockTable::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let ctx = SyncContext::background();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let locker = MemoryLocker::with_table(table.clone())
            .with_retry(Duration::from_millis(1), Duration::from_millis(10));
        let inside = inside.clone();
        let violations = violations.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                let _lease = locker.obtain_lock(&ctx, "critical").await.unwrap();
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert!(table.is_empty());
}
