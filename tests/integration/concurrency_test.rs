//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 并发测试：同名实体的写路径串行化、不同实体互不阻塞、租约丢失中止临界区

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{setup_logging, unique_name, Widget};
use oxsync::cache::MemoryCache;
use oxsync::context::SyncContext;
use oxsync::error::{Result, SyncError};
use oxsync::locker::{LockTable, Locker, MemoryLocker};
use oxsync::repository::{CachedRepository, MemoryRepository, Repository};
use rand::Rng;
use serial_test::serial;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 统计同一时刻进行中的写操作数量的仓库
struct InstrumentedRepository {
    inner: MemoryRepository<Widget, String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay: Duration,
}

impl InstrumentedRepository {
    fn new(write_delay: Duration) -> Self {
        Self {
            inner: MemoryRepository::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            write_delay,
        }
    }

    async fn track_write(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.write_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository<Widget, String> for InstrumentedRepository {
    async fn create(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &Widget,
        change: Option<&String>,
    ) -> Result<()> {
        self.track_write().await;
        self.inner.create(ctx, name, entity, change).await
    }

    async fn read_all(&self, ctx: &SyncContext) -> Result<HashMap<String, Widget>> {
        self.inner.read_all(ctx).await
    }

    async fn read(&self, ctx: &SyncContext, name: &str) -> Result<Widget> {
        self.inner.read(ctx, name).await
    }

    async fn update(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &Widget,
        change: Option<&String>,
    ) -> Result<()> {
        self.track_write().await;
        self.inner.update(ctx, name, entity, change).await
    }

    async fn delete(&self, ctx: &SyncContext, name: &str, change: Option<&String>) -> Result<()> {
        self.track_write().await;
        self.inner.delete(ctx, name, change).await
    }
}

fn fast_locker(table: Arc<LockTable>) -> Arc<dyn Locker> {
    Arc::new(
        MemoryLocker::with_table(table)
            .with_retry(Duration::from_millis(2), Duration::from_millis(20)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_updates_are_serialized() {
    setup_logging();
    let repo = Arc::new(InstrumentedRepository::new(Duration::from_millis(5)));
    let cache = Arc::new(MemoryCache::<Widget>::new());
    let table = Arc::new(LockTable::new());
    let key = unique_name("counters");
    let ctx = SyncContext::background();

    // 两个副本共享仓库、缓存和锁表
    let replicas: Vec<Arc<CachedRepository<Widget, Widget, String>>> = (0..2)
        .map(|_| {
            Arc::new(
                CachedRepository::identity(key.clone(), repo.clone(), cache.clone())
                    .with_locker(fast_locker(table.clone())),
            )
        })
        .collect();
    replicas[0]
        .create(&ctx, "counter", &Widget::new("counter", 0), None)
        .await
        .unwrap();

    let writers = 8;
    let mut handles = Vec::new();
    for i in 0..writers {
        let replica = replicas[i % replicas.len()].clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let jitter = rand::thread_rng().gen_range(0..5);
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                let (current, fingerprint) = replica.read(&ctx, "counter").await?;
                let next = Widget::new("counter", current.size + 1);
                match replica.update(&ctx, "counter", &next, &fingerprint, None).await {
                    Ok(()) => return Ok::<(), SyncError>(()),
                    Err(e) if e.is_hash_mismatch() => continue,
                    Err(e) => return Err(e),
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let persisted = repo.read(&ctx, "counter").await.unwrap();
    assert_eq!(persisted.size, writers as u32);
    assert_eq!(repo.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_names_do_not_block() {
    setup_logging();
    let repo = Arc::new(MemoryRepository::<Widget, String>::new());
    let cache = Arc::new(MemoryCache::<Widget>::new());
    let table = Arc::new(LockTable::new());
    let key = unique_name("widgets");
    let cached = CachedRepository::identity(key.clone(), repo, cache)
        .with_locker(fast_locker(table.clone()));
    let ctx = SyncContext::background();

    // 另一个副本正持有 "a" 的锁
    let holder = fast_locker(table.clone());
    let _lease = holder
        .obtain_lock(&ctx, &format!("{}:a:lock", key))
        .await
        .unwrap();

    cached
        .create(
            &ctx.with_timeout(Duration::from_secs(2)),
            "b",
            &Widget::new("b", 1),
            None,
        )
        .await
        .unwrap();

    let blocked = cached
        .create(
            &ctx.with_timeout(Duration::from_millis(100)),
            "a",
            &Widget::new("a", 1),
            None,
        )
        .await
        .unwrap_err();
    assert!(blocked.is_lock_unavailable());
}

#[tokio::test]
async fn test_lease_loss_aborts_critical_section() {
    setup_logging();
    let locker = MemoryLocker::new();
    let parent = SyncContext::background();
    let lease = locker.obtain_lock(&parent, "long-job").await.unwrap();
    let lease_ctx = lease.context().clone();

    let work = tokio::spawn(async move {
        lease_ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    parent.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), work)
        .await
        .expect("critical section should stop once the lease is lost")
        .unwrap();
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(lease.is_lost());
    drop(lease);

    // 丢失的租约已从锁表移除
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!locker.table().is_held("long-job"));
}

#[tokio::test]
async fn test_slow_repository_hits_deadline() {
    setup_logging();
    let repo = Arc::new(InstrumentedRepository::new(Duration::from_secs(30)));
    let cache = Arc::new(MemoryCache::<Widget>::new());
    let cached = CachedRepository::identity(unique_name("slow"), repo.clone(), cache)
        .with_locker(Arc::new(MemoryLocker::new()));

    let ctx = SyncContext::background().with_timeout(Duration::from_millis(100));
    let err = cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::DeadlineExceeded));
    assert!(repo.inner.is_empty().await);
}

#[tokio::test]
async fn test_released_lock_is_reacquired_by_waiter() {
    setup_logging();
    let table = Arc::new(LockTable::new());
    let first = fast_locker(table.clone());
    let second = fast_locker(table.clone());
    let ctx = SyncContext::background();

    let mut lease = first.obtain_lock(&ctx, "shared").await.unwrap();
    let waiter_ctx = ctx.with_timeout(Duration::from_secs(2));
    let waiter = tokio::spawn(async move { second.obtain_lock(&waiter_ctx, "shared").await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());
    lease.release();

    let next = waiter.await.unwrap().unwrap();
    assert_eq!(next.key(), "shared");
    assert!(table.is_held("shared"));
}
