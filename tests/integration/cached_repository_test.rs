//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 缓存仓库集成测试：读写路径、指纹并发控制、对账和钩子

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{setup_logging, unique_name, HookEvent, RecordingHooks, Widget};
use oxsync::cache::{Cache, MemoryCache, Retention};
use oxsync::context::SyncContext;
use oxsync::error::{Result, SyncError};
use oxsync::locker::MemoryLocker;
use oxsync::metrics::GLOBAL_METRICS;
use oxsync::repository::{
    CacheAction, CacheActionCause, CachedRepository, ChangeKind, MemoryRepository, Processor,
    Repository,
};
use oxsync::serialization::{CanonicalJson, ContentIdentity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    repo: Arc<MemoryRepository<Widget, String>>,
    cache: Arc<MemoryCache<Widget>>,
    hooks: Arc<RecordingHooks>,
    cached: CachedRepository<Widget, Widget, String>,
}

fn fixture() -> Fixture {
    fixture_with(MemoryRepository::new(), RecordingHooks::new())
}

fn fixture_with(repo: MemoryRepository<Widget, String>, hooks: RecordingHooks) -> Fixture {
    setup_logging();
    let repo = Arc::new(repo);
    let cache = Arc::new(MemoryCache::<Widget>::new());
    let hooks = Arc::new(hooks);
    let cached = CachedRepository::identity(unique_name("widgets"), repo.clone(), cache.clone())
        .with_locker(Arc::new(MemoryLocker::new()))
        .with_hooks(hooks.clone());
    Fixture {
        repo,
        cache,
        hooks,
        cached,
    }
}

#[tokio::test]
async fn test_create_then_read_returns_entity_and_fingerprint() {
    let f = fixture();
    let ctx = SyncContext::background();
    let widget = Widget::new("gear", 3);

    f.cached
        .create(&ctx, "gear", &widget, Some(&"alice".to_string()))
        .await
        .unwrap();

    let (read, fingerprint) = f.cached.read(&ctx, "gear").await.unwrap();
    assert_eq!(read, widget);
    assert_eq!(fingerprint, CanonicalJson.fingerprint(&widget).unwrap());

    let changes = f.repo.changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Created);
    assert_eq!(changes[0].context.as_deref(), Some("alice"));

    assert_eq!(
        f.hooks.events(),
        vec![
            HookEvent::RepositoryCreated("gear".to_string()),
            HookEvent::Cache(
                "gear".to_string(),
                CacheAction::Added,
                CacheActionCause::RepositoryAction
            ),
        ]
    );
}

#[tokio::test]
async fn test_create_existing_entity_leaves_cache_untouched() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.repo.insert("gear", Widget::new("gear", 1)).await;

    let err = f
        .cached
        .create(&ctx, "gear", &Widget::new("gear", 2), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::EntityExists(_)));
    assert_eq!(f.cache.get("gear").await.unwrap(), None);
    assert!(f.hooks.events().is_empty());
}

#[tokio::test]
async fn test_delete_then_read_is_not_found() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.cached
        .create(&ctx, "gear", &Widget::new("gear", 3), None)
        .await
        .unwrap();

    f.cached.delete(&ctx, "gear", None).await.unwrap();

    let err = f.cached.read(&ctx, "gear").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(f.cache.get("gear").await.unwrap(), None);
    assert!(f
        .hooks
        .events()
        .contains(&HookEvent::RepositoryDeleted("gear".to_string())));
}

#[tokio::test]
async fn test_delete_missing_entity_is_not_found() {
    let f = fixture();
    let err = f
        .cached
        .delete(&SyncContext::background(), "ghost", None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(f.hooks.events().is_empty());
}

#[tokio::test]
async fn test_read_miss_reconciles_exactly_once() {
    let f = fixture();
    let ctx = SyncContext::background();
    let widget = Widget::new("bolt", 7);
    f.repo.insert("bolt", widget.clone()).await;

    let (read, _) = f.cached.read(&ctx, "bolt").await.unwrap();
    assert_eq!(read, widget);
    // 第二次读取命中缓存，不再对账
    f.cached.read(&ctx, "bolt").await.unwrap();

    assert_eq!(
        f.hooks.cache_events(),
        vec![(
            "bolt".to_string(),
            CacheAction::Added,
            CacheActionCause::Reconciliation
        )]
    );
    assert_eq!(
        GLOBAL_METRICS.cache_action_count(f.cached.key(), "added", "reconciliation"),
        1
    );
}

#[tokio::test]
async fn test_stale_fingerprint_is_rejected_without_mutation() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap();
    let (_, first) = f.cached.read(&ctx, "gear").await.unwrap();

    f.cached
        .update(&ctx, "gear", &Widget::new("gear", 2), &first, None)
        .await
        .unwrap();
    f.hooks.clear();

    let err = f
        .cached
        .update(&ctx, "gear", &Widget::new("gear", 3), &first, None)
        .await
        .unwrap_err();
    match err {
        SyncError::HashMismatch { provided, actual } => {
            assert_eq!(provided, first);
            assert_eq!(actual, CanonicalJson.fingerprint(&Widget::new("gear", 2)).unwrap());
        }
        other => panic!("expected hash mismatch, got {other:?}"),
    }

    assert_eq!(f.repo.read(&ctx, "gear").await.unwrap(), Widget::new("gear", 2));
    let updates = f
        .repo
        .changes()
        .await
        .into_iter()
        .filter(|c| c.kind == ChangeKind::Updated)
        .count();
    assert_eq!(updates, 1);
    // 冲突后的对账发现缓存已是最新，不触发钩子
    assert!(f.hooks.events().is_empty());
}

#[tokio::test]
async fn test_update_then_stale_update_fires_single_update_hook() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap();
    let (_, fingerprint) = f.cached.read(&ctx, "gear").await.unwrap();
    f.hooks.clear();

    f.cached
        .update(&ctx, "gear", &Widget::new("gear", 2), &fingerprint, None)
        .await
        .unwrap();
    let stale = f
        .cached
        .update(&ctx, "gear", &Widget::new("gear", 3), &fingerprint, None)
        .await;
    assert!(stale.unwrap_err().is_hash_mismatch());

    assert_eq!(
        f.hooks.events(),
        vec![
            HookEvent::RepositoryUpdated("gear".to_string()),
            HookEvent::Cache(
                "gear".to_string(),
                CacheAction::Updated,
                CacheActionCause::RepositoryAction
            ),
        ]
    );
}

#[tokio::test]
async fn test_fingerprint_tracks_content() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap();

    let (_, a) = f.cached.read(&ctx, "gear").await.unwrap();
    let (_, b) = f.cached.read(&ctx, "gear").await.unwrap();
    assert_eq!(a, b);

    f.cached
        .update(&ctx, "gear", &Widget::new("gear", 9), &a, None)
        .await
        .unwrap();
    let (_, c) = f.cached.read(&ctx, "gear").await.unwrap();
    assert_ne!(a, c);
}

#[tokio::test]
async fn test_update_matching_cache_short_circuits() {
    let f = fixture();
    let ctx = SyncContext::background();
    let widget = Widget::new("gear", 1);
    f.cached.create(&ctx, "gear", &widget, None).await.unwrap();
    f.hooks.clear();

    // 缓存已等于目标值时不校验指纹
    f.cached
        .update(&ctx, "gear", &widget, "not-a-fingerprint", None)
        .await
        .unwrap();

    assert!(f.hooks.events().is_empty());
    assert!(f
        .repo
        .changes()
        .await
        .iter()
        .all(|c| c.kind != ChangeKind::Updated));
}

#[tokio::test]
async fn test_update_missing_entity_is_not_found() {
    let f = fixture();
    let err = f
        .cached
        .update(
            &SyncContext::background(),
            "ghost",
            &Widget::new("ghost", 1),
            "anything",
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_reconcile_all_repairs_and_is_idempotent() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.repo.insert("a", Widget::new("a", 1)).await;
    f.repo.insert("b", Widget::new("b", 2)).await;
    f.repo.insert("c", Widget::new("c", 3)).await;
    f.cache.set("b", &Widget::new("b", 20), None).await.unwrap();
    f.cache
        .set("orphan", &Widget::new("orphan", 0), None)
        .await
        .unwrap();

    f.cached.reconcile_all(&ctx).await.unwrap();

    let mut events = f.hooks.cache_events();
    events.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(
        events,
        vec![
            ("a".to_string(), CacheAction::Added, CacheActionCause::Reconciliation),
            ("b".to_string(), CacheAction::Updated, CacheActionCause::Reconciliation),
            ("c".to_string(), CacheAction::Added, CacheActionCause::Reconciliation),
            ("orphan".to_string(), CacheAction::Removed, CacheActionCause::Reconciliation),
        ]
    );
    let entries = f.cache.entries().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries["b"], Widget::new("b", 2));

    f.hooks.clear();
    f.cached.reconcile_all(&ctx).await.unwrap();
    assert!(f.hooks.events().is_empty());
}

#[tokio::test]
async fn test_reconcile_reports_action() {
    let f = fixture();
    let ctx = SyncContext::background();
    assert_eq!(f.cached.reconcile(&ctx, "x").await.unwrap(), CacheAction::NoOp);

    f.repo.insert("x", Widget::new("x", 1)).await;
    assert_eq!(f.cached.reconcile(&ctx, "x").await.unwrap(), CacheAction::Added);
    assert_eq!(f.cached.reconcile(&ctx, "x").await.unwrap(), CacheAction::NoOp);

    f.repo.insert("x", Widget::new("x", 2)).await;
    assert_eq!(f.cached.reconcile(&ctx, "x").await.unwrap(), CacheAction::Updated);

    f.repo.remove("x").await;
    assert_eq!(f.cached.reconcile(&ctx, "x").await.unwrap(), CacheAction::Removed);
}

#[tokio::test]
async fn test_read_all_warms_empty_cache() {
    let f = fixture();
    let ctx = SyncContext::background();
    f.repo.insert("a", Widget::new("a", 1)).await;
    f.repo.insert("b", Widget::new("b", 2)).await;

    let all = f.cached.read_all(&ctx).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(f.cache.keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_repository_normalization_is_cached() {
    let repo = MemoryRepository::new().with_normalizer(|_name, mut widget: Widget| {
        widget.tags.sort();
        widget.tags.dedup();
        widget
    });
    let f = fixture_with(repo, RecordingHooks::new());
    let ctx = SyncContext::background();

    let mut widget = Widget::new("gear", 1);
    widget.tags = vec!["b".to_string(), "a".to_string(), "b".to_string()];
    f.cached.create(&ctx, "gear", &widget, None).await.unwrap();

    let (read, fingerprint) = f.cached.read(&ctx, "gear").await.unwrap();
    assert_eq!(read.tags, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(fingerprint, CanonicalJson.fingerprint(&read).unwrap());
}

#[tokio::test]
async fn test_cache_hook_failure_keeps_repository_write() {
    let f = fixture_with(MemoryRepository::new(), RecordingHooks::failing());
    let ctx = SyncContext::background();

    let err = f
        .cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Hook(_)));
    assert_eq!(f.repo.len().await, 1);
}

#[tokio::test]
async fn test_delete_hook_failure_is_not_propagated() {
    let f = fixture_with(MemoryRepository::new(), RecordingHooks::failing_repository_hooks());
    let ctx = SyncContext::background();
    f.repo.insert("gear", Widget::new("gear", 1)).await;
    f.cache.set("gear", &Widget::new("gear", 1), None).await.unwrap();

    f.cached.delete(&ctx, "gear", None).await.unwrap();

    assert!(f.repo.is_empty().await);
    assert_eq!(f.cache.get("gear").await.unwrap(), None);
    assert!(f
        .hooks
        .events()
        .contains(&HookEvent::RepositoryDeleted("gear".to_string())));
}

#[tokio::test]
async fn test_create_hook_failure_keeps_repository_write() {
    let f = fixture_with(MemoryRepository::new(), RecordingHooks::failing_repository_hooks());
    let ctx = SyncContext::background();

    let err = f
        .cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Hook(_)));
    assert_eq!(f.repo.len().await, 1);
    assert_eq!(f.cache.get("gear").await.unwrap(), None);

    let (read, _) = f.cached.read(&ctx, "gear").await.unwrap();
    assert_eq!(read, Widget::new("gear", 1));
}

/// 对特定实体处理失败的处理器
struct RejectingProcessor {
    rejected_size: u32,
}

#[async_trait]
impl Processor<Widget, Widget> for RejectingProcessor {
    async fn process(&self, _ctx: &SyncContext, base: &Widget) -> Result<Widget> {
        if base.size == self.rejected_size || base.name.starts_with("bad") {
            return Err(SyncError::Processor(format!("cannot process '{}'", base.name)));
        }
        Ok(base.clone())
    }

    async fn inverse_process(&self, _ctx: &SyncContext, view: &Widget) -> Result<Widget> {
        Ok(view.clone())
    }
}

fn rejecting_fixture() -> (
    Arc<MemoryRepository<Widget, String>>,
    Arc<MemoryCache<Widget>>,
    CachedRepository<Widget, Widget, String>,
) {
    setup_logging();
    let repo = Arc::new(MemoryRepository::<Widget, String>::new());
    let cache = Arc::new(MemoryCache::<Widget>::new());
    let cached = CachedRepository::new(
        unique_name("rejecting"),
        repo.clone(),
        cache.clone(),
        Arc::new(RejectingProcessor { rejected_size: 13 }),
    )
    .with_locker(Arc::new(MemoryLocker::new()));
    (repo, cache, cached)
}

#[tokio::test]
async fn test_processor_failure_after_update_keeps_repository_write() {
    let (repo, cache, cached) = rejecting_fixture();
    let ctx = SyncContext::background();
    cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap();
    let (_, fingerprint) = cached.read(&ctx, "gear").await.unwrap();

    let err = cached
        .update(&ctx, "gear", &Widget::new("gear", 13), &fingerprint, None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Processor(_)));
    assert_eq!(
        repo.read(&ctx, "gear").await.unwrap(),
        Widget::new("gear", 13)
    );
    assert_eq!(cache.get("gear").await.unwrap(), Some(Widget::new("gear", 1)));
}

#[tokio::test]
async fn test_reconcile_all_continues_past_failures() {
    let (repo, cache, cached) = rejecting_fixture();
    let ctx = SyncContext::background();
    repo.insert("a", Widget::new("a", 1)).await;
    repo.insert("bad-1", Widget::new("bad-1", 2)).await;
    repo.insert("bad-2", Widget::new("bad-2", 3)).await;
    repo.insert("z", Widget::new("z", 4)).await;

    let err = cached.reconcile_all(&ctx).await.unwrap_err();

    match err {
        SyncError::Multiple(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().all(|e| matches!(e, SyncError::Processor(_))));
        }
        other => panic!("expected joined errors, got {other:?}"),
    }
    let mut keys = cache.keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["a".to_string(), "z".to_string()]);
}

#[tokio::test]
async fn test_read_all_returns_full_snapshot_of_large_repository() {
    let f = fixture();
    let ctx = SyncContext::background();
    for i in 0..500 {
        let name = format!("w{}", i);
        f.repo.insert(name.clone(), Widget::new(&name, i)).await;
    }

    assert_eq!(f.cached.read_all(&ctx).await.unwrap().len(), 500);
    assert_eq!(f.cached.read_all(&ctx).await.unwrap().len(), 500);
}

#[tokio::test]
async fn test_cancelled_context_does_not_mutate() {
    let f = fixture();
    let ctx = SyncContext::background();
    ctx.cancel();

    let err = f
        .cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::LockUnavailable(_) | SyncError::Cancelled
    ));
    assert!(f.repo.is_empty().await);
}

#[tokio::test]
async fn test_retention_is_applied_to_cache_writes() {
    setup_logging();
    let repo = Arc::new(MemoryRepository::<Widget, String>::new());
    let cache = Arc::new(MemoryCache::<Widget>::new());
    let cached = CachedRepository::identity(unique_name("ttl"), repo, cache.clone())
        .with_retention(Some(Duration::from_secs(3600)));
    let ctx = SyncContext::background();

    cached
        .create(&ctx, "gear", &Widget::new("gear", 1), None)
        .await
        .unwrap();

    match cache.remaining_retention("gear").await.unwrap() {
        Retention::Expires(left) => assert!(left <= Duration::from_secs(3600)),
        other => panic!("expected expiring entry, got {other:?}"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WidgetView {
    name: String,
    size: u32,
    tags: Vec<String>,
    area: u64,
}

struct AreaProcessor;

#[async_trait]
impl Processor<Widget, WidgetView> for AreaProcessor {
    async fn process(&self, _ctx: &SyncContext, base: &Widget) -> Result<WidgetView> {
        Ok(WidgetView {
            name: base.name.clone(),
            size: base.size,
            tags: base.tags.clone(),
            area: u64::from(base.size) * u64::from(base.size),
        })
    }

    async fn inverse_process(&self, _ctx: &SyncContext, view: &WidgetView) -> Result<Widget> {
        Ok(Widget {
            name: view.name.clone(),
            size: view.size,
            tags: view.tags.clone(),
        })
    }
}

#[tokio::test]
async fn test_processed_entities_fingerprint_base_form() {
    setup_logging();
    let repo = Arc::new(MemoryRepository::<Widget, String>::new());
    let cache = Arc::new(MemoryCache::<WidgetView>::new());
    let cached = CachedRepository::new(
        unique_name("views"),
        repo.clone(),
        cache,
        Arc::new(AreaProcessor),
    );
    let ctx = SyncContext::background();
    let widget = Widget::new("plate", 4);

    cached.create(&ctx, "plate", &widget, None).await.unwrap();
    let (view, fingerprint) = cached.read(&ctx, "plate").await.unwrap();

    assert_eq!(view.area, 16);
    assert_eq!(fingerprint, cached.fingerprint(&widget).unwrap());

    cached
        .update(&ctx, "plate", &Widget::new("plate", 5), &fingerprint, None)
        .await
        .unwrap();
    let (view, _) = cached.read(&ctx, "plate").await.unwrap();
    assert_eq!(view.area, 25);
}
