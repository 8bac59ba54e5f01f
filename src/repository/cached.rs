//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存仓库，协调权威仓库、缓存、处理器、锁和钩子。
//!
//! 写操作先落仓库，再重新读取、处理并通过缓存动作更新缓存。仓库是唯一的
//! 事实来源，缓存侧失败不会回滚已提交的写入，只会留下过期缓存等待对账修复。

use super::hooks::{CacheAction, CacheActionCause, Hooks};
use super::processor::{IdentityProcessor, Processor};
use super::Repository;
use crate::cache::Cache;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::locker::{Lease, Locker};
use crate::metrics::GLOBAL_METRICS;
use crate::serialization::{CanonicalJson, ContentIdentity};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// 缓存仓库
///
/// `B` 为仓库中的基础实体，`P` 为缓存中的处理后实体，`C` 为变更上下文。
/// 配置了锁时，同一实体名的写路径在整个集群内串行执行，不同实体名互不阻塞。
pub struct CachedRepository<B, P, C>
where
    B: Send + Sync + 'static,
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    key: String,
    repository: Arc<dyn Repository<B, C>>,
    cache: Arc<dyn Cache<P>>,
    processor: Arc<dyn Processor<B, P>>,
    locker: Option<Arc<dyn Locker>>,
    hooks: Option<Arc<dyn Hooks<P>>>,
    base_identity: Arc<dyn ContentIdentity<B>>,
    processed_identity: Arc<dyn ContentIdentity<P>>,
    retention: Option<Duration>,
}

impl<T, C> CachedRepository<T, T, C>
where
    T: Serialize + Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// 创建缓存与仓库保存相同形态的缓存仓库
    pub fn identity(
        key: impl Into<String>,
        repository: Arc<dyn Repository<T, C>>,
        cache: Arc<dyn Cache<T>>,
    ) -> Self {
        Self::new(
            key,
            repository,
            cache,
            Arc::new(IdentityProcessor::<T>::new()),
        )
    }
}

impl<B, P, C> CachedRepository<B, P, C>
where
    B: Serialize + Send + Sync + 'static,
    P: Serialize + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// 创建缓存仓库
    ///
    /// # 参数
    ///
    /// * `key` - 键空间名称，同时用于锁键和日志
    /// * `repository` - 权威仓库
    /// * `cache` - 保存处理后实体的缓存
    /// * `processor` - 基础实体与处理后实体的转换
    pub fn new(
        key: impl Into<String>,
        repository: Arc<dyn Repository<B, C>>,
        cache: Arc<dyn Cache<P>>,
        processor: Arc<dyn Processor<B, P>>,
    ) -> Self {
        Self {
            key: key.into(),
            repository,
            cache,
            processor,
            locker: None,
            hooks: None,
            base_identity: Arc::new(CanonicalJson),
            processed_identity: Arc::new(CanonicalJson),
            retention: None,
        }
    }

    /// 设置锁，未设置时写路径不做同步
    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// 设置观察者钩子
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks<P>>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// 设置缓存项的保留时间
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// 覆盖基础实体的指纹和相等判断
    pub fn with_base_identity(mut self, identity: Arc<dyn ContentIdentity<B>>) -> Self {
        self.base_identity = identity;
        self
    }

    /// 覆盖处理后实体的相等判断
    pub fn with_processed_identity(mut self, identity: Arc<dyn ContentIdentity<P>>) -> Self {
        self.processed_identity = identity;
        self
    }

    /// 键空间名称
    pub fn key(&self) -> &str {
        &self.key
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}:{}:lock", self.key, name)
    }

    /// 进入实体的临界区
    ///
    /// 返回的租约必须在临界区结束前保持存活；返回的上下文在租约丢失时取消
    async fn enter(&self, ctx: &SyncContext, name: &str) -> Result<(Option<Lease>, SyncContext)> {
        match &self.locker {
            Some(locker) => {
                let lease = locker.obtain_lock(ctx, &self.lock_key(name)).await?;
                let cctx = lease.context().clone();
                Ok((Some(lease), cctx))
            }
            None => Ok((None, ctx.clone())),
        }
    }

    /// 计算基础实体的内容指纹
    pub fn fingerprint(&self, base: &B) -> Result<String> {
        self.base_identity.fingerprint(base)
    }

    /// 创建实体
    ///
    /// 仓库写入失败时缓存保持不变；写入成功后处理或钩子失败会返回错误，
    /// 但不会回滚仓库写入。
    #[instrument(skip(self, ctx, entity, change), fields(repository = %self.key), level = "debug")]
    pub async fn create(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &B,
        change: Option<&C>,
    ) -> Result<()> {
        let (_lease, cctx) = self.enter(ctx, name).await?;

        cctx.run(self.repository.create(&cctx, name, entity, change))
            .await?;
        // 写入时仓库可能改写实体，重新读取持久化后的值
        let persisted = cctx.run(self.repository.read(&cctx, name)).await?;
        let processed = match cctx.run(self.processor.process(&cctx, &persisted)).await {
            Ok(processed) => processed,
            Err(e) => {
                warn!(
                    "failed to process {} entity '{}' after creation, cache will be out of date until reconciliation: {}",
                    self.key, name, e
                );
                return Err(e);
            }
        };
        if let Some(hooks) = &self.hooks {
            if let Err(e) = cctx
                .run(hooks.on_repository_entity_created(&cctx, name, &processed))
                .await
            {
                warn!(
                    "failed to perform hook for {} entity '{}' after creation, cache will be out of date until reconciliation: {}",
                    self.key, name, e
                );
                return Err(e);
            }
        }
        self.apply_cache_action(
            &cctx,
            name,
            Some(&processed),
            CacheActionCause::RepositoryAction,
        )
        .await?;
        Ok(())
    }

    /// 读取实体
    ///
    /// 缓存未命中时同步对账一次后重试。
    ///
    /// # 返回值
    ///
    /// 返回处理后实体以及其基础形态的内容指纹，指纹用作后续 `update` 的并发令牌
    #[instrument(skip(self, ctx), fields(repository = %self.key), level = "debug")]
    pub async fn read(&self, ctx: &SyncContext, name: &str) -> Result<(P, String)> {
        let cached = match ctx.run(self.cache.get(name)).await {
            Ok(Some(cached)) => cached,
            other => {
                if let Err(e) = other {
                    warn!(
                        "failed to read {} entity '{}' from cache, reconciling: {}",
                        self.key, name, e
                    );
                } else {
                    debug!("{} entity '{}' is not cached, reconciling", self.key, name);
                }
                self.reconcile(ctx, name).await?;
                ctx.run(self.cache.get(name))
                    .await?
                    .ok_or_else(|| SyncError::EntityNotFound(name.to_string()))?
            }
        };

        // 指纹在基础形态上计算
        let base = ctx.run(self.processor.inverse_process(ctx, &cached)).await?;
        let fingerprint = self.base_identity.fingerprint(&base)?;
        Ok((cached, fingerprint))
    }

    /// 读取全部实体
    ///
    /// 缓存为空时先全量对账；空仓库与尚未预热的缓存无法区分，此时会多做一次对账。
    /// 结果是缓存的完整快照，缓存自身淘汰的条目不会出现在结果中
    #[instrument(skip(self, ctx), fields(repository = %self.key), level = "debug")]
    pub async fn read_all(&self, ctx: &SyncContext) -> Result<HashMap<String, P>> {
        let cached = ctx.run(self.cache.entries()).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        debug!("{} cache is empty, reconciling all entities", self.key);
        self.reconcile_all(ctx).await?;
        ctx.run(self.cache.entries()).await
    }

    /// 更新实体
    ///
    /// 缓存中的值还原后已等于 `entity` 时直接返回成功，不访问仓库。
    /// 否则在临界区内校验 `expected_fingerprint`，不一致时返回 `HashMismatch`，
    /// 并在释放锁后对该实体做一次尽力而为的对账。
    #[instrument(
        skip(self, ctx, entity, expected_fingerprint, change),
        fields(repository = %self.key),
        level = "debug"
    )]
    pub async fn update(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &B,
        expected_fingerprint: &str,
        change: Option<&C>,
    ) -> Result<()> {
        // 与可能过期的缓存比较，过期窗口由对账频率限定
        if let Some(cached) = ctx.run(self.cache.get(name)).await? {
            let cached_base = ctx.run(self.processor.inverse_process(ctx, &cached)).await?;
            if self.base_identity.equal(entity, &cached_base)? {
                debug!(
                    "{} entity '{}' already matches the cached value, nothing to update",
                    self.key, name
                );
                return Ok(());
            }
        }

        let result = {
            let (_lease, cctx) = self.enter(ctx, name).await?;
            self.checked_update(&cctx, name, entity, expected_fingerprint, change)
                .await
        };

        if let Err(SyncError::HashMismatch { .. }) = &result {
            GLOBAL_METRICS.record_hash_mismatch(&self.key);
            if let Err(e) = self.reconcile(ctx, name).await {
                warn!(
                    "failed to reconcile {} entity '{}' after hash mismatch, cache will be out of date until reconciliation: {}",
                    self.key, name, e
                );
            }
        }
        result
    }

    async fn checked_update(
        &self,
        cctx: &SyncContext,
        name: &str,
        entity: &B,
        expected_fingerprint: &str,
        change: Option<&C>,
    ) -> Result<()> {
        let persisted = cctx.run(self.repository.read(cctx, name)).await?;
        let current = self.base_identity.fingerprint(&persisted)?;
        if current != expected_fingerprint {
            debug!(
                "{} entity '{}' changed since it was read, rejecting update",
                self.key, name
            );
            return Err(SyncError::HashMismatch {
                provided: expected_fingerprint.to_string(),
                actual: current,
            });
        }

        cctx.run(self.repository.update(cctx, name, entity, change))
            .await?;
        let persisted = cctx.run(self.repository.read(cctx, name)).await?;
        let processed = match cctx.run(self.processor.process(cctx, &persisted)).await {
            Ok(processed) => processed,
            Err(e) => {
                warn!(
                    "failed to process {} entity '{}' after update, cache will be out of date until reconciliation: {}",
                    self.key, name, e
                );
                return Err(e);
            }
        };
        if let Some(hooks) = &self.hooks {
            if let Err(e) = cctx
                .run(hooks.on_repository_entity_updated(cctx, name, &processed))
                .await
            {
                warn!(
                    "failed to perform hook for {} entity '{}' after update, cache will be out of date until reconciliation: {}",
                    self.key, name, e
                );
                return Err(e);
            }
        }
        self.apply_cache_action(
            cctx,
            name,
            Some(&processed),
            CacheActionCause::RepositoryAction,
        )
        .await?;
        Ok(())
    }

    /// 删除实体
    ///
    /// 删除钩子失败只记录日志，因为仓库删除已经提交
    #[instrument(skip(self, ctx, change), fields(repository = %self.key), level = "debug")]
    pub async fn delete(&self, ctx: &SyncContext, name: &str, change: Option<&C>) -> Result<()> {
        let (_lease, cctx) = self.enter(ctx, name).await?;

        cctx.run(self.repository.delete(&cctx, name, change)).await?;
        if let Some(hooks) = &self.hooks {
            if let Err(e) = cctx
                .run(hooks.on_repository_entity_deleted(&cctx, name))
                .await
            {
                warn!(
                    "failed to perform hook for {} entity '{}' after deletion: {}",
                    self.key, name, e
                );
            }
        }
        self.apply_cache_action(&cctx, name, None, CacheActionCause::RepositoryAction)
            .await?;
        Ok(())
    }

    /// 对账单个实体
    ///
    /// 以仓库为准修复缓存：仓库中不存在时删除缓存项，否则处理后写入缓存
    #[instrument(skip(self, ctx), fields(repository = %self.key), level = "debug")]
    pub async fn reconcile(&self, ctx: &SyncContext, name: &str) -> Result<CacheAction> {
        let (_lease, cctx) = self.enter(ctx, name).await?;
        debug!("reconciling {} entity '{}'", self.key, name);

        let persisted = match cctx.run(self.repository.read(&cctx, name)).await {
            Ok(persisted) => persisted,
            Err(e) if e.is_not_found() => {
                debug!(
                    "{} entity '{}' is not part of the repository, removing it from the cache",
                    self.key, name
                );
                return self
                    .apply_cache_action(&cctx, name, None, CacheActionCause::Reconciliation)
                    .await;
            }
            Err(e) => return Err(e),
        };
        let processed = match cctx.run(self.processor.process(&cctx, &persisted)).await {
            Ok(processed) => processed,
            Err(e) => {
                warn!(
                    "failed to process {} entity '{}' during reconciliation, cache will be out of date until reconciliation: {}",
                    self.key, name, e
                );
                return Err(e);
            }
        };
        self.apply_cache_action(
            &cctx,
            name,
            Some(&processed),
            CacheActionCause::Reconciliation,
        )
        .await
    }

    /// 全量对账
    ///
    /// 对仓库中和缓存中出现过的所有实体名逐个对账。单个实体失败不会中断其余实体，
    /// 所有错误合并后返回。
    #[instrument(skip(self, ctx), fields(repository = %self.key), level = "debug")]
    pub async fn reconcile_all(&self, ctx: &SyncContext) -> Result<()> {
        let persisted = ctx.run(self.repository.read_all(ctx)).await?;
        let cached = ctx.run(self.cache.keys()).await?;

        let names: BTreeSet<String> = persisted.into_keys().chain(cached).collect();
        debug!("reconciling {} {} entities", names.len(), self.key);

        let mut errors = Vec::new();
        for name in names {
            if let Err(e) = self.reconcile(ctx, &name).await {
                warn!("failed to reconcile {} entity '{}': {}", self.key, name, e);
                errors.push(e);
            }
        }
        SyncError::join(errors)
    }

    /// 使缓存与期望值一致
    ///
    /// 比较当前缓存值与期望值，执行不动、删除、新增、替换中的一种，并触发对应钩子
    async fn apply_cache_action(
        &self,
        ctx: &SyncContext,
        name: &str,
        desired: Option<&P>,
        cause: CacheActionCause,
    ) -> Result<CacheAction> {
        debug!(
            "performing cache action caused by {} for {} entity '{}'",
            cause, self.key, name
        );
        let current = ctx.run(self.cache.get(name)).await?;

        let action = match (desired, &current) {
            (None, None) => CacheAction::NoOp,
            (None, Some(_)) => CacheAction::Removed,
            (Some(_), None) => CacheAction::Added,
            (Some(desired), Some(current)) => {
                if self.processed_identity.equal(desired, current)? {
                    CacheAction::NoOp
                } else {
                    CacheAction::Updated
                }
            }
        };

        match (action, desired) {
            (CacheAction::NoOp, _) => {
                debug!("{} entity '{}' is already up to date in cache", self.key, name);
                return Ok(action);
            }
            (CacheAction::Removed, _) => {
                if let Err(e) = ctx.run(self.cache.remove(name)).await {
                    warn!(
                        "failed to remove {} entity '{}' from cache, cache will be out of date until reconciliation: {}",
                        self.key, name, e
                    );
                    return Err(e);
                }
            }
            (_, Some(desired)) => {
                if let Err(e) = ctx
                    .run(self.cache.set(name, desired, self.retention))
                    .await
                {
                    warn!(
                        "failed to write {} entity '{}' to cache, cache will be out of date until reconciliation: {}",
                        self.key, name, e
                    );
                    return Err(e);
                }
            }
            (_, None) => {}
        }
        info!(
            "{} {} entity '{}' in cache ({})",
            action, self.key, name, cause
        );
        GLOBAL_METRICS.record_cache_action(&self.key, action.as_str(), cause.as_str());

        if let Some(hooks) = &self.hooks {
            let fired = match (action, desired) {
                (CacheAction::Added, Some(entity)) => {
                    ctx.run(hooks.on_cache_entity_added(ctx, name, entity, cause))
                        .await
                }
                (CacheAction::Updated, Some(entity)) => {
                    ctx.run(hooks.on_cache_entity_updated(ctx, name, entity, cause))
                        .await
                }
                (CacheAction::Removed, _) => {
                    ctx.run(hooks.on_cache_entity_removed(ctx, name, cause))
                        .await
                }
                _ => Ok(()),
            };
            if let Err(e) = fired {
                warn!(
                    "failed to perform cache hook for {} entity '{}' after {}: {}",
                    self.key, name, action, e
                );
                return Err(e);
            }
        }
        Ok(action)
    }
}
