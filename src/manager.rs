//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步管理器，负责按配置装配锁、协调器、缓存和周期任务。

use crate::backend::{DefaultRedisProvider, RedisProvider};
use crate::cache::{Cache, MemoryCache, RedisCache};
use crate::config::{BackendType, Config};
use crate::context::SyncContext;
use crate::coordinator::{Coordinator, MemoryCoordinator, RedisCoordinator};
use crate::error::{Result, SyncError};
use crate::locker::{Locker, MemoryLocker, RedisLocker};
use crate::metrics::GLOBAL_METRICS;
use crate::repository::{CachedRepository, Processor, Repository};
use crate::task::PeriodicSingleTaskRunner;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument};

enum Backends {
    Memory {
        locker: MemoryLocker,
        coordinator: MemoryCoordinator,
    },
    Redis {
        locker: RedisLocker,
        coordinator: RedisCoordinator,
    },
}

/// 同步管理器
///
/// 按配置创建共享的锁和协调器，并为每个实体类型创建缓存和缓存仓库
pub struct SyncManager {
    config: Config,
    redis: Option<ConnectionManager>,
    backends: Backends,
}

impl SyncManager {
    /// 初始化同步管理器
    ///
    /// # 参数
    ///
    /// * `config` - 同步工具包配置
    ///
    /// # 返回值
    ///
    /// 配置无效或Redis连接失败时返回错误
    pub async fn init(config: Config) -> Result<Self> {
        Self::init_with_provider(config, &DefaultRedisProvider).await
    }

    /// 使用指定的Redis提供者初始化
    #[instrument(skip(config, provider), level = "info", fields(key_prefix = %config.global.key_prefix))]
    pub async fn init_with_provider(config: Config, provider: &dyn RedisProvider) -> Result<Self> {
        config.validate()?;
        GLOBAL_METRICS.set_enabled(config.global.enable_metrics);

        let needs_redis = config.locker.backend == BackendType::Redis
            || config.cache.backend == BackendType::Redis;
        let redis = match (&config.redis, needs_redis) {
            (Some(redis_config), true) => Some(provider.connect(redis_config).await?),
            _ => None,
        };

        let prefix = config.global.key_prefix.clone();
        let locker_config = &config.locker;
        let backends = match (locker_config.backend, &redis) {
            (BackendType::Redis, Some(manager)) => {
                let locker =
                    RedisLocker::new(manager.clone(), prefix.clone(), locker_config.lease_ttl())
                        .with_retry(locker_config.retry_step(), locker_config.retry_max());
                let coordinator = RedisCoordinator::new(locker.clone(), manager.clone(), prefix);
                Backends::Redis {
                    locker,
                    coordinator,
                }
            }
            (BackendType::Redis, None) => {
                return Err(SyncError::Config(
                    "Redis locker backend requires a redis connection".to_string(),
                ));
            }
            (BackendType::Memory, _) => {
                let locker = MemoryLocker::new()
                    .with_retry(locker_config.retry_step(), locker_config.retry_max());
                let coordinator = MemoryCoordinator::with_locker(locker.clone());
                Backends::Memory {
                    locker,
                    coordinator,
                }
            }
        };

        info!(
            "SyncManager initialized (locker: {:?}, cache: {:?}, tasks: {})",
            config.locker.backend,
            config.cache.backend,
            config.tasks.len()
        );
        Ok(Self {
            config,
            redis,
            backends,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 共享的锁
    pub fn locker(&self) -> Arc<dyn Locker> {
        match &self.backends {
            Backends::Memory { locker, .. } => Arc::new(locker.clone()),
            Backends::Redis { locker, .. } => Arc::new(locker.clone()),
        }
    }

    /// 共享的协调器
    pub fn coordinator(&self) -> Arc<dyn Coordinator> {
        match &self.backends {
            Backends::Memory { coordinator, .. } => Arc::new(coordinator.clone()),
            Backends::Redis { coordinator, .. } => Arc::new(coordinator.clone()),
        }
    }

    /// Redis协调器，锁后端不是Redis时返回 `None`
    pub fn redis_coordinator(&self) -> Option<&RedisCoordinator> {
        match &self.backends {
            Backends::Redis { coordinator, .. } => Some(coordinator),
            Backends::Memory { .. } => None,
        }
    }

    /// 为实体类型创建缓存
    ///
    /// Redis缓存的命名空间为 `"{key_prefix}:{namespace}"`
    pub fn cache<E>(&self, namespace: &str) -> Result<Arc<dyn Cache<E>>>
    where
        E: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let cache_config = &self.config.cache;
        match cache_config.backend {
            BackendType::Memory => Ok(match cache_config.capacity {
                Some(capacity) => Arc::new(MemoryCache::<E>::with_capacity(capacity)),
                None => Arc::new(MemoryCache::<E>::new()),
            }),
            BackendType::Redis => {
                let manager = self.redis.clone().ok_or_else(|| {
                    SyncError::Config("Redis cache backend requires a redis connection".to_string())
                })?;
                let cache = RedisCache::<E>::new(
                    manager,
                    format!("{}:{}", self.config.global.key_prefix, namespace),
                );
                let cache = if cache_config.compress {
                    cache.with_compression()
                } else {
                    cache
                };
                Ok(Arc::new(cache))
            }
        }
    }

    /// 创建使用共享锁和配置的保留时间的缓存仓库
    ///
    /// # 参数
    ///
    /// * `key` - 键空间名称，同时作为缓存命名空间
    /// * `repository` - 权威仓库
    /// * `processor` - 实体处理器
    pub fn cached_repository<B, P, C>(
        &self,
        key: &str,
        repository: Arc<dyn Repository<B, C>>,
        processor: Arc<dyn Processor<B, P>>,
    ) -> Result<CachedRepository<B, P, C>>
    where
        B: Serialize + Send + Sync + 'static,
        P: Serialize + DeserializeOwned + Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let cache = self.cache::<P>(key)?;
        Ok(CachedRepository::new(key, repository, cache, processor)
            .with_locker(self.locker())
            .with_retention(self.config.cache.default_retention()))
    }

    /// 启动周期任务，任务参数取自配置中的同名任务
    pub fn spawn_task<F, Fut>(
        &self,
        ctx: &SyncContext,
        task_key: &str,
        task: F,
    ) -> PeriodicSingleTaskRunner
    where
        F: Fn(SyncContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        PeriodicSingleTaskRunner::spawn(
            ctx,
            task_key,
            task,
            self.coordinator(),
            self.config.task(task_key),
        )
    }
}
