//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的协调器，执行时间以毫秒时间戳保存。

use super::Coordinator;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::locker::{Lease, Locker, RedisLocker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tracing::instrument;

/// Redis协调器
#[derive(Clone)]
pub struct RedisCoordinator {
    locker: RedisLocker,
    manager: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCoordinator")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCoordinator {
    /// 创建Redis协调器
    ///
    /// # 参数
    ///
    /// * `locker` - 任务锁
    /// * `manager` - 保存执行时间使用的连接
    /// * `key_prefix` - 执行时间键前缀
    pub fn new(
        locker: RedisLocker,
        manager: ConnectionManager,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            locker,
            manager,
            key_prefix: key_prefix.into(),
        }
    }

    /// 底层锁
    pub fn locker(&self) -> &RedisLocker {
        &self.locker
    }

    fn marker_key(&self, key: &str) -> String {
        format!("{}:last-run:{}", self.key_prefix, key)
    }

    /// 清除任务上次执行时间，下一次轮询将立即执行任务
    #[instrument(skip(self, ctx), level = "info")]
    pub async fn clear_last_run_timestamp(&self, ctx: &SyncContext, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let marker_key = self.marker_key(key);
        let removed: i64 = ctx
            .run(async {
                redis::cmd("DEL")
                    .arg(&marker_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl Locker for RedisCoordinator {
    async fn obtain_lock(&self, ctx: &SyncContext, key: &str) -> Result<Lease> {
        self.locker.obtain_lock(ctx, key).await
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    #[instrument(skip(self, ctx), level = "debug")]
    async fn last_run_timestamp(
        &self,
        ctx: &SyncContext,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.manager.clone();
        let marker_key = self.marker_key(key);
        let millis: Option<i64> = ctx
            .run(async {
                redis::cmd("GET")
                    .arg(&marker_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;
        match millis {
            Some(millis) => DateTime::from_timestamp_millis(millis)
                .map(Some)
                .ok_or_else(|| {
                    SyncError::Serialization(format!(
                        "invalid last-run timestamp {} for task '{}'",
                        millis, key
                    ))
                }),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, ctx), level = "debug")]
    async fn update_last_run_timestamp(&self, ctx: &SyncContext, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let marker_key = self.marker_key(key);
        let now = Utc::now().timestamp_millis();
        ctx.run(async {
            redis::cmd("SET")
                .arg(&marker_key)
                .arg(now)
                .query_async::<()>(&mut conn)
                .await
                .map_err(SyncError::from)
        })
        .await
    }
}
