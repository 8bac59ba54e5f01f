//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内协调器。

use super::Coordinator;
use crate::context::SyncContext;
use crate::error::Result;
use crate::locker::{Lease, Locker, MemoryLocker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// 进程内协调器
///
/// 克隆出的实例共享锁表和执行时间表，可在单进程内模拟多个副本
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    locker: MemoryLocker,
    last_runs: Arc<DashMap<String, DateTime<Utc>, ahash::RandomState>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定的锁创建协调器
    pub fn with_locker(locker: MemoryLocker) -> Self {
        Self {
            locker,
            last_runs: Arc::default(),
        }
    }

    /// 底层锁
    pub fn locker(&self) -> &MemoryLocker {
        &self.locker
    }

    /// 直接设置任务上次执行时间
    pub fn set_last_run(&self, key: impl Into<String>, at: DateTime<Utc>) {
        self.last_runs.insert(key.into(), at);
    }

    /// 清除任务上次执行时间
    pub fn clear_last_run(&self, key: &str) -> bool {
        self.last_runs.remove(key).is_some()
    }
}

#[async_trait]
impl Locker for MemoryCoordinator {
    async fn obtain_lock(&self, ctx: &SyncContext, key: &str) -> Result<Lease> {
        self.locker.obtain_lock(ctx, key).await
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn last_run_timestamp(
        &self,
        ctx: &SyncContext,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        Ok(self.last_runs.get(key).map(|entry| *entry.value()))
    }

    async fn update_last_run_timestamp(&self, ctx: &SyncContext, key: &str) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.last_runs.insert(key.to_string(), Utc::now());
        Ok(())
    }
}
