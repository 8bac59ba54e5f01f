//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内锁的实现，基于可注入的锁表。

use super::{Lease, LinearBackoff, Locker};
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::metrics::GLOBAL_METRICS;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// 锁表
///
/// 键到当前持有者租约编号的映射。多个 [`MemoryLocker`] 共享同一张锁表时
/// 互斥生效，可用于在单进程内模拟多个副本。
#[derive(Debug, Default)]
pub struct LockTable {
    leases: DashMap<String, u64, ahash::RandomState>,
    next_id: AtomicU64,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试占用键，成功时返回租约编号
    pub fn try_acquire(&self, key: &str) -> Option<u64> {
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                vacant.insert(id);
                Some(id)
            }
        }
    }

    /// 释放键，仅当键仍属于给定租约时删除
    pub fn release(&self, key: &str, id: u64) -> bool {
        self.leases.remove_if(key, |_, owner| *owner == id).is_some()
    }

    /// 键当前是否被持有
    pub fn is_held(&self, key: &str) -> bool {
        self.leases.contains_key(key)
    }

    /// 当前持有的锁数量
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// 进程内锁
///
/// 获取时按线性退避轮询锁表；租约上下文结束时由后台任务删除锁表项。
#[derive(Clone)]
pub struct MemoryLocker {
    table: Arc<LockTable>,
    retry_step: Duration,
    retry_max: Duration,
}

impl Default for MemoryLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocker {
    /// 创建拥有独立锁表的进程内锁
    pub fn new() -> Self {
        Self::with_table(Arc::new(LockTable::new()))
    }

    /// 使用共享锁表创建进程内锁
    pub fn with_table(table: Arc<LockTable>) -> Self {
        Self {
            table,
            retry_step: super::DEFAULT_RETRY_STEP,
            retry_max: super::DEFAULT_RETRY_MAX,
        }
    }

    /// 设置退避步长和上限
    pub fn with_retry(mut self, step: Duration, max: Duration) -> Self {
        self.retry_step = step;
        self.retry_max = max;
        self
    }

    /// 底层锁表
    pub fn table(&self) -> &Arc<LockTable> {
        &self.table
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    #[instrument(skip(self, ctx), level = "debug")]
    async fn obtain_lock(&self, ctx: &SyncContext, key: &str) -> Result<Lease> {
        let mut backoff = LinearBackoff::new(self.retry_step, self.retry_max);
        let id = loop {
            if ctx.is_done() {
                debug!("context finished before lock '{}' was obtained", key);
                GLOBAL_METRICS.record_lock("memory", "unavailable");
                return Err(SyncError::LockUnavailable(key.to_string()));
            }
            if let Some(id) = self.table.try_acquire(key) {
                break id;
            }
            let wait = backoff.next_backoff();
            debug!("lock '{}' is held elsewhere, retrying in {:?}", key, wait);
            tokio::select! {
                _ = ctx.done() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        };
        GLOBAL_METRICS.record_lock("memory", "obtained");
        debug!("obtained lock '{}' (lease {})", key, id);

        let lease_ctx = ctx.child();

        // 父上下文取消或超时同样结束租约
        let watcher_ctx = lease_ctx.clone();
        let watcher_table = self.table.clone();
        let watcher_key = key.to_string();
        tokio::spawn(async move {
            watcher_ctx.done().await;
            if watcher_table.release(&watcher_key, id) {
                debug!("lease {} on '{}' ended with its context", id, watcher_key);
            }
        });

        let table = self.table.clone();
        let release_key = key.to_string();
        Ok(Lease::new(key, lease_ctx, move || {
            table.release(&release_key, id);
        }))
    }
}
