//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了分布式锁的接口、租约类型以及重试退避策略。

pub mod memory;
pub mod redis;

use crate::context::SyncContext;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub use memory::{LockTable, MemoryLocker};
pub use redis::RedisLocker;

/// 默认的退避步长
pub const DEFAULT_RETRY_STEP: Duration = Duration::from_millis(100);

/// 默认的退避上限
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(10);

/// 分布式锁特征
///
/// 成功时返回的 [`Lease`] 携带一个父上下文的子上下文，租约一旦丢失
/// （显式释放、后端过期、父上下文取消或超时）该上下文立即取消。
#[async_trait]
pub trait Locker: Send + Sync {
    /// 获取键对应的锁
    ///
    /// # 参数
    ///
    /// * `ctx` - 父上下文，结束时放弃获取
    /// * `key` - 锁的键
    ///
    /// # 返回值
    ///
    /// 上下文在获得锁之前结束返回 `LockUnavailable`，后端故障返回 `LockBackend`
    async fn obtain_lock(&self, ctx: &SyncContext, key: &str) -> Result<Lease>;
}

/// 锁租约
///
/// 调用 [`Lease::release`] 或丢弃租约都会释放锁，重复释放无副作用。
pub struct Lease {
    key: String,
    context: SyncContext,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Lease {
    /// 创建新的租约
    ///
    /// `on_release` 在第一次释放时执行一次，用于删除锁表项或通知后端
    pub fn new<F>(key: impl Into<String>, context: SyncContext, on_release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            context,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// 锁的键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 租约上下文，租约丢失时取消
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// 租约是否已经丢失
    pub fn is_lost(&self) -> bool {
        self.context.is_done()
    }

    /// 释放租约
    pub fn release(&mut self) {
        self.context.cancel();
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("lost", &self.is_lost())
            .finish()
    }
}

/// 线性退避策略
///
/// 第 n 次重试等待 `n * step`，但不超过 `max`
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max: Duration,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            attempt: 0,
        }
    }

    /// 下一次重试前的等待时间
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.step.saturating_mul(self.attempt).min(self.max)
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_STEP, DEFAULT_RETRY_MAX)
    }
}
