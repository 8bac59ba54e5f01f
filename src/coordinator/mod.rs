//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了周期任务的协调器：锁加上持久化的上次执行时间。

pub mod memory;
pub mod redis;

use crate::context::SyncContext;
use crate::error::Result;
use crate::locker::Locker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryCoordinator;
pub use redis::RedisCoordinator;

/// 协调器特征
///
/// 在 [`Locker`] 的基础上按任务名记录最近一次成功执行的时间
#[async_trait]
pub trait Coordinator: Locker {
    /// 读取任务上次成功执行的时间，从未执行过时返回 `None`
    async fn last_run_timestamp(
        &self,
        ctx: &SyncContext,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// 将任务上次成功执行的时间更新为当前时间
    ///
    /// 只应在任务成功完成且仍持有锁时调用
    async fn update_last_run_timestamp(&self, ctx: &SyncContext, key: &str) -> Result<()>;
}
