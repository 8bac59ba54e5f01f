//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存接口以及内存、Redis两种缓存实现。
//!
//! 缓存只保存处理后的实体，写入全部由缓存仓库的缓存动作完成，
//! 调用方不应直接写缓存。

pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// 缓存项的剩余保留时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// 缓存项不存在
    Missing,
    /// 缓存项永不过期
    Persistent,
    /// 缓存项将在给定时间后过期
    Expires(Duration),
}

/// 缓存特征
///
/// 按键存取某一实体类型的缓存。`retention` 为 `None` 或零表示永不过期。
#[async_trait]
pub trait Cache<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// 获取缓存项，不存在时返回 `Ok(None)`
    async fn get(&self, key: &str) -> Result<Option<E>>;

    /// 写入缓存项
    async fn set(&self, key: &str, value: &E, retention: Option<Duration>) -> Result<()>;

    /// 删除缓存项，键不存在时同样成功
    async fn remove(&self, key: &str) -> Result<()>;

    /// 当前全部缓存项的快照
    async fn entries(&self) -> Result<HashMap<String, E>>;

    /// 当前全部缓存键
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().await?.into_keys().collect())
    }

    /// 当前全部缓存值
    async fn values(&self) -> Result<Vec<E>> {
        Ok(self.entries().await?.into_values().collect())
    }

    /// 缓存项的剩余保留时间
    async fn remaining_retention(&self, key: &str) -> Result<Retention>;
}

/// 将零保留时间视为永不过期
pub(crate) fn effective_retention(retention: Option<Duration>) -> Option<Duration> {
    retention.filter(|d| !d.is_zero())
}
