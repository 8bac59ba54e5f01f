//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了仓库和缓存变更后的观察者钩子。

use crate::context::SyncContext;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// 缓存动作的触发原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheActionCause {
    /// 由调用方的写操作触发
    RepositoryAction,
    /// 由对账修复触发
    Reconciliation,
}

impl CacheActionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheActionCause::RepositoryAction => "repository_action",
            CacheActionCause::Reconciliation => "reconciliation",
        }
    }
}

impl fmt::Display for CacheActionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 缓存动作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheAction {
    /// 缓存已与期望值一致
    NoOp,
    /// 新增缓存项
    Added,
    /// 替换缓存项
    Updated,
    /// 删除缓存项
    Removed,
}

impl CacheAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheAction::NoOp => "noop",
            CacheAction::Added => "added",
            CacheAction::Updated => "updated",
            CacheAction::Removed => "removed",
        }
    }
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 观察者钩子
///
/// 仓库钩子在仓库写入成功后触发，缓存钩子在缓存变更后触发并附带触发原因。
/// 所有方法默认不做任何事，实现方只需覆盖关心的回调。
#[async_trait]
pub trait Hooks<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    async fn on_repository_entity_created(
        &self,
        _ctx: &SyncContext,
        _name: &str,
        _entity: &P,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_repository_entity_updated(
        &self,
        _ctx: &SyncContext,
        _name: &str,
        _entity: &P,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_repository_entity_deleted(&self, _ctx: &SyncContext, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn on_cache_entity_added(
        &self,
        _ctx: &SyncContext,
        _name: &str,
        _entity: &P,
        _cause: CacheActionCause,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_cache_entity_updated(
        &self,
        _ctx: &SyncContext,
        _name: &str,
        _entity: &P,
        _cause: CacheActionCause,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_cache_entity_removed(
        &self,
        _ctx: &SyncContext,
        _name: &str,
        _cause: CacheActionCause,
    ) -> Result<()> {
        Ok(())
    }
}

/// 不做任何事的钩子
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl<P> Hooks<P> for NoopHooks where P: Send + Sync + 'static {}
