//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了权威存储的仓库接口以及缓存仓库协议。

pub mod cached;
pub mod hooks;
pub mod memory;
pub mod processor;

use crate::context::SyncContext;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub use cached::CachedRepository;
pub use hooks::{CacheAction, CacheActionCause, Hooks, NoopHooks};
pub use memory::{Change, ChangeKind, MemoryRepository, DEFAULT_CHANGE_LOG_CAPACITY};
pub use processor::{IdentityProcessor, Processor};

/// 仓库特征
///
/// 权威存储的增删改查。`change` 为调用方附带的变更上下文（例如操作人、审计信息），
/// 仓库原样接收，核心协议不解释其内容。
#[async_trait]
pub trait Repository<E, C>: Send + Sync
where
    E: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// 创建实体
    async fn create(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &E,
        change: Option<&C>,
    ) -> Result<()>;

    /// 读取全部实体
    async fn read_all(&self, ctx: &SyncContext) -> Result<HashMap<String, E>>;

    /// 读取实体，不存在时返回 `SyncError::EntityNotFound`
    async fn read(&self, ctx: &SyncContext, name: &str) -> Result<E>;

    /// 更新实体
    async fn update(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &E,
        change: Option<&C>,
    ) -> Result<()>;

    /// 删除实体
    async fn delete(&self, ctx: &SyncContext, name: &str, change: Option<&C>) -> Result<()>;
}
