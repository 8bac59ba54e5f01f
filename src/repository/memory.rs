//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内的参考仓库实现。

use super::Repository;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

type Normalizer<E> = Arc<dyn Fn(&str, E) -> E + Send + Sync>;

/// 变更记录默认保留的条数
pub const DEFAULT_CHANGE_LOG_CAPACITY: usize = 1024;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// 一次成功写入的记录
#[derive(Debug, Clone)]
pub struct Change<C> {
    pub name: String,
    pub kind: ChangeKind,
    /// 调用方附带的变更上下文
    pub context: Option<C>,
    pub at: DateTime<Utc>,
}

/// 进程内仓库
///
/// 用于测试和单实例部署。可选的规范化函数在每次写入时作用于实体，
/// 模拟存储在写入时补全或改写字段的行为。变更记录只保留最近的
/// [`DEFAULT_CHANGE_LOG_CAPACITY`] 条，超出时丢弃最旧的记录。
pub struct MemoryRepository<E, C> {
    entities: RwLock<HashMap<String, E>>,
    changes: RwLock<VecDeque<Change<C>>>,
    change_log_capacity: usize,
    normalizer: Option<Normalizer<E>>,
}

impl<E, C> Default for MemoryRepository<E, C> {
    fn default() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            changes: RwLock::new(VecDeque::new()),
            change_log_capacity: DEFAULT_CHANGE_LOG_CAPACITY,
            normalizer: None,
        }
    }
}

impl<E, C> MemoryRepository<E, C>
where
    E: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置写入时的规范化函数
    pub fn with_normalizer<F>(mut self, normalizer: F) -> Self
    where
        F: Fn(&str, E) -> E + Send + Sync + 'static,
    {
        self.normalizer = Some(Arc::new(normalizer));
        self
    }

    /// 设置变更记录保留的条数，为0时不记录
    pub fn with_change_log_capacity(mut self, capacity: usize) -> Self {
        self.change_log_capacity = capacity;
        self
    }

    /// 绕过变更记录直接写入实体，模拟其他服务对存储的修改
    pub async fn insert(&self, name: impl Into<String>, entity: E) {
        self.entities.write().await.insert(name.into(), entity);
    }

    /// 绕过变更记录直接删除实体
    pub async fn remove(&self, name: &str) -> Option<E> {
        self.entities.write().await.remove(name)
    }

    /// 最近成功写入的记录，按时间先后排列
    pub async fn changes(&self) -> Vec<Change<C>> {
        self.changes.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    fn normalize(&self, name: &str, entity: &E) -> E {
        match &self.normalizer {
            Some(normalizer) => normalizer(name, entity.clone()),
            None => entity.clone(),
        }
    }

    async fn record(&self, name: &str, kind: ChangeKind, change: Option<&C>) {
        if self.change_log_capacity == 0 {
            return;
        }
        let mut changes = self.changes.write().await;
        while changes.len() >= self.change_log_capacity {
            changes.pop_front();
        }
        changes.push_back(Change {
            name: name.to_string(),
            kind,
            context: change.cloned(),
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl<E, C> Repository<E, C> for MemoryRepository<E, C>
where
    E: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    #[instrument(skip(self, ctx, entity, change), level = "debug")]
    async fn create(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &E,
        change: Option<&C>,
    ) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        {
            let mut entities = self.entities.write().await;
            if entities.contains_key(name) {
                return Err(SyncError::EntityExists(name.to_string()));
            }
            entities.insert(name.to_string(), self.normalize(name, entity));
        }
        self.record(name, ChangeKind::Created, change).await;
        debug!("memory repository created '{}'", name);
        Ok(())
    }

    async fn read_all(&self, ctx: &SyncContext) -> Result<HashMap<String, E>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        Ok(self.entities.read().await.clone())
    }

    async fn read(&self, ctx: &SyncContext, name: &str) -> Result<E> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.entities
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::EntityNotFound(name.to_string()))
    }

    #[instrument(skip(self, ctx, entity, change), level = "debug")]
    async fn update(
        &self,
        ctx: &SyncContext,
        name: &str,
        entity: &E,
        change: Option<&C>,
    ) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        {
            let mut entities = self.entities.write().await;
            let slot = entities
                .get_mut(name)
                .ok_or_else(|| SyncError::EntityNotFound(name.to_string()))?;
            *slot = self.normalize(name, entity);
        }
        self.record(name, ChangeKind::Updated, change).await;
        debug!("memory repository updated '{}'", name);
        Ok(())
    }

    #[instrument(skip(self, ctx, change), level = "debug")]
    async fn delete(&self, ctx: &SyncContext, name: &str, change: Option<&C>) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.entities.write().await.remove(name).is_none() {
            return Err(SyncError::EntityNotFound(name.to_string()));
        }
        self.record(name, ChangeKind::Deleted, change).await;
        debug!("memory repository deleted '{}'", name);
        Ok(())
    }
}
