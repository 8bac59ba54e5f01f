//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步工具包的错误类型和处理机制。

use thiserror::Error;

/// 同步工具包错误类型枚举
///
/// 调用方可以据此区分：可重试的协作方错误、需要携带新指纹重新提交的
/// 冲突（`HashMismatch`）以及终止性的 `EntityNotFound`。
#[derive(Error, Debug)]
pub enum SyncError {
    /// 仓库中不存在该实体
    #[error("repository does not contain an entity '{0}'")]
    EntityNotFound(String),

    /// 仓库中已存在同名实体
    #[error("repository already contains an entity '{0}'")]
    EntityExists(String),

    /// 乐观并发冲突
    #[error("provided hash '{provided}' does not match current entity hash '{actual}'")]
    HashMismatch { provided: String, actual: String },

    /// 在上下文结束前未能获得锁
    #[error("lock '{0}' could not be obtained")]
    LockUnavailable(String),

    /// 锁后端不可达或返回错误
    #[error("lock backend error: {0}")]
    LockBackend(String),

    /// 上下文已取消
    #[error("context cancelled")]
    Cancelled,

    /// 上下文截止时间已过
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 缓存操作失败
    #[error("Cache operation failed: {0}")]
    Cache(String),

    /// 仓库操作失败
    #[error("Repository operation failed: {0}")]
    Repository(String),

    /// 实体处理失败
    #[error("Processor failed: {0}")]
    Processor(String),

    /// 钩子执行失败
    #[error("Hook failed: {0}")]
    Hook(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// Redis错误
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 多个独立操作的错误集合
    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<SyncError>),
}

fn join_messages(errors: &[SyncError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    /// 是否为实体不存在错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::EntityNotFound(_))
    }

    /// 是否为指纹冲突错误
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, SyncError::HashMismatch { .. })
    }

    /// 是否为未获得锁（区别于锁后端故障）
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, SyncError::LockUnavailable(_))
    }

    /// 是否为可重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::LockUnavailable(_)
            | SyncError::LockBackend(_)
            | SyncError::Cancelled
            | SyncError::DeadlineExceeded
            | SyncError::Cache(_)
            | SyncError::Repository(_)
            | SyncError::Redis(_)
            | SyncError::Io(_) => true,
            SyncError::Multiple(errors) => errors.iter().all(SyncError::is_retryable),
            _ => false,
        }
    }

    /// 将多个错误合并为一个结果
    ///
    /// 空集合返回 `Ok(())`，单个错误原样返回，多个错误包装为 `Multiple`
    pub fn join(mut errors: Vec<SyncError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SyncError::Multiple(errors)),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// 同步操作结果类型别名
pub type Result<T> = std::result::Result<T, SyncError>;
