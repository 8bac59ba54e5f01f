//! oxsync - 分布式缓存一致性与周期任务协调库
//!
//! 提供以分布式锁串行化写入的缓存仓库（基于内容指纹的乐观并发控制、缓存对账），
//! 以及在多副本中保证同一时刻只有一个实例执行的周期任务运行器。

#![doc(html_root_url = "https://docs.rs/oxsync/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod locker;
pub mod manager;
pub mod metrics;
pub mod repository;
pub mod serialization;
pub mod task;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use cache::{Cache, MemoryCache, RedisCache, Retention};
pub use config::{Config, PeriodicTaskConfig};
pub use context::SyncContext;
pub use coordinator::{Coordinator, MemoryCoordinator, RedisCoordinator};
pub use error::{Result, SyncError};
pub use locker::{Lease, Locker, MemoryLocker, RedisLocker};
pub use manager::SyncManager;
pub use repository::{
    CacheAction, CacheActionCause, CachedRepository, Hooks, IdentityProcessor, MemoryRepository,
    NoopHooks, Processor, Repository,
};
pub use serialization::{CanonicalJson, ContentIdentity};
pub use task::{PeriodicSingleTaskRunner, RunnerState};

/// oxsync 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
