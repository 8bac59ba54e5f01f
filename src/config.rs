//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步工具包的配置结构和解析逻辑。

use crate::error::{Result, SyncError};
use lazy_static::lazy_static;
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

lazy_static! {
    static ref KEY_PREFIX_PATTERN: Option<Regex> = Regex::new(r"^[A-Za-z0-9_.:\-]{1,64}$").ok();
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub locker: LockerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Redis连接配置，锁或缓存使用Redis后端时必需
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// 按任务名配置的周期任务
    #[serde(default)]
    pub tasks: HashMap<String, PeriodicTaskConfig>,
}

/// 全局配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// Redis中锁键、执行时间键和缓存命名空间的前缀
    pub key_prefix: String,
    /// 是否启用指标收集
    pub enable_metrics: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            key_prefix: "oxsync".to_string(),
            enable_metrics: true,
        }
    }
}

/// 后端类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// 进程内
    #[default]
    Memory,
    /// Redis
    Redis,
}

/// 锁配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LockerConfig {
    pub backend: BackendType,
    /// 退避步长（毫秒）
    pub retry_step_ms: u64,
    /// 退避上限（毫秒）
    pub retry_max_ms: u64,
    /// Redis租约存活时间（毫秒）
    pub lease_ttl_ms: u64,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Memory,
            retry_step_ms: 100,
            retry_max_ms: 10_000,
            lease_ttl_ms: 30_000,
        }
    }
}

impl LockerConfig {
    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

/// 缓存配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: BackendType,
    /// 进程内缓存的最大条目数，未设置表示不限容量
    pub capacity: Option<u64>,
    /// 缓存项默认保留时间（秒），未设置表示永不过期
    pub default_retention_secs: Option<u64>,
    /// Redis缓存值是否使用gzip压缩
    pub compress: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Memory,
            capacity: None,
            default_retention_secs: None,
            compress: false,
        }
    }
}

impl CacheConfig {
    pub fn default_retention(&self) -> Option<Duration> {
        self.default_retention_secs.map(Duration::from_secs)
    }
}

/// Redis模式枚举
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
}

/// Redis连接配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// Redis 密码（可选，使用 SecretString 保护）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            connection_timeout_ms: 5000,
            password: None,
            enable_tls: false,
            sentinel: None,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 周期任务配置
///
/// TOML中以秒为单位，允许小数
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PeriodicTaskConfig {
    /// 两次执行之间的最小间隔
    #[serde(rename = "task_interval_secs", deserialize_with = "seconds")]
    pub task_interval: Duration,
    /// 获取锁加执行任务的总超时
    #[serde(rename = "task_timeout_secs", deserialize_with = "seconds")]
    pub task_timeout: Duration,
    /// 轮询频率
    #[serde(rename = "runner_frequency_secs", deserialize_with = "seconds")]
    pub runner_frequency: Duration,
}

impl Default for PeriodicTaskConfig {
    fn default() -> Self {
        Self {
            task_interval: Duration::from_secs(60 * 60),
            task_timeout: Duration::from_secs(10 * 60),
            runner_frequency: Duration::from_secs(10),
        }
    }
}

impl PeriodicTaskConfig {
    pub fn with_task_interval(mut self, interval: Duration) -> Self {
        self.task_interval = interval;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_runner_frequency(mut self, frequency: Duration) -> Self {
        self.runner_frequency = frequency;
        self
    }
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

impl Config {
    /// 从TOML字符串解析并验证配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从TOML文件加载并验证配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 任务配置，未配置的任务使用默认值
    pub fn task(&self, name: &str) -> PeriodicTaskConfig {
        self.tasks.get(name).cloned().unwrap_or_default()
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SyncError::Config(msg));

        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return invalid(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        let prefix_ok = KEY_PREFIX_PATTERN
            .as_ref()
            .is_some_and(|re| re.is_match(&self.global.key_prefix));
        if !prefix_ok {
            return invalid(format!(
                "Global key_prefix '{}' must be 1-64 characters of [A-Za-z0-9_.:-]",
                self.global.key_prefix
            ));
        }

        let locker = &self.locker;
        if locker.retry_step_ms == 0 {
            return invalid("Locker retry_step_ms cannot be zero".to_string());
        }
        if locker.retry_max_ms < locker.retry_step_ms {
            return invalid(format!(
                "Locker retry_max_ms ({}) must be >= retry_step_ms ({})",
                locker.retry_max_ms, locker.retry_step_ms
            ));
        }
        if !(100..=600_000).contains(&locker.lease_ttl_ms) {
            return invalid("Locker lease_ttl_ms must be between 100 and 600000 ms".to_string());
        }

        if let Some(capacity) = self.cache.capacity {
            if capacity == 0 {
                return invalid("Cache capacity cannot be zero".to_string());
            }
            if capacity > 10_000_000 {
                return invalid("Cache capacity cannot exceed 10,000,000".to_string());
            }
        }

        let needs_redis =
            locker.backend == BackendType::Redis || self.cache.backend == BackendType::Redis;
        match &self.redis {
            None if needs_redis => {
                return invalid(
                    "A [redis] section is required when a redis backend is selected".to_string(),
                );
            }
            Some(redis) => {
                if !(100..=30_000).contains(&redis.connection_timeout_ms) {
                    return invalid(
                        "Redis connection_timeout_ms must be between 100 and 30000 ms".to_string(),
                    );
                }
                if redis.mode == RedisMode::Sentinel {
                    match &redis.sentinel {
                        Some(sentinel) if !sentinel.nodes.is_empty() => {}
                        _ => {
                            return invalid(
                                "Sentinel mode requires a [redis.sentinel] section with nodes"
                                    .to_string(),
                            );
                        }
                    }
                }
            }
            None => {}
        }

        for (name, task) in &self.tasks {
            if name.is_empty() {
                return invalid("Task name cannot be empty".to_string());
            }
            if task.runner_frequency.is_zero() {
                return invalid(format!("Task '{}' runner_frequency_secs cannot be zero", name));
            }
            if task.task_timeout.is_zero() {
                return invalid(format!("Task '{}' task_timeout_secs cannot be zero", name));
            }
            if task.task_interval.is_zero() {
                return invalid(format!("Task '{}' task_interval_secs cannot be zero", name));
            }
        }

        Ok(())
    }
}
