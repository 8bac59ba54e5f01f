//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis提供者接口和默认实现。

use crate::config::{RedisConfig, RedisMode};
use crate::error::{Result, SyncError};
use crate::utils::redaction::redact_connection_string;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, IntoConnectionInfo};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Redis提供者
///
/// 根据配置建立带自动重连的连接管理器，锁、协调器和缓存共享同一个连接
#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &RedisConfig) -> Result<ConnectionManager>;

    async fn get_sentinel_client(&self, config: &RedisConfig) -> Result<ConnectionManager>;

    /// 按配置的模式连接
    async fn connect(&self, config: &RedisConfig) -> Result<ConnectionManager> {
        match config.mode {
            RedisMode::Standalone => self.get_standalone_client(config).await,
            RedisMode::Sentinel => self.get_sentinel_client(config).await,
        }
    }
}

pub struct DefaultRedisProvider;

fn connect_timed_out(config: &RedisConfig, target: &str) -> SyncError {
    SyncError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!(
            "Connection timed out after {}ms. Target: {}",
            config.connection_timeout_ms, target
        ),
    ))
}

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(&self, config: &RedisConfig) -> Result<ConnectionManager> {
        let raw = config.connection_string.expose_secret();
        let connection_string = if config.enable_tls && !raw.starts_with("rediss://") {
            raw.replace("redis://", "rediss://")
        } else {
            raw.to_string()
        };
        let target = redact_connection_string(&connection_string);

        let mut info = connection_string.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.expose_secret().to_string());
        }
        let client = Client::open(info)?;

        info!("Connecting to redis at {}", target);
        timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| connect_timed_out(config, &target))?
        .map_err(SyncError::from)
    }

    async fn get_sentinel_client(&self, config: &RedisConfig) -> Result<ConnectionManager> {
        let sentinel_config = config.sentinel.as_ref().ok_or_else(|| {
            SyncError::Config("Sentinel configuration is missing".to_string())
        })?;

        info!("Initializing Sentinel client with automatic failover support");

        // redis+sentinel://[:password@]host:port[,host:port]/service_name
        let mut url = "redis+sentinel://".to_string();
        if let Some(password) = &config.password {
            url.push_str(&format!(":{}@", password.expose_secret()));
        }

        let nodes: Vec<String> = sentinel_config
            .nodes
            .iter()
            .map(|n| {
                n.trim_start_matches("redis://")
                    .trim_start_matches("redis+sentinel://")
                    .to_string()
            })
            .collect();
        if nodes.is_empty() {
            return Err(SyncError::Config("No sentinel nodes provided".to_string()));
        }

        url.push_str(&nodes.join(","));
        url.push('/');
        url.push_str(&sentinel_config.master_name);

        let target = redact_connection_string(&url);
        let client = Client::open(url)?;
        timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| connect_timed_out(config, &target))?
        .map_err(SyncError::from)
    }
}
