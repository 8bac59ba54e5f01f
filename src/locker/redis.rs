//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的分布式锁实现。
//!
//! 获取使用 `SET NX PX`，持有期间后台任务以 Lua 脚本续期，
//! 续期失败即视为租约丢失并取消租约上下文；释放使用 Lua 脚本保证只删除自己的锁。

use super::{Lease, LinearBackoff, Locker};
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::metrics::GLOBAL_METRICS;
use crate::utils::redaction::redact_value;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const RENEW_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis分布式锁
#[derive(Clone)]
pub struct RedisLocker {
    manager: ConnectionManager,
    key_prefix: String,
    lease_ttl: Duration,
    retry_step: Duration,
    retry_max: Duration,
}

impl std::fmt::Debug for RedisLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLocker")
            .field("key_prefix", &self.key_prefix)
            .field("lease_ttl", &self.lease_ttl)
            .finish()
    }
}

impl RedisLocker {
    /// 创建新的Redis分布式锁
    ///
    /// # 参数
    ///
    /// * `manager` - Redis连接管理器
    /// * `key_prefix` - 锁键前缀
    /// * `lease_ttl` - 租约在Redis中的存活时间，持有期间每 `lease_ttl / 3` 续期一次
    pub fn new(
        manager: ConnectionManager,
        key_prefix: impl Into<String>,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            manager,
            key_prefix: key_prefix.into(),
            lease_ttl,
            retry_step: super::DEFAULT_RETRY_STEP,
            retry_max: super::DEFAULT_RETRY_MAX,
        }
    }

    /// 设置退避步长和上限
    pub fn with_retry(mut self, step: Duration, max: Duration) -> Self {
        self.retry_step = step;
        self.retry_max = max;
        self
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.key_prefix, key)
    }

    fn ttl_ms(&self) -> u64 {
        self.lease_ttl.as_millis().max(1) as u64
    }

    async fn try_acquire(&self, lock_key: &str, token: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms())
            .query_async(&mut conn)
            .await
            .map_err(|e| SyncError::LockBackend(e.to_string()))?;
        Ok(result.is_some())
    }

    /// 查询锁的剩余时间，未被持有时返回 `None`
    #[instrument(skip(self), level = "debug")]
    pub async fn lease_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("PTTL")
            .arg(self.lock_key(key))
            .query_async(&mut conn)
            .await?;
        if ttl > 0 {
            Ok(Some(Duration::from_millis(ttl as u64)))
        } else {
            Ok(None)
        }
    }

    /// 不校验持有者直接删除锁，仅供运维在持有者崩溃后使用
    #[instrument(skip(self), level = "info")]
    pub async fn force_release(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.lock_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

async fn renew(
    manager: &ConnectionManager,
    lock_key: &str,
    token: &str,
    ttl_ms: u64,
) -> Result<bool> {
    let mut conn = manager.clone();
    let script = redis::Script::new(RENEW_SCRIPT);
    let renewed: i32 = script
        .key(lock_key)
        .arg(token)
        .arg(ttl_ms)
        .invoke_async(&mut conn)
        .await?;
    Ok(renewed == 1)
}

async fn unlock(manager: &ConnectionManager, lock_key: &str, token: &str) -> Result<bool> {
    let mut conn = manager.clone();
    let script = redis::Script::new(UNLOCK_SCRIPT);
    let removed: i32 = script
        .key(lock_key)
        .arg(token)
        .invoke_async(&mut conn)
        .await?;
    Ok(removed == 1)
}

#[async_trait]
impl Locker for RedisLocker {
    #[instrument(skip(self, ctx), level = "debug")]
    async fn obtain_lock(&self, ctx: &SyncContext, key: &str) -> Result<Lease> {
        let lock_key = self.lock_key(key);
        let token = Uuid::new_v4().to_string();
        let mut backoff = LinearBackoff::new(self.retry_step, self.retry_max);

        loop {
            if ctx.is_done() {
                GLOBAL_METRICS.record_lock("redis", "unavailable");
                return Err(SyncError::LockUnavailable(key.to_string()));
            }
            match self.try_acquire(&lock_key, &token).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    GLOBAL_METRICS.record_lock("redis", "backend_error");
                    return Err(e);
                }
            }
            let wait = backoff.next_backoff();
            debug!("lock '{}' is held elsewhere, retrying in {:?}", key, wait);
            tokio::select! {
                _ = ctx.done() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
        GLOBAL_METRICS.record_lock("redis", "obtained");
        debug!(
            "obtained redis lock '{}' (token {})",
            lock_key,
            redact_value(&token, 4)
        );

        let lease_ctx = ctx.child();
        let keeper_ctx = lease_ctx.clone();
        let manager = self.manager.clone();
        let ttl_ms = self.ttl_ms();
        let renew_every = (self.lease_ttl / 3).max(Duration::from_millis(10));
        let keeper_key = lock_key.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(renew_every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 第一次tick立即返回
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = keeper_ctx.done() => break,
                    _ = interval.tick() => {
                        match renew(&manager, &keeper_key, &token, ttl_ms).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!("redis lock '{}' expired before renewal, lease lost", keeper_key);
                                keeper_ctx.cancel();
                                break;
                            }
                            Err(e) => {
                                warn!("failed to renew redis lock '{}', lease lost: {}", keeper_key, e);
                                keeper_ctx.cancel();
                                break;
                            }
                        }
                    }
                }
            }
            match unlock(&manager, &keeper_key, &token).await {
                Ok(true) => debug!("released redis lock '{}'", keeper_key),
                Ok(false) => debug!("redis lock '{}' was no longer owned", keeper_key),
                Err(e) => warn!(
                    "failed to release redis lock '{}', it expires on its own: {}",
                    keeper_key, e
                ),
            }
        });

        let release_ctx = lease_ctx.clone();
        Ok(Lease::new(key, lease_ctx, move || release_ctx.cancel()))
    }
}
