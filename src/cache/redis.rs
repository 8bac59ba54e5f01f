//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的缓存实现。
//!
//! 所有键以 `"{namespace}|"` 为前缀，多个实体类型可以共享同一个Redis实例。

use super::{effective_retention, Cache, Retention};
use crate::error::Result;
use crate::serialization::{JsonSerializer, Serializer};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, instrument};

const SCAN_COUNT: usize = 1000;

/// Redis缓存
pub struct RedisCache<E> {
    manager: ConnectionManager,
    namespace: String,
    serializer: JsonSerializer,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for RedisCache<E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            namespace: self.namespace.clone(),
            serializer: self.serializer.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> RedisCache<E> {
    /// 创建新的Redis缓存
    ///
    /// # 参数
    ///
    /// * `manager` - Redis连接管理器
    /// * `namespace` - 键空间名称
    pub fn new(manager: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            manager,
            namespace: namespace.into(),
            serializer: JsonSerializer::new(),
            _entity: PhantomData,
        }
    }

    /// 使用gzip压缩缓存值
    pub fn with_compression(mut self) -> Self {
        self.serializer = JsonSerializer::with_compression();
        self
    }

    /// 键空间名称
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}|{}", self.namespace, key)
    }

    fn strip_namespace<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('|'))
    }

    async fn scan_keys(&self) -> Result<Vec<String>> {
        let pattern = format!("{}|*", escape_glob(&self.namespace));
        let mut conn = self.manager.clone();
        let mut cursor = 0u64;
        let mut found = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        // SCAN 可能重复返回同一个键
        found.sort();
        found.dedup();
        Ok(found)
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl<E> Cache<E> for RedisCache<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<E>> {
        let mut conn = self.manager.clone();
        let bytes: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        debug!("redis cache get: key={}, found={}", key, bytes.is_some());
        bytes.map(|b| self.serializer.deserialize(&b)).transpose()
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &E, retention: Option<Duration>) -> Result<()> {
        let bytes = self.serializer.serialize(value)?;
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(bytes);
        if let Some(retention) = effective_retention(retention) {
            cmd.arg("PX").arg(retention.as_millis().max(1) as u64);
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn entries(&self) -> Result<HashMap<String, E>> {
        let keys = self.scan_keys().await?;
        let mut entries = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(entries);
        }
        let mut conn = self.manager.clone();
        for chunk in keys.chunks(SCAN_COUNT) {
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut conn)
                .await?;
            for (full_key, value) in chunk.iter().zip(values) {
                // 在SCAN与MGET之间过期的键直接跳过
                if let (Some(key), Some(bytes)) = (self.strip_namespace(full_key), value) {
                    entries.insert(key.to_string(), self.serializer.deserialize(&bytes)?);
                }
            }
        }
        Ok(entries)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .scan_keys()
            .await?
            .iter()
            .filter_map(|k| self.strip_namespace(k).map(str::to_string))
            .collect())
    }

    async fn remaining_retention(&self, key: &str) -> Result<Retention> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("PTTL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(match ttl {
            -2 => Retention::Missing,
            ttl if ttl < 0 => Retention::Persistent,
            ttl => Retention::Expires(Duration::from_millis(ttl as u64)),
        })
    }
}
