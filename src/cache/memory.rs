//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于moka的进程内缓存实现。

use super::{effective_retention, Cache, Retention};
use crate::error::Result;
use crate::serialization::{JsonSerializer, Serializer};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// 进程内缓存
///
/// 值以JSON字节保存，读取时反序列化，因此调用方拿到的始终是独立副本。
/// 过期在读取时惰性检查。
///
/// 默认不限容量。用 [`MemoryCache::with_capacity`] 设置上限后条目可能被静默淘汰，
/// 此时 `CachedRepository::read_all` 只返回仍在缓存中的条目，直到下一次全量对账。
pub struct MemoryCache<E> {
    // 值: (数据, 过期时间)
    cache: MokaCache<String, (Vec<u8>, Option<Instant>)>,
    serializer: JsonSerializer,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for MemoryCache<E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            serializer: self.serializer.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> Default for MemoryCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> MemoryCache<E> {
    /// 创建不限容量的进程内缓存
    pub fn new() -> Self {
        Self::from_moka(MokaCache::builder().build())
    }

    /// 创建有容量上限的进程内缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数，超出后按moka的策略淘汰
    pub fn with_capacity(capacity: u64) -> Self {
        Self::from_moka(MokaCache::builder().max_capacity(capacity).build())
    }

    fn from_moka(cache: MokaCache<String, (Vec<u8>, Option<Instant>)>) -> Self {
        Self {
            cache,
            serializer: JsonSerializer::new(),
            _entity: PhantomData,
        }
    }

    fn live(entry: &(Vec<u8>, Option<Instant>)) -> bool {
        entry.1.map_or(true, |expire_at| Instant::now() < expire_at)
    }
}

#[async_trait]
impl<E> Cache<E> for MemoryCache<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<E>> {
        match self.cache.get(key).await {
            Some(entry) if Self::live(&entry) => {
                debug!("memory cache get: key={}, found=true", key);
                Ok(Some(self.serializer.deserialize(&entry.0)?))
            }
            Some(_) => {
                self.cache.invalidate(key).await;
                debug!("memory cache get: key={}, expired=true, removed", key);
                Ok(None)
            }
            None => {
                debug!("memory cache get: key={}, found=false", key);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &E, retention: Option<Duration>) -> Result<()> {
        let bytes = self.serializer.serialize(value)?;
        // 无法表示的截止时间视为永不过期
        let expire_at = effective_retention(retention).and_then(|d| Instant::now().checked_add(d));
        debug!(
            "memory cache set: key={}, value_len={}, retention={:?}",
            key,
            bytes.len(),
            retention
        );
        self.cache.insert(key.to_string(), (bytes, expire_at)).await;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn entries(&self) -> Result<HashMap<String, E>> {
        let mut entries = HashMap::new();
        for (key, entry) in self.cache.iter() {
            if Self::live(&entry) {
                entries.insert(key.as_ref().clone(), self.serializer.deserialize(&entry.0)?);
            }
        }
        Ok(entries)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .cache
            .iter()
            .filter(|(_, entry)| Self::live(entry))
            .map(|(key, _)| key.as_ref().clone())
            .collect())
    }

    async fn remaining_retention(&self, key: &str) -> Result<Retention> {
        Ok(match self.cache.get(key).await {
            Some(entry) if Self::live(&entry) => match entry.1 {
                Some(expire_at) => Retention::Expires(expire_at - Instant::now()),
                None => Retention::Persistent,
            },
            _ => Retention::Missing,
        })
    }
}
