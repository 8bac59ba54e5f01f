//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存值的序列化以及实体内容指纹的计算。

pub mod canonical;
pub mod json;

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub use canonical::{canonical_bytes, CanonicalJson, ContentIdentity};
pub use json::JsonSerializer;

/// 序列化器特征
///
/// 定义缓存后端存取实体时使用的序列化和反序列化操作
pub trait Serializer: Send + Sync {
    /// 序列化值为字节数组
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// 从字节数组反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}
