//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了实体的规范化编码和内容指纹。
//!
//! 规范化编码对对象键递归排序，因此语义相同的实体无论字段顺序如何
//! 都得到相同的字节序列和相同的指纹。

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// 计算值的规范化JSON编码
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// 内容身份
///
/// 决定两个实体是否“相同”以及实体的内容指纹。仓库使用它检测
/// 乐观并发冲突，并在对账时判断缓存是否需要更新。
pub trait ContentIdentity<T>: Send + Sync {
    /// 计算实体的内容指纹
    fn fingerprint(&self, value: &T) -> Result<String>;

    /// 判断两个实体内容是否相同，默认比较指纹
    fn equal(&self, a: &T, b: &T) -> Result<bool> {
        Ok(self.fingerprint(a)? == self.fingerprint(b)?)
    }
}

/// 基于规范化JSON的内容身份
///
/// 指纹为规范化编码的 SHA-256 十六进制摘要
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalJson;

impl<T: Serialize> ContentIdentity<T> for CanonicalJson {
    fn fingerprint(&self, value: &T) -> Result<String> {
        let bytes = canonical_bytes(value)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    fn equal(&self, a: &T, b: &T) -> Result<bool> {
        Ok(canonical_bytes(a)? == canonical_bytes(b)?)
    }
}
