//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存值使用的JSON序列化器。

use super::Serializer;
use crate::error::{Result, SyncError};
use serde::{de::DeserializeOwned, Serialize};

/// JSON序列化器
///
/// 缓存后端用它存取实体；启用压缩后以 gzip 包装 JSON 字节
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer {
    compress: bool,
}

impl JsonSerializer {
    /// 创建新的JSON序列化器
    pub fn new() -> Self {
        Self { compress: false }
    }

    /// 创建启用压缩的JSON序列化器，大实体写入Redis时可减少带宽
    pub fn with_compression() -> Self {
        Self { compress: true }
    }

    #[cfg(feature = "flate2")]
    fn pack(&self, json: Vec<u8>) -> Result<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        if !self.compress {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    #[cfg(not(feature = "flate2"))]
    fn pack(&self, json: Vec<u8>) -> Result<Vec<u8>> {
        Ok(json)
    }

    #[cfg(feature = "flate2")]
    fn unpack(&self, data: &[u8]) -> Result<Vec<u8>> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        if !self.compress {
            return Ok(data.to_vec());
        }
        let mut decoded = Vec::new();
        GzDecoder::new(data).read_to_end(&mut decoded)?;
        Ok(decoded)
    }

    #[cfg(not(feature = "flate2"))]
    fn unpack(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        self.pack(json)
    }

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let json = self.unpack(data)?;
        serde_json::from_slice(&json).map_err(|e| SyncError::Serialization(e.to_string()))
    }
}
