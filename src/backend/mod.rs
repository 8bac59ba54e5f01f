//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis后端的连接提供者。

pub mod redis_provider;

pub use redis_provider::{DefaultRedisProvider, RedisProvider};
