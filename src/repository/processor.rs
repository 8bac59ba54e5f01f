//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基础实体与处理后实体之间的转换。

use crate::context::SyncContext;
use crate::error::Result;
use async_trait::async_trait;
use std::marker::PhantomData;

/// 实体处理器
///
/// 将仓库形态的基础实体转换为缓存形态的处理后实体，并能逆向还原。
/// `inverse_process(process(x))` 必须保留参与冲突检测的全部内容，
/// 因为读取返回的指纹是在逆向还原后的基础实体上计算的。
#[async_trait]
pub trait Processor<B, P>: Send + Sync
where
    B: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// 基础实体转换为处理后实体
    async fn process(&self, ctx: &SyncContext, base: &B) -> Result<P>;

    /// 处理后实体还原为基础实体
    async fn inverse_process(&self, ctx: &SyncContext, processed: &P) -> Result<B>;
}

/// 恒等处理器，缓存与仓库保存相同形态
pub struct IdentityProcessor<T>(PhantomData<fn() -> T>);

impl<T> IdentityProcessor<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for IdentityProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for IdentityProcessor<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for IdentityProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityProcessor")
    }
}

#[async_trait]
impl<T> Processor<T, T> for IdentityProcessor<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn process(&self, _ctx: &SyncContext, base: &T) -> Result<T> {
        Ok(base.clone())
    }

    async fn inverse_process(&self, _ctx: &SyncContext, processed: &T) -> Result<T> {
        Ok(processed.clone())
    }
}
