//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了携带取消信号和截止时间的同步上下文。
//!
//! 所有锁、仓库和周期任务操作都接收一个 [`SyncContext`]。子上下文在父上下文
//! 取消时一并取消；锁租约的上下文在租约丢失时取消，因此长时间运行的临界区
//! 可以通过 [`SyncContext::run`] 在租约失效时立即中止。

use crate::error::{Result, SyncError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 同步上下文
#[derive(Clone, Debug)]
pub struct SyncContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::background()
    }
}

impl SyncContext {
    /// 创建一个永不过期、只能手动取消的根上下文
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 创建子上下文，继承截止时间，父上下文取消时随之取消
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// 创建带超时的子上下文
    ///
    /// 超时过大以至于截止时间无法表示时视为没有超时
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// 创建带截止时间的子上下文，截止时间取父子两者中较早者
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// 截止时间
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 取消此上下文及其所有子上下文
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 上下文是否已经结束（取消或超时）
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 上下文结束的原因，未结束时返回 `None`
    pub fn err(&self) -> Option<SyncError> {
        if self.token.is_cancelled() {
            Some(SyncError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(SyncError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// 等待上下文结束
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// 在上下文内执行异步操作
    ///
    /// 上下文先结束时丢弃操作并返回 `Cancelled` 或 `DeadlineExceeded`
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(self.err().unwrap_or(SyncError::Cancelled)),
            result = fut => result,
        }
    }
}
