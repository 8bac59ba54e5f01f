//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了周期单任务运行器。
//!
//! 运行器以固定频率轮询：获得任务锁后检查上次执行时间，超过任务间隔才执行任务，
//! 成功后更新执行时间。轮询频率只决定调度延迟，不限制执行频率。

use super::RunnerState;
use crate::config::PeriodicTaskConfig;
use crate::context::SyncContext;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

type TaskFn = Arc<dyn Fn(SyncContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 轮询间隔上限
const MAX_RUNNER_FREQUENCY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// 周期单任务运行器
///
/// 同一任务键的多个运行器（可以位于不同进程）共享一个协调器时，
/// 每个任务间隔内至多执行一次任务。任务返回错误时记录日志并在下一次轮询重试；
/// 任务panic时运行器永久终止，状态变为 [`RunnerState::Panicked`]，
/// 由上层监督者通过 [`PeriodicSingleTaskRunner::done`] 感知并处理。
pub struct PeriodicSingleTaskRunner {
    task_key: String,
    context: SyncContext,
    state: watch::Receiver<RunnerState>,
}

struct Worker {
    task_key: String,
    task: TaskFn,
    coordinator: Arc<dyn Coordinator>,
    config: PeriodicTaskConfig,
}

impl PeriodicSingleTaskRunner {
    /// 启动运行器
    ///
    /// 第一次轮询立即执行，之后每 `runner_frequency` 轮询一次。
    ///
    /// # 参数
    ///
    /// * `ctx` - 父上下文，取消后运行器停止
    /// * `task_key` - 任务名，同时作为锁键和执行时间键
    /// * `task` - 任务函数，接收租约上下文，租约丢失时该上下文取消
    /// * `coordinator` - 协调器
    /// * `config` - 任务间隔、超时和轮询频率
    pub fn spawn<F, Fut>(
        ctx: &SyncContext,
        task_key: impl Into<String>,
        task: F,
        coordinator: Arc<dyn Coordinator>,
        config: PeriodicTaskConfig,
    ) -> Self
    where
        F: Fn(SyncContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task_key = task_key.into();
        let context = ctx.child();
        let (state_tx, state_rx) = watch::channel(RunnerState::Running);

        let worker = Worker {
            task_key: task_key.clone(),
            task: Arc::new(move |ctx| task(ctx).boxed()),
            coordinator,
            config,
        };
        let worker_ctx = context.clone();
        tokio::spawn(async move {
            let key = worker.task_key.clone();
            let outcome = AssertUnwindSafe(worker.run(worker_ctx)).catch_unwind().await;
            let state = match outcome {
                Ok(()) => {
                    info!("periodic-task runner '{}' stopped", key);
                    RunnerState::Stopped
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    // 展开后已无法取得panic位置的调用栈，位置由进程的panic hook输出
                    error!(
                        task = %key,
                        "periodic-task runner '{}' exited due to panic: {}",
                        key,
                        message
                    );
                    GLOBAL_METRICS.record_task(&key, "panicked");
                    RunnerState::Panicked { message }
                }
            };
            state_tx.send_replace(state);
        });

        Self {
            task_key,
            context,
            state: state_rx,
        }
    }

    /// 任务名
    pub fn task_key(&self) -> &str {
        &self.task_key
    }

    /// 当前状态
    pub fn state(&self) -> RunnerState {
        self.state.borrow().clone()
    }

    /// 运行器是否已经终止
    pub fn is_done(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// 等待运行器终止并返回终止状态
    pub async fn done(&self) -> RunnerState {
        let mut state = self.state.clone();
        let terminal = match state.wait_for(RunnerState::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            // 运行时关闭时后台任务可能未发送终止状态
            Err(_) => RunnerState::Stopped,
        };
        terminal
    }

    /// 停止运行器，正在执行的任务通过上下文收到取消信号
    pub fn stop(&self) {
        self.context.cancel();
    }
}

impl Worker {
    async fn run(self, ctx: SyncContext) {
        let frequency = self
            .config
            .runner_frequency
            .clamp(Duration::from_millis(1), MAX_RUNNER_FREQUENCY);
        let mut interval = tokio::time::interval(frequency);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "periodic-task runner '{}' started, polling every {:?}",
            self.task_key, frequency
        );

        loop {
            tokio::select! {
                biased;
                _ = ctx.done() => break,
                _ = interval.tick() => self.poll(&ctx).await,
            }
        }
    }

    async fn poll(&self, ctx: &SyncContext) {
        let tctx = ctx.with_timeout(self.config.task_timeout);
        let mut lease = match self.coordinator.obtain_lock(&tctx, &self.task_key).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(
                    "failed to obtain lock for periodic-task '{}': {}",
                    self.task_key, e
                );
                GLOBAL_METRICS.record_task(&self.task_key, "lock_failed");
                return;
            }
        };

        let lctx = lease.context().clone();
        match self.execute(&lctx).await {
            Ok(true) => GLOBAL_METRICS.record_task(&self.task_key, "executed"),
            Ok(false) => GLOBAL_METRICS.record_task(&self.task_key, "skipped"),
            Err(e) => {
                warn!("failed to perform periodic-task '{}': {}", self.task_key, e);
                GLOBAL_METRICS.record_task(&self.task_key, "failed");
            }
        }
        lease.release();
    }

    /// 执行任务，返回是否真正执行
    async fn execute(&self, lctx: &SyncContext) -> Result<bool> {
        let last_run = self
            .coordinator
            .last_run_timestamp(lctx, &self.task_key)
            .await?;
        if let Some(last_run) = last_run {
            // 时钟回拨导致的负值按零处理
            let elapsed = (Utc::now() - last_run).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.config.task_interval {
                debug!(
                    "periodic-task '{}' ran {:?} ago, skipping",
                    self.task_key, elapsed
                );
                return Ok(false);
            }
        }

        info!(
            "periodic-task '{}' last-run time threshold exceeded, executing task",
            self.task_key
        );
        lctx.run((self.task)(lctx.clone())).await?;
        self.coordinator
            .update_last_run_timestamp(lctx, &self.task_key)
            .await?;
        Ok(true)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
