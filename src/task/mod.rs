//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了集群内单次执行的周期任务。

pub mod runner;

use std::fmt;

pub use runner::PeriodicSingleTaskRunner;

/// 运行器状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// 轮询循环正在运行
    Running,
    /// 上下文取消或调用了 `stop`，循环正常结束
    Stopped,
    /// 任务发生panic，循环永久终止
    Panicked { message: String },
}

impl RunnerState {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunnerState::Running)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Running => f.write_str("running"),
            RunnerState::Stopped => f.write_str("stopped"),
            RunnerState::Panicked { message } => write!(f, "panicked: {}", message),
        }
    }
}
