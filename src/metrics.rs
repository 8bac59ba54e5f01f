//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步工具包的指标收集功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集缓存动作、锁获取和周期任务执行的计数
#[derive(Clone, Debug)]
pub struct Metrics {
    /// 是否记录，关闭后所有 `record_*` 调用直接返回
    enabled: Arc<AtomicBool>,
    /// 缓存动作统计
    /// key: (repository, action, cause)
    pub cache_actions: Arc<Mutex<HashMap<(String, String, String), u64>>>,
    /// 锁获取结果统计
    /// key: (backend, outcome)
    pub lock_outcomes: Arc<Mutex<HashMap<(String, String), u64>>>,
    /// 指纹冲突次数
    /// key: repository
    pub hash_mismatches: Arc<Mutex<HashMap<String, u64>>>,
    /// 周期任务执行结果统计
    /// key: (task, outcome)
    pub task_runs: Arc<Mutex<HashMap<(String, String), u64>>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
            cache_actions: Arc::default(),
            lock_outcomes: Arc::default(),
            hash_mismatches: Arc::default(),
            task_runs: Arc::default(),
        }
    }
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn guard<K>(map: &Mutex<HashMap<K, u64>>) -> MutexGuard<'_, HashMap<K, u64>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn increment<K: Hash + Eq>(map: &Mutex<HashMap<K, u64>>, key: K) {
    *guard(map).entry(key).or_insert(0) += 1;
}

impl Metrics {
    /// 开启或关闭指标收集
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// 记录缓存动作
    ///
    /// # 参数
    ///
    /// * `repository` - 仓库键空间名称
    /// * `action` - 动作（added/updated/removed）
    /// * `cause` - 触发原因（repository_action/reconciliation）
    pub fn record_cache_action(&self, repository: &str, action: &str, cause: &str) {
        if !self.is_enabled() {
            return;
        }
        let span = span!(Level::DEBUG, "cache_action", repository, action, cause);
        let _enter = span.enter();
        increment(
            &self.cache_actions,
            (repository.to_string(), action.to_string(), cause.to_string()),
        );
    }

    /// 记录锁获取结果
    pub fn record_lock(&self, backend: &str, outcome: &str) {
        if !self.is_enabled() {
            return;
        }
        increment(
            &self.lock_outcomes,
            (backend.to_string(), outcome.to_string()),
        );
    }

    /// 记录指纹冲突
    pub fn record_hash_mismatch(&self, repository: &str) {
        if !self.is_enabled() {
            return;
        }
        increment(&self.hash_mismatches, repository.to_string());
    }

    /// 记录周期任务结果
    ///
    /// # 参数
    ///
    /// * `task` - 任务名称
    /// * `outcome` - 结果（executed/skipped/failed/lock_failed/panicked）
    pub fn record_task(&self, task: &str, outcome: &str) {
        if !self.is_enabled() {
            return;
        }
        increment(&self.task_runs, (task.to_string(), outcome.to_string()));
    }

    /// 读取缓存动作计数
    pub fn cache_action_count(&self, repository: &str, action: &str, cause: &str) -> u64 {
        guard(&self.cache_actions)
            .get(&(repository.to_string(), action.to_string(), cause.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// 读取周期任务结果计数
    pub fn task_count(&self, task: &str, outcome: &str) -> u64 {
        guard(&self.task_runs)
            .get(&(task.to_string(), outcome.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为 Prometheus 文本格式
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    for ((repository, action, cause), v) in guard(&metrics.cache_actions).iter() {
        output.push_str(&format!(
            "oxsync_cache_actions_total{{repository=\"{}\", action=\"{}\", cause=\"{}\"}} {}\n",
            repository, action, cause, v
        ));
    }
    for ((backend, outcome), v) in guard(&metrics.lock_outcomes).iter() {
        output.push_str(&format!(
            "oxsync_lock_obtain_total{{backend=\"{}\", outcome=\"{}\"}} {}\n",
            backend, outcome, v
        ));
    }
    for (k, v) in guard(&metrics.hash_mismatches).iter() {
        output.push_str(&format!(
            "oxsync_hash_mismatch_total{{repository=\"{}\"}} {}\n",
            k, v
        ));
    }
    for ((task, outcome), v) in guard(&metrics.task_runs).iter() {
        output.push_str(&format!(
            "oxsync_task_runs_total{{task=\"{}\", outcome=\"{}\"}} {}\n",
            task, outcome, v
        ));
    }
    output
}
