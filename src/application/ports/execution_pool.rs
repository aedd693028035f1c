//! Execution Pool Port - 分块执行池
//!
//! 定义任务提交、结果收集与任务状态机，具体实现在 infrastructure/pool 层

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::BackendSpec;
use crate::domain::translation::{Chunk, RequestId, TargetLanguage, TranslationResult};

/// 结果收集在任务超时之外额外等待的时间（用于强杀与替换 worker）
pub const COLLECT_GRACE: Duration = Duration::from_secs(5);

/// Execution Pool 错误
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Pool is shut down")]
    ShutDown,
}

/// 任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态
///
/// ```text
/// Submitted -> Running -> Succeeded
///                      -> Failed   -> Retrying -> Submitted
///                      -> TimedOut -> Retrying -> Submitted
///                      -> Failed | TimedOut -> Abandoned
/// 任意非终态 -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Retrying,
    Abandoned,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
            TaskState::Retrying => "retrying",
            TaskState::Abandoned => "abandoned",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// 终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Abandoned | TaskState::Cancelled
        )
    }

    /// 状态机允许的转换
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Submitted, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Failed, Retrying)
                | (TimedOut, Retrying)
                | (Failed, Abandoned)
                | (TimedOut, Abandoned)
                | (Retrying, Submitted)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态机不允许的转换
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub to: TaskState,
}

/// 一个分块在所有尝试中经历的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLifecycle {
    history: Vec<TaskState>,
}

impl TaskLifecycle {
    /// 从 `Submitted` 开始
    pub fn new() -> Self {
        Self {
            history: vec![TaskState::Submitted],
        }
    }

    pub fn state(&self) -> TaskState {
        self.history
            .last()
            .copied()
            .unwrap_or(TaskState::Submitted)
    }

    pub fn history(&self) -> &[TaskState] {
        &self.history
    }

    pub fn advance(&mut self, next: TaskState) -> Result<(), InvalidTransition> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.history.push(next);
        Ok(())
    }
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// 提交到执行池的任务
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub chunk: Chunk,
    pub spec: BackendSpec,
    pub target_language: TargetLanguage,
    pub attempt: u32,
    pub timeout: Duration,
    /// 取消后排队中的任务直接丢弃，运行中的 worker 被强杀
    pub cancel: CancellationToken,
}

/// 任务执行结果
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// 后端返回了结果（成功或失败）
    Completed(TranslationResult),
    /// worker 崩溃或失联
    Crashed { reason: String },
    /// 超时被强杀
    TimedOut { after: Duration },
    Cancelled,
}

impl WorkerOutcome {
    /// 对应的任务状态
    pub fn state(&self) -> TaskState {
        match self {
            WorkerOutcome::Completed(result) if result.is_success() => TaskState::Succeeded,
            WorkerOutcome::Completed(_) | WorkerOutcome::Crashed { .. } => TaskState::Failed,
            WorkerOutcome::TimedOut { .. } => TaskState::TimedOut,
            WorkerOutcome::Cancelled => TaskState::Cancelled,
        }
    }

    /// 失败原因（成功时为 None）
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            WorkerOutcome::Completed(result) if result.is_success() => None,
            WorkerOutcome::Completed(result) => Some(result.error_summary()),
            WorkerOutcome::Crashed { reason } => Some(format!("worker crashed: {}", reason)),
            WorkerOutcome::TimedOut { after } => {
                Some(format!("timed out after {:.1}s", after.as_secs_f64()))
            }
            WorkerOutcome::Cancelled => Some("cancelled".to_string()),
        }
    }
}

/// 已提交任务的句柄
#[derive(Debug)]
pub struct TaskHandle {
    pub task_id: TaskId,
    started: oneshot::Receiver<()>,
    outcome: oneshot::Receiver<WorkerOutcome>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn new(
        task_id: TaskId,
        started: oneshot::Receiver<()>,
        outcome: oneshot::Receiver<WorkerOutcome>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            started,
            outcome,
            cancel,
        }
    }

    /// 取消任务
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 等待任务开始运行，然后最多等待 `timeout`（加上强杀余量）
    pub async fn wait(self, timeout: Duration) -> WorkerOutcome {
        self.wait_with_grace(timeout, COLLECT_GRACE).await
    }

    pub async fn wait_with_grace(mut self, timeout: Duration, grace: Duration) -> WorkerOutcome {
        tokio::select! {
            biased;
            outcome = &mut self.outcome => {
                return outcome.unwrap_or_else(|_| WorkerOutcome::Crashed {
                    reason: "pool dropped the task".to_string(),
                });
            }
            _ = &mut self.started => {}
        }

        match tokio::time::timeout(timeout + grace, &mut self.outcome).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => WorkerOutcome::Crashed {
                reason: "pool dropped the task".to_string(),
            },
            Err(_) => {
                self.cancel.cancel();
                WorkerOutcome::TimedOut { after: timeout }
            }
        }
    }
}

/// 单个 worker 槽位状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSlotStatus {
    pub slot: usize,
    pub pid: Option<u32>,
    pub alive: bool,
    pub busy: bool,
    pub tasks_completed: u64,
    pub restarts: u64,
}

/// 执行池状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub worker_count: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub total_restarts: u64,
    pub workers: Vec<WorkerSlotStatus>,
}

/// Execution Pool Port
#[async_trait]
pub trait ExecutionPoolPort: Send + Sync {
    /// 提交任务，队列满时等待
    async fn submit(&self, task: WorkerTask) -> Result<TaskHandle, PoolError>;

    /// 收集任务结果，任务开始运行后最多等待 `timeout`
    async fn collect(&self, handle: TaskHandle, timeout: Duration) -> WorkerOutcome {
        handle.wait(timeout).await
    }

    /// 配置的 worker 数量
    fn worker_count(&self) -> usize;

    /// 状态快照
    fn status(&self) -> PoolStatus;

    /// 关闭执行池并结束所有 worker
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::translation::{ModelBackendKind, ResultMetadata};

    #[test]
    fn test_state_machine_transitions() {
        use TaskState::*;
        assert!(Submitted.can_transition_to(Running));
        assert!(Running.can_transition_to(TimedOut));
        assert!(TimedOut.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Submitted));
        assert!(Failed.can_transition_to(Abandoned));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Succeeded.can_transition_to(Cancelled));
        assert!(!Submitted.can_transition_to(Succeeded));
        assert!(!Abandoned.can_transition_to(Retrying));
    }

    #[test]
    fn test_lifecycle_retry_then_success() {
        use TaskState::*;
        let mut lifecycle = TaskLifecycle::new();
        for next in [Running, TimedOut, Retrying, Submitted, Running, Succeeded] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.state(), Succeeded);
        assert_eq!(lifecycle.history().len(), 7);

        let err = lifecycle.advance(Cancelled).unwrap_err();
        assert_eq!(err.from, Succeeded);
        assert_eq!(err.to_string(), "invalid task transition: succeeded -> cancelled");
        assert_eq!(lifecycle.state(), Succeeded);
    }

    #[test]
    fn test_lifecycle_rejects_skipping_running() {
        let mut lifecycle = TaskLifecycle::new();
        assert!(lifecycle.advance(TaskState::Failed).is_err());
        assert!(lifecycle.advance(TaskState::Cancelled).is_ok());
        assert_eq!(lifecycle.history(), &[TaskState::Submitted, TaskState::Cancelled]);
    }

    #[test]
    fn test_outcome_state_mapping() {
        let meta = ResultMetadata::new("m", "r", ModelBackendKind::Local);
        let ok = WorkerOutcome::Completed(TranslationResult::success("x", 1.0, meta.clone()));
        assert_eq!(ok.state(), TaskState::Succeeded);
        assert!(ok.failure_reason().is_none());

        let failed = WorkerOutcome::Completed(TranslationResult::failure("bad", meta));
        assert_eq!(failed.state(), TaskState::Failed);
        assert_eq!(failed.failure_reason().as_deref(), Some("bad"));

        let crashed = WorkerOutcome::Crashed {
            reason: "exit 1".to_string(),
        };
        assert_eq!(crashed.state(), TaskState::Failed);

        let timed_out = WorkerOutcome::TimedOut {
            after: Duration::from_secs(2),
        };
        assert_eq!(timed_out.state(), TaskState::TimedOut);
        assert_eq!(timed_out.failure_reason().as_deref(), Some("timed out after 2.0s"));
    }

    #[tokio::test]
    async fn test_handle_returns_outcome_delivered_before_start() {
        let (_started_tx, started_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = TaskHandle::new(TaskId::new(), started_rx, outcome_rx, CancellationToken::new());
        outcome_tx.send(WorkerOutcome::Cancelled).unwrap();
        assert!(matches!(
            handle.wait(Duration::from_millis(10)).await,
            WorkerOutcome::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_handle_times_out_after_start_and_cancels() {
        let (started_tx, started_rx) = oneshot::channel();
        let (_outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let handle = TaskHandle::new(TaskId::new(), started_rx, outcome_rx, cancel.clone());
        started_tx.send(()).unwrap();
        let outcome = handle
            .wait_with_grace(Duration::from_millis(20), Duration::from_millis(20))
            .await;
        assert!(matches!(outcome, WorkerOutcome::TimedOut { .. }));
        assert!(cancel.is_cancelled());
    }
}
