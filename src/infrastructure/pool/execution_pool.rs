//! Execution Pool - 分块执行池
//!
//! 固定数量的 worker 槽位从同一个有界队列取任务。每个槽位由一个监督任务
//! 管理：任务超时、被取消或 worker 崩溃时强杀 worker，先启动替换的 worker，
//! 再把结果交给调用方。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::launcher::{WorkerConnection, WorkerFault, WorkerLauncher};
use crate::application::ports::{
    ExecutionPoolPort, PoolError, PoolStatus, TaskHandle, WorkerOutcome, WorkerSlotStatus,
    WorkerTask,
};
use crate::domain::translation::TranslationResult;

/// 重启失败后的最长等待
const MAX_RELAUNCH_BACKOFF: Duration = Duration::from_secs(5);

/// 执行池配置
#[derive(Debug, Clone)]
pub struct ExecutionPoolConfig {
    pub worker_count: usize,
    /// 排队任务上限，队列满时 `submit` 等待
    pub queue_capacity: usize,
}

impl Default for ExecutionPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
        }
    }
}

struct QueuedTask {
    task: WorkerTask,
    started: oneshot::Sender<()>,
    reply: oneshot::Sender<WorkerOutcome>,
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    pid: Option<u32>,
    alive: bool,
    busy: bool,
    tasks_completed: u64,
    restarts: u64,
}

/// worker 登记表
struct Registry {
    slots: Mutex<Vec<SlotState>>,
}

impl Registry {
    fn update(&self, slot: usize, f: impl FnOnce(&mut SlotState)) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = slots.get_mut(slot) {
            f(state);
        }
    }

    fn snapshot(&self) -> Vec<SlotState> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// 执行池
pub struct ExecutionPool {
    config: ExecutionPoolConfig,
    sender: mpsc::Sender<QueuedTask>,
    registry: Arc<Registry>,
    kill_signals: Vec<Arc<Notify>>,
    shutdown: CancellationToken,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionPool {
    /// 启动执行池，所有 worker 立即启动；任一 worker 启动失败即返回错误
    pub async fn start(
        config: ExecutionPoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self, PoolError> {
        if config.worker_count == 0 {
            return Err(PoolError::InvalidConfig(
                "worker_count must be positive".to_string(),
            ));
        }
        if config.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be positive".to_string(),
            ));
        }

        let mut connections = Vec::with_capacity(config.worker_count);
        for slot in 0..config.worker_count {
            match launcher.launch(slot).await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    for mut conn in connections {
                        conn.kill().await;
                    }
                    return Err(PoolError::SpawnFailed(format!("slot {}: {}", slot, e)));
                }
            }
        }

        let registry = Arc::new(Registry {
            slots: Mutex::new(
                connections
                    .iter()
                    .map(|conn| SlotState {
                        pid: conn.pid(),
                        alive: true,
                        ..SlotState::default()
                    })
                    .collect(),
            ),
        });

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let kill_signals: Vec<Arc<Notify>> = (0..config.worker_count)
            .map(|_| Arc::new(Notify::new()))
            .collect();

        let supervisors = connections
            .into_iter()
            .enumerate()
            .map(|(slot, conn)| {
                let supervisor = SlotSupervisor {
                    slot,
                    conn,
                    launcher: launcher.clone(),
                    queue: queue.clone(),
                    registry: registry.clone(),
                    kill: kill_signals[slot].clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(supervisor.run())
            })
            .collect();

        tracing::info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            "ExecutionPool started"
        );

        Ok(Self {
            config,
            sender,
            registry,
            kill_signals,
            shutdown,
            supervisors: Mutex::new(supervisors),
        })
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 强制结束指定槽位的 worker，槽位随后自动重启
    pub fn kill_worker(&self, slot: usize) -> bool {
        match self.kill_signals.get(slot) {
            Some(signal) => {
                tracing::warn!(slot, "Killing worker on request");
                signal.notify_one();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ExecutionPoolPort for ExecutionPool {
    async fn submit(&self, task: WorkerTask) -> Result<TaskHandle, PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }

        let (started_tx, started_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = TaskHandle::new(task.task_id, started_rx, reply_rx, task.cancel.clone());

        tracing::debug!(
            task_id = %task.task_id,
            request_id = %task.request_id,
            chunk_index = task.chunk.index,
            attempt = task.attempt,
            "Submitting task"
        );

        let queued = QueuedTask {
            task,
            started: started_tx,
            reply: reply_tx,
        };
        tokio::select! {
            sent = self.sender.send(queued) => sent.map_err(|_| PoolError::ShutDown)?,
            _ = self.shutdown.cancelled() => return Err(PoolError::ShutDown),
        }
        Ok(handle)
    }

    fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    fn status(&self) -> PoolStatus {
        let workers: Vec<WorkerSlotStatus> = self
            .registry
            .snapshot()
            .into_iter()
            .enumerate()
            .map(|(slot, state)| WorkerSlotStatus {
                slot,
                pid: state.pid,
                alive: state.alive,
                busy: state.busy,
                tasks_completed: state.tasks_completed,
                restarts: state.restarts,
            })
            .collect();

        PoolStatus {
            worker_count: self.config.worker_count,
            live_workers: workers.iter().filter(|w| w.alive).count(),
            busy_workers: workers.iter().filter(|w| w.busy).count(),
            total_restarts: workers.iter().map(|w| w.restarts).sum(),
            workers,
        }
    }

    async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let supervisors = std::mem::take(
            &mut *self
                .supervisors
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in supervisors {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Slot supervisor terminated abnormally");
            }
        }
        tracing::info!("ExecutionPool stopped");
    }
}

/// 单个任务的执行结局
enum Step {
    Finished(Result<TranslationResult, WorkerFault>),
    TimedOut,
    Cancelled,
    Killed,
}

/// 槽位监督任务
struct SlotSupervisor {
    slot: usize,
    conn: Box<dyn WorkerConnection>,
    launcher: Arc<dyn WorkerLauncher>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>,
    registry: Arc<Registry>,
    kill: Arc<Notify>,
    shutdown: CancellationToken,
}

impl SlotSupervisor {
    async fn next_task(queue: &tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>) -> Option<QueuedTask> {
        queue.lock().await.recv().await
    }

    async fn run(mut self) {
        let slot = self.slot;
        tracing::debug!(slot, "Slot supervisor started");

        loop {
            let queued = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.kill.notified() => {
                    if !self.restart("killed while idle").await {
                        break;
                    }
                    continue;
                }
                status = self.conn.exited() => {
                    let reason = format!("exited while idle ({})", status);
                    if !self.restart(&reason).await {
                        break;
                    }
                    continue;
                }
                queued = Self::next_task(&self.queue) => queued,
            };
            let Some(queued) = queued else {
                break;
            };

            // 空闲期间退出但尚未被察觉的 worker 先替换，不计入任务
            if !self.conn.is_alive() && !self.restart("found dead before dispatch").await {
                let _ = queued.reply.send(WorkerOutcome::Cancelled);
                break;
            }

            let QueuedTask {
                task,
                started,
                reply,
            } = queued;

            if task.cancel.is_cancelled() {
                tracing::debug!(slot, task_id = %task.task_id, "Skipping cancelled task");
                let _ = reply.send(WorkerOutcome::Cancelled);
                continue;
            }

            let _ = started.send(());
            self.registry.update(slot, |s| s.busy = true);

            let step = tokio::select! {
                result = self.conn.execute(&task) => Step::Finished(result),
                _ = tokio::time::sleep(task.timeout) => Step::TimedOut,
                _ = task.cancel.cancelled() => Step::Cancelled,
                _ = self.kill.notified() => Step::Killed,
                _ = self.shutdown.cancelled() => Step::Cancelled,
            };

            let (outcome, restart_reason) = match step {
                Step::Finished(Ok(result)) => (WorkerOutcome::Completed(result), None),
                Step::Finished(Err(fault)) => {
                    let reason = fault.to_string();
                    (
                        WorkerOutcome::Crashed {
                            reason: reason.clone(),
                        },
                        Some(reason),
                    )
                }
                Step::TimedOut => (
                    WorkerOutcome::TimedOut {
                        after: task.timeout,
                    },
                    Some(format!("timed out after {:.1}s", task.timeout.as_secs_f64())),
                ),
                Step::Cancelled => (WorkerOutcome::Cancelled, Some("task cancelled".to_string())),
                Step::Killed => (
                    WorkerOutcome::Crashed {
                        reason: "worker killed".to_string(),
                    },
                    Some("killed while busy".to_string()),
                ),
            };

            tracing::debug!(
                slot,
                task_id = %task.task_id,
                chunk_index = task.chunk.index,
                state = outcome.state().as_str(),
                "Task finished"
            );

            // 先恢复容量，再交付结果
            let alive = match &restart_reason {
                Some(reason) => self.restart(reason).await,
                None => true,
            };
            self.registry.update(slot, |s| {
                s.busy = false;
                s.tasks_completed += 1;
            });
            let _ = reply.send(outcome);

            if !alive {
                break;
            }
        }

        self.conn.kill().await;
        self.registry.update(slot, |s| {
            s.alive = false;
            s.busy = false;
            s.pid = None;
        });
        tracing::debug!(slot, "Slot supervisor stopped");
    }

    /// 强杀当前 worker 并启动替换；执行池关闭时返回 false
    async fn restart(&mut self, reason: &str) -> bool {
        let slot = self.slot;
        tracing::warn!(slot, pid = ?self.conn.pid(), reason, "Restarting worker");

        self.conn.kill().await;
        self.registry.update(slot, |s| {
            s.alive = false;
            s.pid = None;
        });

        let mut backoff = Duration::from_millis(100);
        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }
            match self.launcher.launch(slot).await {
                Ok(conn) => {
                    let pid = conn.pid();
                    self.conn = conn;
                    self.registry.update(slot, |s| {
                        s.alive = true;
                        s.pid = pid;
                        s.restarts += 1;
                    });
                    return true;
                }
                Err(e) => {
                    tracing::error!(slot, error = %e, "Failed to relaunch worker");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.cancelled() => return false,
                    }
                    backoff = (backoff * 2).min(MAX_RELAUNCH_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Instant;

    use super::*;
    use crate::application::ports::{
        BackendSpec, LocalModelSettings, ModelBackendPort, TaskId, TaskState,
    };
    use crate::domain::translation::{
        BoundaryKind, Chunk, ModelBackendKind, RequestId, ResultMetadata, TargetLanguage,
    };
    use crate::infrastructure::adapters::backends::{BackendRegistry, FakeModelBackend};
    use crate::infrastructure::pool::launcher::InProcessWorkerLauncher;

    fn task(index: usize, timeout: Duration) -> WorkerTask {
        WorkerTask {
            task_id: TaskId::new(),
            request_id: RequestId::new(),
            chunk: Chunk {
                index,
                source_text: format!("PRINT {}\n", index),
                kind: BoundaryKind::WholeBlock,
                start_line: index + 1,
                end_line: index + 1,
                leading_context: None,
                nesting_depth: 0,
                continues: false,
            },
            spec: BackendSpec::Local(LocalModelSettings {
                models_dir: PathBuf::from("models"),
                model_name: "fake".to_string(),
                revision: "v1".to_string(),
            }),
            target_language: TargetLanguage::python(),
            attempt: 1,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    async fn start_pool(fake: Arc<FakeModelBackend>, worker_count: usize, queue_capacity: usize) -> ExecutionPool {
        let mut registry = BackendRegistry::empty();
        registry.register(ModelBackendKind::Local, move |_| {
            Ok(fake.clone() as Arc<dyn ModelBackendPort>)
        });
        let launcher = InProcessWorkerLauncher::new(registry.arc()).arc();
        ExecutionPool::start(
            ExecutionPoolConfig {
                worker_count,
                queue_capacity,
            },
            launcher,
        )
        .await
        .unwrap()
    }

    async fn wait_for_restarts(pool: &ExecutionPool, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.status().total_restarts < expected && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_rejects_zero_workers() {
        let launcher = InProcessWorkerLauncher::new(BackendRegistry::empty().arc()).arc();
        let err = ExecutionPool::start(
            ExecutionPoolConfig {
                worker_count: 0,
                queue_capacity: 1,
            },
            launcher,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_submit_and_collect() {
        let fake = FakeModelBackend::new().arc();
        let pool = start_pool(fake.clone(), 2, 8).await;

        let handle = pool.submit(task(0, Duration::from_secs(1))).await.unwrap();
        let outcome = pool.collect(handle, Duration::from_secs(1)).await;

        assert_eq!(outcome.state(), TaskState::Succeeded);
        match outcome {
            WorkerOutcome::Completed(result) => assert_eq!(result.code(), Some("# PRINT 0\n")),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let status = pool.status();
        assert_eq!(status.worker_count, 2);
        assert_eq!(status.live_workers, 2);
        assert_eq!(status.total_restarts, 0);
        assert_eq!(status.workers.iter().map(|w| w.tasks_completed).sum::<u64>(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_kills_and_replaces_worker() {
        let fake = FakeModelBackend::new().hang_chunk(0).arc();
        let pool = start_pool(fake.clone(), 1, 4).await;

        let handle = pool.submit(task(0, Duration::from_millis(100))).await.unwrap();
        let outcome = pool.collect(handle, Duration::from_millis(100)).await;
        assert!(matches!(outcome, WorkerOutcome::TimedOut { .. }));

        // 结果交付前替换 worker 已就绪
        assert_eq!(pool.status().total_restarts, 1);
        assert_eq!(pool.status().live_workers, 1);

        let handle = pool.submit(task(1, Duration::from_secs(1))).await.unwrap();
        let outcome = pool.collect(handle, Duration::from_secs(1)).await;
        assert_eq!(outcome.state(), TaskState::Succeeded);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_crash() {
        let fake = FakeModelBackend::new().panic_chunk(3).arc();
        let pool = start_pool(fake, 1, 4).await;

        let handle = pool.submit(task(3, Duration::from_secs(1))).await.unwrap();
        let outcome = pool.collect(handle, Duration::from_secs(1)).await;

        assert_eq!(outcome.state(), TaskState::Failed);
        assert!(outcome.failure_reason().unwrap().contains("worker crashed"));
        assert_eq!(pool.status().total_restarts, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_skipped() {
        let fake = FakeModelBackend::new().arc();
        let pool = start_pool(fake.clone(), 1, 4).await;

        let t = task(0, Duration::from_secs(1));
        t.cancel.cancel();
        let handle = pool.submit(t).await.unwrap();
        let outcome = pool.collect(handle, Duration::from_secs(1)).await;

        assert!(matches!(outcome, WorkerOutcome::Cancelled));
        assert_eq!(fake.total_calls(), 0);
        assert_eq!(pool.status().total_restarts, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_running_task_kills_worker() {
        let fake = FakeModelBackend::new().hang_chunk(0).arc();
        let pool = start_pool(fake.clone(), 1, 4).await;

        let t = task(0, Duration::from_secs(30));
        let cancel = t.cancel.clone();
        let handle = pool.submit(t).await.unwrap();

        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let outcome = pool.collect(handle, Duration::from_secs(30)).await;

        assert!(matches!(outcome, WorkerOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(pool.status().total_restarts, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let fake = FakeModelBackend::new()
            .with_delay(Duration::from_millis(300))
            .arc();
        let pool = start_pool(fake, 1, 1).await;

        let first = pool.submit(task(0, Duration::from_secs(2))).await.unwrap();
        let second = pool.submit(task(1, Duration::from_secs(2))).await.unwrap();
        let third = tokio::time::timeout(
            Duration::from_millis(100),
            pool.submit(task(2, Duration::from_secs(2))),
        )
        .await;
        assert!(third.is_err(), "submit should block while the queue is full");

        assert!(pool.collect(first, Duration::from_secs(2)).await.state() == TaskState::Succeeded);
        assert!(pool.collect(second, Duration::from_secs(2)).await.state() == TaskState::Succeeded);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_kill_idle_worker_restarts_slot() {
        let fake = FakeModelBackend::new().arc();
        let pool = start_pool(fake, 2, 4).await;

        assert!(pool.kill_worker(1));
        assert!(!pool.kill_worker(7));
        wait_for_restarts(&pool, 1).await;

        let status = pool.status();
        assert_eq!(status.workers[1].restarts, 1);
        assert_eq!(status.workers[0].restarts, 0);
        assert_eq!(status.live_workers, 2);
        pool.shutdown().await;
    }

    /// 可从外部结束的 worker，结束后写入任务会失败
    struct MortalLauncher {
        death: Arc<Notify>,
    }

    struct MortalWorker {
        death: Arc<Notify>,
        dead: bool,
    }

    #[async_trait]
    impl WorkerLauncher for MortalLauncher {
        async fn launch(&self, _slot: usize) -> Result<Box<dyn WorkerConnection>, WorkerFault> {
            Ok(Box::new(MortalWorker {
                death: self.death.clone(),
                dead: false,
            }))
        }
    }

    #[async_trait]
    impl WorkerConnection for MortalWorker {
        fn pid(&self) -> Option<u32> {
            None
        }

        async fn execute(&mut self, task: &WorkerTask) -> Result<TranslationResult, WorkerFault> {
            if self.dead {
                return Err(WorkerFault::Io("Broken pipe".to_string()));
            }
            Ok(TranslationResult::success(
                task.chunk.source_text.clone(),
                1.0,
                ResultMetadata::new("mortal", "v1", ModelBackendKind::Local),
            ))
        }

        async fn exited(&mut self) -> String {
            self.death.notified().await;
            self.dead = true;
            "signal: 9 (SIGKILL)".to_string()
        }

        fn is_alive(&mut self) -> bool {
            !self.dead
        }

        async fn kill(&mut self) {
            self.dead = true;
        }
    }

    #[tokio::test]
    async fn test_worker_dying_while_idle_is_replaced() {
        let death = Arc::new(Notify::new());
        let pool = ExecutionPool::start(
            ExecutionPoolConfig {
                worker_count: 1,
                queue_capacity: 4,
            },
            Arc::new(MortalLauncher {
                death: death.clone(),
            }),
        )
        .await
        .unwrap();

        death.notify_one();
        wait_for_restarts(&pool, 1).await;
        assert_eq!(pool.status().total_restarts, 1);
        assert_eq!(pool.status().live_workers, 1);

        // 下一个任务不应被算作崩溃
        let handle = pool.submit(task(0, Duration::from_secs(1))).await.unwrap();
        let outcome = pool.collect(handle, Duration::from_secs(1)).await;
        assert_eq!(outcome.state(), TaskState::Succeeded);
        assert_eq!(pool.status().total_restarts, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_kill_busy_worker_is_crash() {
        let fake = FakeModelBackend::new().hang_chunk(0).arc();
        let pool = start_pool(fake, 1, 4).await;

        let handle = pool.submit(task(0, Duration::from_secs(30))).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.status().busy_workers == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pool.kill_worker(0);

        let outcome = pool.collect(handle, Duration::from_secs(30)).await;
        assert!(matches!(outcome, WorkerOutcome::Crashed { .. }));
        assert_eq!(pool.status().total_restarts, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let fake = FakeModelBackend::new().arc();
        let pool = start_pool(fake, 1, 4).await;
        pool.shutdown().await;

        assert!(matches!(
            pool.submit(task(0, Duration::from_secs(1))).await,
            Err(PoolError::ShutDown)
        ));
        assert_eq!(pool.status().live_workers, 0);
    }
}
