//! Worker Launcher - worker 启动与通信
//!
//! `ProcessWorkerLauncher` 为每个槽位启动一个独立的 `quill-worker` 进程，
//! 通过 stdin/stdout 交换 JSON 行；`InProcessWorkerLauncher` 在当前进程内
//! 用独立的 tokio 任务模拟 worker，panic 视为崩溃。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::AbortHandle;

use super::protocol::{decode_line, encode_line, WorkerReply, WorkerRequest};
use crate::application::ports::{BackendFactoryPort, TranslateConfig, WorkerTask};
use crate::domain::translation::{ResultMetadata, TranslationResult};

/// worker 故障
#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("worker exited: {0}")]
    Exited(String),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl From<std::io::Error> for WorkerFault {
    fn from(e: std::io::Error) -> Self {
        WorkerFault::Io(e.to_string())
    }
}

/// 与单个 worker 的连接
#[async_trait]
pub trait WorkerConnection: Send {
    fn pid(&self) -> Option<u32>;

    /// 执行一个任务；返回 Err 表示 worker 已不可用
    async fn execute(&mut self, task: &WorkerTask) -> Result<TranslationResult, WorkerFault>;

    /// worker 自行退出时返回退出原因；进程内 worker 永不返回
    async fn exited(&mut self) -> String {
        std::future::pending().await
    }

    /// worker 是否仍在运行（不阻塞）
    fn is_alive(&mut self) -> bool {
        true
    }

    /// 强制结束 worker
    async fn kill(&mut self);
}

/// worker 启动器
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, slot: usize) -> Result<Box<dyn WorkerConnection>, WorkerFault>;
}

/// 后端创建失败时返回给调用方的结果
fn backend_unavailable(task: &WorkerTask, error: impl std::fmt::Display) -> TranslationResult {
    TranslationResult::failure(
        format!("backend unavailable: {}", error),
        ResultMetadata::new(task.spec.model_name(), task.spec.revision(), task.spec.kind()),
    )
}

// ============================================================================
// 进程 worker
// ============================================================================

/// 进程 worker 配置
#[derive(Debug, Clone)]
pub struct ProcessWorkerConfig {
    /// worker 可执行文件
    pub program: PathBuf,
    pub args: Vec<String>,
    /// 等待 `ready` 的时间
    pub startup_timeout: Duration,
    /// 传给 worker 的 RUST_LOG
    pub log_filter: Option<String>,
}

impl ProcessWorkerConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            startup_timeout: Duration::from_secs(10),
            log_filter: None,
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// 进程 worker 启动器
pub struct ProcessWorkerLauncher {
    config: ProcessWorkerConfig,
}

impl ProcessWorkerLauncher {
    pub fn new(config: ProcessWorkerConfig) -> Self {
        Self { config }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

struct ProcessWorker {
    slot: usize,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    pid: Option<u32>,
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(&self, slot: usize) -> Result<Box<dyn WorkerConnection>, WorkerFault> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(filter) = &self.config.log_filter {
            command.env("RUST_LOG", filter);
        }

        let mut child = command.spawn().map_err(|e| {
            WorkerFault::Spawn(format!("{}: {}", self.config.program.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerFault::Spawn("worker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerFault::Spawn("worker stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let first = tokio::time::timeout(self.config.startup_timeout, lines.next_line())
            .await
            .map_err(|_| {
                WorkerFault::Startup(format!(
                    "no ready message within {:.1}s",
                    self.config.startup_timeout.as_secs_f64()
                ))
            })??;

        let pid = match first.as_deref().map(decode_line::<WorkerReply>) {
            Some(Ok(WorkerReply::Ready { pid })) => pid,
            Some(Ok(other)) => {
                let _ = child.start_kill();
                return Err(WorkerFault::Startup(format!("unexpected message: {:?}", other)));
            }
            Some(Err(e)) => {
                let _ = child.start_kill();
                return Err(WorkerFault::Startup(format!("invalid ready message: {}", e)));
            }
            None => {
                let status = child.wait().await.ok();
                return Err(WorkerFault::Startup(format!(
                    "worker exited before ready ({:?})",
                    status
                )));
            }
        };

        tracing::info!(slot, pid, program = %self.config.program.display(), "Worker process started");

        Ok(Box::new(ProcessWorker {
            slot,
            child,
            stdin,
            lines,
            pid: Some(pid),
        }))
    }
}

#[async_trait]
impl WorkerConnection for ProcessWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn execute(&mut self, task: &WorkerTask) -> Result<TranslationResult, WorkerFault> {
        let request = WorkerRequest::Translate {
            task_id: task.task_id,
            chunk: task.chunk.clone(),
            spec: task.spec.clone(),
            target_language: task.target_language.clone(),
            attempt: task.attempt,
            timeout_ms: task.timeout.as_millis() as u64,
        };
        let line = encode_line(&request).map_err(|e| WorkerFault::Protocol(e.to_string()))?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let Some(line) = self.lines.next_line().await? else {
                let status = self.child.try_wait().ok().flatten();
                return Err(WorkerFault::Exited(match status {
                    Some(status) => status.to_string(),
                    None => "stdout closed".to_string(),
                }));
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_line::<WorkerReply>(&line) {
                Ok(WorkerReply::Result { task_id, result }) if task_id == task.task_id => {
                    return Ok(result);
                }
                Ok(WorkerReply::Result { task_id, .. }) => {
                    tracing::warn!(slot = self.slot, task_id = %task_id, "Discarding stale worker result");
                }
                Ok(WorkerReply::Error { message, .. }) => {
                    return Err(WorkerFault::Protocol(message));
                }
                Ok(WorkerReply::Ready { .. }) => {}
                Err(e) => {
                    return Err(WorkerFault::Protocol(format!("invalid reply: {}", e)));
                }
            }
        }
    }

    async fn exited(&mut self) -> String {
        match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(slot = self.slot, error = %e, "Worker already exited");
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
        tracing::info!(slot = self.slot, pid = ?self.pid, "Worker process killed");
    }
}

// ============================================================================
// 进程内 worker
// ============================================================================

/// 进程内 worker 启动器
pub struct InProcessWorkerLauncher {
    factory: Arc<dyn BackendFactoryPort>,
}

impl InProcessWorkerLauncher {
    pub fn new(factory: Arc<dyn BackendFactoryPort>) -> Self {
        Self { factory }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

struct InProcessWorker {
    slot: usize,
    factory: Arc<dyn BackendFactoryPort>,
    running: Option<AbortHandle>,
}

#[async_trait]
impl WorkerLauncher for InProcessWorkerLauncher {
    async fn launch(&self, slot: usize) -> Result<Box<dyn WorkerConnection>, WorkerFault> {
        tracing::debug!(slot, "In-process worker started");
        Ok(Box::new(InProcessWorker {
            slot,
            factory: self.factory.clone(),
            running: None,
        }))
    }
}

#[async_trait]
impl WorkerConnection for InProcessWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn execute(&mut self, task: &WorkerTask) -> Result<TranslationResult, WorkerFault> {
        let backend = match self.factory.create(&task.spec) {
            Ok(backend) => backend,
            Err(e) => return Ok(backend_unavailable(task, e)),
        };

        let chunk = task.chunk.clone();
        let config = TranslateConfig {
            target_language: task.target_language.clone(),
            timeout: task.timeout,
            attempt: task.attempt,
        };
        let handle = tokio::spawn(async move { backend.translate(&chunk, &config).await });
        self.running = Some(handle.abort_handle());

        let joined = handle.await;
        self.running = None;

        joined.map_err(|e| {
            if e.is_panic() {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown panic".to_string());
                WorkerFault::Panicked(message)
            } else {
                WorkerFault::Exited("task aborted".to_string())
            }
        })
    }

    async fn kill(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.abort();
            tracing::debug!(slot = self.slot, "In-process worker task aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{BackendSpec, LocalModelSettings, ModelBackendPort, TaskId};
    use crate::domain::translation::{BoundaryKind, Chunk, ModelBackendKind, RequestId, TargetLanguage};
    use crate::infrastructure::adapters::backends::{BackendRegistry, FakeModelBackend};
    use tokio_util::sync::CancellationToken;

    fn task(index: usize) -> WorkerTask {
        WorkerTask {
            task_id: TaskId::new(),
            request_id: RequestId::new(),
            chunk: Chunk {
                index,
                source_text: "PRINT 1\n".to_string(),
                kind: BoundaryKind::WholeBlock,
                start_line: 1,
                end_line: 1,
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
            timeout: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    fn launcher(fake: Arc<FakeModelBackend>) -> InProcessWorkerLauncher {
        let mut registry = BackendRegistry::empty();
        registry.register(ModelBackendKind::Local, move |_| {
            Ok(fake.clone() as Arc<dyn ModelBackendPort>)
        });
        InProcessWorkerLauncher::new(registry.arc())
    }

    #[tokio::test]
    async fn test_in_process_worker_executes() {
        let fake = FakeModelBackend::new().arc();
        let mut worker = launcher(fake.clone()).launch(0).await.unwrap();
        let result = worker.execute(&task(0)).await.unwrap();
        assert_eq!(result.code(), Some("# PRINT 1\n"));
        assert_eq!(fake.calls(0), 1);
    }

    #[tokio::test]
    async fn test_in_process_panic_is_fault() {
        let fake = FakeModelBackend::new().panic_chunk(2).arc();
        let mut worker = launcher(fake).launch(0).await.unwrap();
        let fault = worker.execute(&task(2)).await.unwrap_err();
        assert!(matches!(fault, WorkerFault::Panicked(ref m) if m.contains("chunk 2")));
    }

    #[tokio::test]
    async fn test_unregistered_backend_is_failed_result() {
        let launcher = InProcessWorkerLauncher::new(BackendRegistry::empty().arc());
        let mut worker = launcher.launch(0).await.unwrap();
        let result = worker.execute(&task(0)).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error_summary().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_fault() {
        let launcher = ProcessWorkerLauncher::new(ProcessWorkerConfig::new(
            "/nonexistent/quill-worker-binary",
        ));
        assert!(matches!(
            launcher.launch(0).await.err(),
            Some(WorkerFault::Spawn(_))
        ));
    }
}
