//! Translator Orchestrator - 翻译编排
//!
//! 公开入口：切分请求、把分块提交给执行池、按完成顺序收集结果、
//! 对失败的分块退避重试，最后按分块序号重组并汇总诊断信息。
//!
//! 只有致命错误（请求无效、后端未配置、模型版本无法解析）以 `Err` 返回，
//! 并且一定发生在任何分块提交之前；分块级别的失败都体现在聚合结果里。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::metrics::TranslationMetrics;
use crate::application::ports::{
    BackendError, BackendFactoryPort, BackendProfiles, BackendSpec, ExecutionPoolPort,
    ModelCapabilities, TaskId, TaskLifecycle, TaskState, TranslationEvent, TranslationEventSink,
    WorkerOutcome, WorkerTask,
};
use crate::domain::chunker::{plan_chunks, ChunkConfig};
use crate::domain::parser::validate;
use crate::domain::translation::{
    AggregatedTranslation, Chunk, ChunkFinal, ModelBackendKind, RequestId, ResultMetadata,
    TargetLanguage, TranslationError, TranslationOptions, TranslationRequest, TranslationResult,
};

/// 单次退避的上限
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// 第 `attempt` 次尝试失败后的退避时间
///
/// `base × 2^(attempt-1)`，超时失败的基数翻倍，封顶 [`MAX_RETRY_BACKOFF`]。
pub fn retry_delay(base_ms: u64, attempt: u32, timed_out: bool) -> Duration {
    let base = if timed_out {
        base_ms.saturating_mul(2)
    } else {
        base_ms
    };
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base.saturating_mul(factor)).min(MAX_RETRY_BACKOFF)
}

/// 请求进度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationProgress {
    pub completed: usize,
    pub total: usize,
}

/// 异步提交的句柄，可轮询进度、取消或等待结果
#[derive(Debug)]
pub struct TranslationHandle {
    request_id: RequestId,
    cancel: CancellationToken,
    progress: watch::Receiver<TranslationProgress>,
    task: JoinHandle<Result<AggregatedTranslation, TranslationError>>,
}

impl TranslationHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// 取消整个请求
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> TranslationProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<TranslationProgress> {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 等待请求结束
    pub async fn wait(self) -> Result<AggregatedTranslation, TranslationError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TranslationError::Internal(format!(
                "translation task aborted: {}",
                e
            ))),
        }
    }
}

/// 单个请求在编排期间共享的只读上下文
struct Job<'a> {
    request_id: RequestId,
    request_label: String,
    spec: BackendSpec,
    target_language: &'a TargetLanguage,
    options: &'a TranslationOptions,
    cancel: CancellationToken,
    total: usize,
}

/// Translator Orchestrator
pub struct TranslatorOrchestrator {
    pool: Arc<dyn ExecutionPoolPort>,
    factory: Arc<dyn BackendFactoryPort>,
    profiles: BackendProfiles,
    events: Arc<dyn TranslationEventSink>,
    /// 已通过预检的后端及其能力
    verified: DashMap<String, ModelCapabilities>,
    metrics: Arc<TranslationMetrics>,
}

impl TranslatorOrchestrator {
    pub fn new(
        pool: Arc<dyn ExecutionPoolPort>,
        factory: Arc<dyn BackendFactoryPort>,
        profiles: BackendProfiles,
        events: Arc<dyn TranslationEventSink>,
    ) -> Self {
        Self {
            pool,
            factory,
            profiles,
            events,
            verified: DashMap::new(),
            metrics: TranslationMetrics::new().arc(),
        }
    }

    /// 与其他组件共享同一份指标
    pub fn with_metrics(mut self, metrics: Arc<TranslationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn pool(&self) -> &Arc<dyn ExecutionPoolPort> {
        &self.pool
    }

    pub fn profiles(&self) -> &BackendProfiles {
        &self.profiles
    }

    pub fn metrics(&self) -> &Arc<TranslationMetrics> {
        &self.metrics
    }

    /// 预检后端：解析配置、确认固定版本可以加载
    ///
    /// 启动时调用一次，失败应直接退出。
    pub async fn verify_backend(
        &self,
        kind: ModelBackendKind,
        revision: &str,
    ) -> Result<BackendSpec, TranslationError> {
        let spec = self.profiles.resolve(kind, revision)?;
        self.preflight(&spec).await?;
        Ok(spec)
    }

    async fn preflight(&self, spec: &BackendSpec) -> Result<ModelCapabilities, TranslationError> {
        let identity = spec.identity();
        if let Some(capabilities) = self.verified.get(&identity) {
            return Ok(capabilities.clone());
        }

        let backend = self
            .factory
            .create(spec)
            .map_err(|e| preflight_error(spec, e))?;
        backend
            .preflight()
            .await
            .map_err(|e| preflight_error(spec, e))?;
        let capabilities = backend.capabilities();

        tracing::info!(
            backend = %spec.kind(),
            model = %spec.model_name(),
            revision = %spec.revision(),
            languages = ?capabilities.supported_languages,
            "Backend preflight passed"
        );
        self.verified.insert(identity, capabilities.clone());
        Ok(capabilities)
    }

    /// 同步翻译：阻塞直到所有分块到达终态
    pub async fn submit_translation(
        &self,
        request: TranslationRequest,
    ) -> Result<AggregatedTranslation, TranslationError> {
        self.run(request, CancellationToken::new(), None).await
    }

    /// 同步翻译，调用方持有取消令牌
    pub async fn submit_translation_with_cancel(
        &self,
        request: TranslationRequest,
        cancel: CancellationToken,
    ) -> Result<AggregatedTranslation, TranslationError> {
        self.run(request, cancel, None).await
    }

    /// 异步翻译：立即返回句柄
    pub fn submit_translation_async(self: &Arc<Self>, request: TranslationRequest) -> TranslationHandle {
        self.submit_translation_async_with(request, CancellationToken::new())
    }

    /// 异步翻译，使用调用方提供的取消令牌
    pub fn submit_translation_async_with(
        self: &Arc<Self>,
        request: TranslationRequest,
        cancel: CancellationToken,
    ) -> TranslationHandle {
        let request_id = *request.request_id();
        let (progress_tx, progress_rx) = watch::channel(TranslationProgress::default());

        let orchestrator = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { orchestrator.run(request, token, Some(progress_tx)).await });

        TranslationHandle {
            request_id,
            cancel,
            progress: progress_rx,
            task,
        }
    }

    async fn run(
        &self,
        request: TranslationRequest,
        cancel: CancellationToken,
        progress: Option<watch::Sender<TranslationProgress>>,
    ) -> Result<AggregatedTranslation, TranslationError> {
        let request_label = request.request_id().to_string();
        let result = self.execute(request, cancel, progress).await;
        if let Err(e) = &result {
            self.metrics.record("translation.rejected", None, &[]);
            tracing::warn!(request_id = %request_label, error = %e, "Translation rejected");
            self.events.publish(TranslationEvent::Failed {
                request_id: request_label,
                error: e.to_string(),
            });
        }
        result
    }

    async fn execute(
        &self,
        request: TranslationRequest,
        cancel: CancellationToken,
        progress: Option<watch::Sender<TranslationProgress>>,
    ) -> Result<AggregatedTranslation, TranslationError> {
        let started = Instant::now();
        let request_id = *request.request_id();
        let options = request.options();
        options
            .validate()
            .map_err(TranslationError::InvalidRequest)?;

        let spec = self
            .profiles
            .resolve(options.model_backend, &options.model_revision)?;
        let capabilities = self.preflight(&spec).await?;
        if !capabilities.supports_language(request.target_language()) {
            return Err(TranslationError::InvalidRequest(format!(
                "target language '{}' is not supported by {} model {}@{}",
                request.target_language(),
                spec.kind(),
                spec.model_name(),
                spec.revision()
            )));
        }

        let plan = plan_chunks(
            request.source_text(),
            &ChunkConfig {
                max_chunk_size: options.max_chunk_size,
                overlap_lines: options.overlap_lines,
            },
        );
        let total = plan.chunks.len();
        let request_label = request_id.to_string();

        tracing::info!(
            request_id = %request_id,
            target_language = %request.target_language(),
            backend = %spec.kind(),
            revision = %spec.revision(),
            chunks = total,
            chunk_warnings = plan.warnings.len(),
            "Translation started"
        );
        self.events.publish(TranslationEvent::Started {
            request_id: request_label.clone(),
            total_chunks: total,
        });
        if let Some(tx) = &progress {
            tx.send_replace(TranslationProgress {
                completed: 0,
                total,
            });
        }

        let job = Job {
            request_id,
            request_label,
            spec,
            target_language: request.target_language(),
            options,
            cancel,
            total,
        };

        let mut finals: BTreeMap<usize, ChunkFinal> = BTreeMap::new();
        let mut pending = plan.chunks.iter().cloned();
        let mut in_flight = FuturesUnordered::new();
        let limit = options.worker_count.max(1);
        let mut completed = 0;

        loop {
            while in_flight.len() < limit && !job.cancel.is_cancelled() {
                match pending.next() {
                    Some(chunk) => in_flight.push(self.translate_chunk(&job, chunk)),
                    None => break,
                }
            }

            let Some((index, chunk_final)) = in_flight.next().await else {
                break;
            };

            completed += 1;
            if let ChunkFinal::Translated { result, attempts } = &chunk_final {
                self.events.publish(TranslationEvent::ChunkCompleted {
                    request_id: job.request_label.clone(),
                    chunk_index: index,
                    attempts: *attempts,
                    confidence: result.confidence(),
                    completed,
                    total,
                });
            }
            if let Some(tx) = &progress {
                tx.send_replace(TranslationProgress { completed, total });
            }
            finals.insert(index, chunk_final);
        }

        let cancelled = finals.len() < total
            || finals
                .values()
                .any(|f| matches!(f, ChunkFinal::Cancelled { .. }));

        let mut aggregate =
            AggregatedTranslation::assemble(request_id, &plan.chunks, finals, cancelled);
        let hoisted = aggregate.hoist_imports(request.target_language());
        if hoisted > 0 {
            tracing::debug!(request_id = %request_id, hoisted, "Imports moved to the top");
        }

        for warning in &plan.warnings {
            aggregate.add_warning(0, warning.clone());
        }
        for issue in &plan.issues {
            let chunk_index = chunk_for_source_line(&plan.chunks, issue.line);
            aggregate.add_warning(chunk_index, format!("source {}", issue));
        }
        if !cancelled && !aggregate.code.trim().is_empty() {
            for issue in validate(&aggregate.code, request.target_language()) {
                let chunk_index = aggregate
                    .chunk_for_output_line(issue.line)
                    .or_else(|| aggregate.chunks.last().map(|r| r.chunk_index))
                    .unwrap_or(0);
                aggregate.add_warning(chunk_index, format!("output {}", issue));
            }
        }

        let status = if cancelled {
            "cancelled"
        } else if aggregate.success {
            "succeeded"
        } else {
            "failed"
        };
        self.metrics.record(
            "translation",
            Some(started.elapsed()),
            &[(status, 1), ("chunks", total as u64)],
        );

        if cancelled {
            tracing::info!(
                request_id = %request_id,
                completed,
                total,
                "Translation cancelled"
            );
            self.events.publish(TranslationEvent::Cancelled {
                request_id: job.request_label.clone(),
                completed,
                total,
            });
        } else {
            tracing::info!(
                request_id = %request_id,
                success = aggregate.success,
                confidence = aggregate.confidence,
                warnings = aggregate.warnings.len(),
                errors = aggregate.errors.len(),
                "Translation completed"
            );
            self.events.publish(TranslationEvent::Completed {
                request_id: job.request_label.clone(),
                success: aggregate.success,
                confidence: aggregate.confidence,
                warnings: aggregate.warnings.len(),
                errors: aggregate.errors.len(),
            });
        }

        Ok(aggregate)
    }

    /// 推进分块状态机并发布状态事件
    fn transition(
        &self,
        job: &Job<'_>,
        index: usize,
        attempt: u32,
        lifecycle: &mut TaskLifecycle,
        next: TaskState,
    ) {
        if let Err(e) = lifecycle.advance(next) {
            tracing::error!(
                request_id = %job.request_id,
                chunk_index = index,
                attempt,
                error = %e,
                "Chunk state machine violated"
            );
            return;
        }
        self.events.publish(TranslationEvent::ChunkState {
            request_id: job.request_label.clone(),
            chunk_index: index,
            attempt,
            state: next,
        });
    }

    /// 驱动单个分块直到终态，并记录耗时与重试次数
    async fn translate_chunk(&self, job: &Job<'_>, chunk: Chunk) -> (usize, ChunkFinal) {
        let started = Instant::now();
        let (index, chunk_final) = self.drive_chunk(job, chunk).await;
        let (status, attempts) = match &chunk_final {
            ChunkFinal::Translated { attempts, .. } => ("succeeded", *attempts),
            ChunkFinal::Abandoned { attempts, .. } => ("abandoned", *attempts),
            ChunkFinal::Cancelled { attempts } => ("cancelled", *attempts),
        };
        self.metrics.record(
            "chunk",
            Some(started.elapsed()),
            &[
                (status, 1),
                ("attempts", u64::from(attempts)),
                ("retries", u64::from(attempts.saturating_sub(1))),
            ],
        );
        (index, chunk_final)
    }

    async fn drive_chunk(&self, job: &Job<'_>, chunk: Chunk) -> (usize, ChunkFinal) {
        let index = chunk.index;

        if chunk.is_blank() {
            let metadata =
                ResultMetadata::new(job.spec.model_name(), job.spec.revision(), job.spec.kind());
            let result = TranslationResult::success(chunk.source_text.clone(), 1.0, metadata);
            return (index, ChunkFinal::Translated { result, attempts: 0 });
        }

        let max_attempts = job.options.max_retries.saturating_add(1);
        let mut attempt = 1;
        let mut lifecycle = TaskLifecycle::new();

        loop {
            let attempt_started = Instant::now();
            let outcome = self.run_attempt(job, &chunk, attempt).await;
            self.metrics.record(
                "chunk.attempt",
                Some(attempt_started.elapsed()),
                &[(outcome.state().as_str(), 1)],
            );

            if matches!(outcome, WorkerOutcome::Cancelled) {
                self.transition(job, index, attempt, &mut lifecycle, TaskState::Cancelled);
                return (index, ChunkFinal::Cancelled { attempts: attempt });
            }
            self.transition(job, index, attempt, &mut lifecycle, TaskState::Running);
            self.transition(job, index, attempt, &mut lifecycle, outcome.state());

            let failed = match outcome {
                WorkerOutcome::Completed(result) if result.is_success() => {
                    tracing::debug!(
                        request_id = %job.request_id,
                        chunk_index = index,
                        attempt,
                        confidence = result.confidence(),
                        "Chunk translated"
                    );
                    return (
                        index,
                        ChunkFinal::Translated {
                            result,
                            attempts: attempt,
                        },
                    );
                }
                other => other,
            };
            let timed_out = matches!(failed, WorkerOutcome::TimedOut { .. });
            let reason = failed
                .failure_reason()
                .unwrap_or_else(|| "unknown failure".to_string());

            if attempt >= max_attempts {
                self.transition(job, index, attempt, &mut lifecycle, TaskState::Abandoned);
                tracing::warn!(
                    request_id = %job.request_id,
                    chunk_index = index,
                    attempts = attempt,
                    reason = %reason,
                    "Chunk abandoned"
                );
                self.events.publish(TranslationEvent::ChunkAbandoned {
                    request_id: job.request_label.clone(),
                    chunk_index: index,
                    attempts: attempt,
                    reason: reason.clone(),
                });
                return (
                    index,
                    ChunkFinal::Abandoned {
                        last_error: reason,
                        attempts: attempt,
                    },
                );
            }

            self.transition(job, index, attempt, &mut lifecycle, TaskState::Retrying);
            let delay = retry_delay(job.options.retry_backoff_ms, attempt, timed_out);
            tracing::warn!(
                request_id = %job.request_id,
                chunk_index = index,
                attempt,
                timed_out,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Chunk failed, retrying"
            );
            self.events.publish(TranslationEvent::ChunkRetrying {
                request_id: job.request_label.clone(),
                chunk_index: index,
                attempt,
                delay_ms: delay.as_millis() as u64,
                reason,
            });

            tokio::select! {
                biased;
                _ = job.cancel.cancelled() => {
                    self.transition(job, index, attempt, &mut lifecycle, TaskState::Cancelled);
                    return (index, ChunkFinal::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
            self.transition(job, index, attempt, &mut lifecycle, TaskState::Submitted);
        }
    }

    /// 提交一次并收集结果
    async fn run_attempt(&self, job: &Job<'_>, chunk: &Chunk, attempt: u32) -> WorkerOutcome {
        let timeout = job.options.timeout();
        let task = WorkerTask {
            task_id: TaskId::new(),
            request_id: job.request_id,
            chunk: chunk.clone(),
            spec: job.spec.clone(),
            target_language: job.target_language.clone(),
            attempt,
            timeout,
            // 请求取消时所有子任务一起取消
            cancel: job.cancel.child_token(),
        };

        let handle = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => return WorkerOutcome::Cancelled,
            submitted = self.pool.submit(task) => match submitted {
                Ok(handle) => handle,
                Err(e) => {
                    return WorkerOutcome::Crashed {
                        reason: format!("submission rejected: {}", e),
                    };
                }
            },
        };

        tracing::debug!(
            request_id = %job.request_id,
            task_id = %handle.task_id,
            chunk_index = chunk.index,
            attempt,
            total_chunks = job.total,
            "Chunk submitted"
        );

        tokio::select! {
            biased;
            _ = job.cancel.cancelled() => WorkerOutcome::Cancelled,
            outcome = self.pool.collect(handle, timeout) => outcome,
        }
    }
}

fn preflight_error(spec: &BackendSpec, err: BackendError) -> TranslationError {
    match err {
        BackendError::ModelNotFound(_)
        | BackendError::UnpinnedRevision(_)
        | BackendError::InvalidManifest(_) => TranslationError::ModelRevisionUnresolvable {
            model: spec.model_name().to_string(),
            revision: spec.revision().to_string(),
            reason: err.to_string(),
        },
        BackendError::Configuration(_) | BackendError::Unregistered(_) => {
            TranslationError::Configuration(err.to_string())
        }
        other => TranslationError::BackendUnavailable(other.to_string()),
    }
}

/// 源文本行所在的分块
fn chunk_for_source_line(chunks: &[Chunk], line: usize) -> usize {
    chunks
        .iter()
        .find(|c| c.start_line <= line && line <= c.end_line)
        .or_else(|| chunks.last())
        .map(|c| c.index)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use crate::application::ports::{LocalModelSettings, ModelBackendPort, NoopEventSink};
    use crate::domain::translation::ChunkStatus;
    use crate::infrastructure::adapters::backends::{BackendRegistry, FakeModelBackend};
    use crate::infrastructure::pool::{ExecutionPool, ExecutionPoolConfig, InProcessWorkerLauncher};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TranslationEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<TranslationEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TranslationEventSink for RecordingSink {
        fn publish(&self, event: TranslationEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn fake_registry(fake: Arc<FakeModelBackend>) -> Arc<BackendRegistry> {
        let mut registry = BackendRegistry::empty();
        registry.register(ModelBackendKind::Local, move |_| {
            Ok(fake.clone() as Arc<dyn ModelBackendPort>)
        });
        registry.arc()
    }

    fn profiles() -> BackendProfiles {
        BackendProfiles {
            local: Some(LocalModelSettings {
                models_dir: PathBuf::from("models"),
                model_name: "fake".to_string(),
                revision: "v1".to_string(),
            }),
            remote: None,
        }
    }

    async fn orchestrator_with(
        fake: Arc<FakeModelBackend>,
        pool_workers: usize,
        events: Arc<dyn TranslationEventSink>,
    ) -> TranslatorOrchestrator {
        let registry = fake_registry(fake);
        let pool = ExecutionPool::start(
            ExecutionPoolConfig {
                worker_count: pool_workers,
                queue_capacity: 16,
            },
            InProcessWorkerLauncher::new(registry.clone()).arc(),
        )
        .await
        .unwrap();
        TranslatorOrchestrator::new(pool.arc(), registry, profiles(), events)
    }

    async fn orchestrator(fake: Arc<FakeModelBackend>) -> TranslatorOrchestrator {
        orchestrator_with(fake, 4, Arc::new(NoopEventSink)).await
    }

    fn options(max_chunk_size: usize) -> TranslationOptions {
        TranslationOptions {
            max_chunk_size,
            retry_backoff_ms: 1,
            timeout_seconds: 5.0,
            ..TranslationOptions::default()
        }
    }

    fn request(source: &str, options: TranslationOptions) -> TranslationRequest {
        TranslationRequest::new(source, "python", options).unwrap()
    }

    fn functions(count: usize) -> String {
        (0..count)
            .map(|i| format!("FUNCTION f{i}()\n    PRINT {i}\nEND FUNCTION\n"))
            .collect()
    }

    fn expected(source: &str) -> String {
        FakeModelBackend::expected_code(source, &TargetLanguage::python())
    }

    #[test]
    fn test_retry_delay() {
        assert_eq!(retry_delay(100, 1, false), Duration::from_millis(100));
        assert_eq!(retry_delay(100, 2, false), Duration::from_millis(200));
        assert_eq!(retry_delay(100, 3, false), Duration::from_millis(400));
        assert_eq!(retry_delay(100, 1, true), Duration::from_millis(200));
        assert_eq!(retry_delay(100, 40, false), MAX_RETRY_BACKOFF);
        assert_eq!(retry_delay(u64::MAX, 80, true), MAX_RETRY_BACKOFF);
    }

    #[tokio::test]
    async fn test_two_functions_fit_in_one_chunk() {
        let fake = FakeModelBackend::new().with_confidence(0.8).arc();
        let orchestrator = orchestrator(fake.clone()).await;
        let source = functions(2);

        let agg = orchestrator
            .submit_translation(request(&source, options(1000)))
            .await
            .unwrap();

        assert!(agg.success);
        assert!(!agg.cancelled);
        assert_eq!(agg.chunks.len(), 1);
        assert_eq!(agg.confidence, 0.8);
        assert_eq!(agg.code, expected(&source));
        assert!(agg.errors.is_empty());
        assert!(agg.warnings.is_empty());
        assert_eq!(fake.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_succeeds_without_backend_calls() {
        let fake = FakeModelBackend::new().arc();
        let orchestrator = orchestrator(fake.clone()).await;

        let agg = orchestrator
            .submit_translation(request("", options(100)))
            .await
            .unwrap();

        assert!(agg.success);
        assert!(agg.code.is_empty());
        assert_eq!(agg.confidence, 1.0);
        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_always_failing_chunk_is_attempted_max_retries_plus_one() {
        let fake = FakeModelBackend::new().always_fail(0).arc();
        let orchestrator = orchestrator(fake.clone()).await;
        let source = "PRINT 1\nPRINT 2\n";

        let agg = orchestrator
            .submit_translation(request(
                source,
                TranslationOptions {
                    max_retries: 2,
                    ..options(1000)
                },
            ))
            .await
            .unwrap();

        assert_eq!(fake.calls(0), 3);
        assert!(!agg.success);
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].chunk_index, 0);
        assert_eq!(agg.code, source);
        assert_eq!(agg.confidence, 0.0);
        let report = agg.chunk_report(0).unwrap();
        assert_eq!(report.status, ChunkStatus::Abandoned);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_source_of_failed_chunk() {
        let fake = FakeModelBackend::new().always_fail(2).arc();
        let orchestrator = orchestrator(fake.clone()).await;
        let source = functions(5);
        let pieces: Vec<String> = (0..5)
            .map(|i| format!("FUNCTION f{i}()\n    PRINT {i}\nEND FUNCTION\n"))
            .collect();

        let agg = orchestrator
            .submit_translation(request(
                &source,
                TranslationOptions {
                    max_retries: 1,
                    ..options(50)
                },
            ))
            .await
            .unwrap();

        assert_eq!(agg.chunks.len(), 5);
        assert!(!agg.success);
        let expected_code = format!(
            "{}{}{}{}{}",
            expected(&pieces[0]),
            expected(&pieces[1]),
            pieces[2],
            expected(&pieces[3]),
            expected(&pieces[4]),
        );
        assert_eq!(agg.code, expected_code);
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].chunk_index, 2);
        assert_eq!(fake.calls(2), 2);
        // 原样保留的伪代码会被输出校验标记，并归属到产生它的分块
        assert!(agg
            .warnings
            .iter()
            .any(|w| w.chunk_index == 2 && w.message.contains("untranslated pseudocode")));
    }

    #[tokio::test]
    async fn test_out_of_order_completion_reassembles_by_index() {
        // 分块 0 第一次失败，退避后才完成，晚于其他分块
        let fake = FakeModelBackend::new().fail_chunk(0, 1).arc();
        let events = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator_with(fake.clone(), 4, events.clone()).await;
        let source = functions(3);

        let agg = orchestrator
            .submit_translation(request(
                &source,
                TranslationOptions {
                    retry_backoff_ms: 50,
                    ..options(50)
                },
            ))
            .await
            .unwrap();

        assert!(agg.success);
        assert_eq!(agg.code, expected(&source));
        assert_eq!(agg.chunk_report(0).map(|r| r.attempts), Some(2));

        let completion_order: Vec<usize> = events
            .events()
            .iter()
            .filter_map(|e| match e {
                TranslationEvent::ChunkCompleted { chunk_index, .. } => Some(*chunk_index),
                _ => None,
            })
            .collect();
        assert_eq!(completion_order.len(), 3);
        assert_eq!(completion_order.last(), Some(&0));
    }

    #[tokio::test]
    async fn test_events_bracket_the_request() {
        let fake = FakeModelBackend::new().fail_chunk(0, 1).arc();
        let events = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator_with(fake, 2, events.clone()).await;

        let req = request("PRINT 1\n", options(1000));
        let request_id = req.request_id().to_string();
        orchestrator.submit_translation(req).await.unwrap();

        let events = events.events();
        assert!(matches!(
            events.first(),
            Some(TranslationEvent::Started { total_chunks: 1, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(TranslationEvent::Completed { success: true, .. })
        ));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TranslationEvent::ChunkRetrying { .. }))
                .count(),
            1
        );
        assert!(events.iter().all(|e| e.request_id() == request_id));
    }

    fn chunk_states(events: &[TranslationEvent], index: usize) -> Vec<(u32, TaskState)> {
        events
            .iter()
            .filter_map(|e| match e {
                TranslationEvent::ChunkState {
                    chunk_index,
                    attempt,
                    state,
                    ..
                } if *chunk_index == index => Some((*attempt, *state)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chunk_states_follow_the_task_state_machine() {
        let fake = FakeModelBackend::new().fail_chunk(0, 1).always_fail(1).arc();
        let events = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator_with(fake, 2, events.clone()).await;

        let source = functions(2);
        let agg = orchestrator
            .submit_translation(request(
                &source,
                TranslationOptions {
                    max_retries: 1,
                    ..options(40)
                },
            ))
            .await
            .unwrap();
        assert_eq!(agg.chunks.len(), 2);

        let events = events.events();
        use TaskState::*;
        assert_eq!(
            chunk_states(&events, 0),
            vec![
                (1, Running),
                (1, Failed),
                (1, Retrying),
                (2, Submitted),
                (2, Running),
                (2, Succeeded),
            ]
        );
        assert_eq!(
            chunk_states(&events, 1),
            vec![
                (1, Running),
                (1, Failed),
                (1, Retrying),
                (2, Submitted),
                (2, Running),
                (2, Failed),
                (2, Abandoned),
            ]
        );

        let snapshot = orchestrator.metrics().snapshot();
        let chunk = snapshot.event("chunk").unwrap();
        assert_eq!(chunk.count, 2);
        assert_eq!(chunk.counter("attempts"), 4);
        assert_eq!(chunk.counter("retries"), 2);
        assert_eq!(chunk.counter("succeeded"), 1);
        assert_eq!(chunk.counter("abandoned"), 1);
        let attempts = snapshot.event("chunk.attempt").unwrap();
        assert_eq!(attempts.count, 4);
        assert_eq!(attempts.counter("failed"), 3);
        let translation = snapshot.event("translation").unwrap();
        assert_eq!(translation.counter("failed"), 1);
        assert_eq!(translation.counter("chunks"), 2);
    }

    #[tokio::test]
    async fn test_chunk_imports_are_collected_at_the_top() {
        let fake = FakeModelBackend::new().with_preamble("import os").arc();
        let orchestrator = orchestrator(fake).await;
        let source = functions(3);
        let pieces: String = (0..3)
            .map(|i| expected(&format!("FUNCTION f{i}()\n    PRINT {i}\nEND FUNCTION\n")))
            .collect();

        let agg = orchestrator
            .submit_translation(request(&source, options(50)))
            .await
            .unwrap();

        assert_eq!(agg.chunks.len(), 3);
        assert_eq!(agg.code, format!("import os\n\n{}", pieces));
        assert_eq!(agg.chunk_for_output_line(1), None);
        assert_eq!(agg.chunk_report(0).unwrap().output_lines, Some((3, 5)));
    }

    #[tokio::test]
    async fn test_worker_count_bounds_chunks_in_flight() {
        let fake = FakeModelBackend::new()
            .with_delay(Duration::from_millis(50))
            .arc();
        let orchestrator = orchestrator(fake.clone()).await;
        let source = functions(5);

        let agg = orchestrator
            .submit_translation(request(
                &source,
                TranslationOptions {
                    worker_count: 2,
                    ..options(50)
                },
            ))
            .await
            .unwrap();

        assert!(agg.success);
        assert_eq!(fake.total_calls(), 5);
        assert!(fake.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_timed_out_chunk_is_abandoned_after_retries() {
        let fake = FakeModelBackend::new().hang_chunk(0).arc();
        let orchestrator = orchestrator(fake.clone()).await;

        let agg = orchestrator
            .submit_translation(request(
                "PRINT 1\n",
                TranslationOptions {
                    max_retries: 1,
                    timeout_seconds: 0.2,
                    ..options(1000)
                },
            ))
            .await
            .unwrap();

        assert!(!agg.success);
        assert_eq!(fake.calls(0), 2);
        assert!(agg.errors[0].message.contains("timed out"));
        // 超时的 worker 被替换，容量保持不变
        assert_eq!(orchestrator.pool().status().live_workers, 4);
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_aggregate() {
        let fake = FakeModelBackend::new().hang_chunk(1).arc();
        let events = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator_with(fake, 4, events.clone()).await;
        let source = functions(3);
        let pieces: Vec<String> = (0..3)
            .map(|i| format!("FUNCTION f{i}()\n    PRINT {i}\nEND FUNCTION\n"))
            .collect();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let agg = orchestrator
            .submit_translation_with_cancel(request(&source, options(50)), cancel)
            .await
            .unwrap();

        assert!(agg.cancelled);
        assert!(!agg.success);
        assert!(agg.code.contains(&pieces[1]));
        assert_eq!(agg.chunk_report(1).map(|r| r.status), Some(ChunkStatus::Cancelled));
        assert_eq!(agg.errors_for(1).count(), 1);
        assert_eq!(agg.chunk_report(0).map(|r| r.status), Some(ChunkStatus::Succeeded));
        assert!(matches!(
            events.events().last(),
            Some(TranslationEvent::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_async_handle_reports_progress() {
        let fake = FakeModelBackend::new().arc();
        let orchestrator = orchestrator(fake).await.arc();
        let source = functions(3);

        let handle = orchestrator.submit_translation_async(request(&source, options(50)));
        let mut progress = handle.subscribe_progress();
        let agg = handle.wait().await.unwrap();

        assert!(agg.success);
        assert_eq!(
            *progress.borrow_and_update(),
            TranslationProgress {
                completed: 3,
                total: 3
            }
        );
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_fatal() {
        let fake = FakeModelBackend::new().arc();
        let orchestrator = orchestrator(fake.clone()).await;

        let err = orchestrator
            .submit_translation(request(
                "PRINT 1\n",
                TranslationOptions {
                    model_backend: ModelBackendKind::Remote,
                    ..options(100)
                },
            ))
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_revision_is_fatal() {
        let fake = FakeModelBackend::new().arc();
        let pool_registry = fake_registry(fake.clone());
        let pool = ExecutionPool::start(
            ExecutionPoolConfig {
                worker_count: 1,
                queue_capacity: 4,
            },
            InProcessWorkerLauncher::new(pool_registry).arc(),
        )
        .await
        .unwrap();

        let mut failing = BackendRegistry::empty();
        failing.register(ModelBackendKind::Local, |spec| {
            Err(BackendError::ModelNotFound(spec.identity()))
        });
        let orchestrator = TranslatorOrchestrator::new(
            pool.arc(),
            failing.arc(),
            profiles(),
            Arc::new(NoopEventSink),
        );

        let err = orchestrator
            .verify_backend(ModelBackendKind::Local, "v9")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TranslationError::ModelRevisionUnresolvable { ref revision, .. } if revision == "v9"
        ));

        let err = orchestrator
            .submit_translation(request("PRINT 1\n", options(100)))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(fake.total_calls(), 0);
    }
}
