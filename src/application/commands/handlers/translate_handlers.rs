//! Translation Command Handlers

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::commands::translate_commands::*;
use crate::application::error::ApplicationError;
use crate::application::orchestrator::{TranslationHandle, TranslatorOrchestrator};
use crate::application::ports::{
    generate_cache_key, RequestState, TrackedTranslation, TranslationCachePort,
    TranslationTrackerPort,
};
use crate::domain::translation::{
    AggregatedTranslation, ChunkStatus, RequestId, TranslationOptions, TranslationRequest,
};

/// 缓存 key：源文本 + 目标语言 + 后端身份 + 切分参数
fn cache_key_for(
    orchestrator: &TranslatorOrchestrator,
    request: &TranslationRequest,
) -> Result<String, ApplicationError> {
    let options = request.options();
    let spec = orchestrator
        .profiles()
        .resolve(options.model_backend, &options.model_revision)?;
    Ok(generate_cache_key(
        request.source_text(),
        request.target_language().as_str(),
        spec.kind().as_str(),
        spec.model_name(),
        spec.revision(),
        options.max_chunk_size,
        options.overlap_lines,
    ))
}

/// 读取缓存，失败只记录日志
async fn lookup(
    cache: Option<&Arc<dyn TranslationCachePort>>,
    cache_key: &str,
    request_id: RequestId,
) -> Option<AggregatedTranslation> {
    let cache = cache?;
    match cache.retrieve(cache_key).await {
        Ok(Some(mut cached)) => {
            tracing::info!(request_id = %request_id, cache_key = %cache_key, "Cache hit");
            cached.request_id = request_id;
            Some(cached)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(cache_key = %cache_key, error = %e, "Failed to read translation cache");
            None
        }
    }
}

/// 只保存完整成功的结果
async fn store(
    cache: Option<&Arc<dyn TranslationCachePort>>,
    cache_key: &str,
    translation: &AggregatedTranslation,
) {
    let Some(cache) = cache else {
        return;
    };
    if !translation.success || translation.cancelled {
        return;
    }
    if let Err(e) = cache.save(cache_key, translation).await {
        tracing::warn!(cache_key = %cache_key, error = %e, "Failed to save translation cache");
    }
}

fn build_request(
    source_text: String,
    target_language: &str,
    options: TranslationOptions,
) -> Result<TranslationRequest, ApplicationError> {
    Ok(TranslationRequest::new(source_text, target_language, options)?)
}

/// SubmitTranslation Handler - 同步翻译
pub struct SubmitTranslationHandler {
    orchestrator: Arc<TranslatorOrchestrator>,
    cache: Option<Arc<dyn TranslationCachePort>>,
}

impl SubmitTranslationHandler {
    pub fn new(
        orchestrator: Arc<TranslatorOrchestrator>,
        cache: Option<Arc<dyn TranslationCachePort>>,
    ) -> Self {
        Self {
            orchestrator,
            cache,
        }
    }

    pub async fn handle(
        &self,
        cmd: SubmitTranslationCommand,
    ) -> Result<SubmitTranslationResponse, ApplicationError> {
        let request = build_request(cmd.source_text, &cmd.target_language, cmd.options)?;
        let request_id = *request.request_id();
        let cache_key = cache_key_for(&self.orchestrator, &request)?;

        if let Some(translation) = lookup(self.cache.as_ref(), &cache_key, request_id).await {
            return Ok(SubmitTranslationResponse {
                translation,
                cached: true,
            });
        }

        let translation = self.orchestrator.submit_translation(request).await?;
        store(self.cache.as_ref(), &cache_key, &translation).await;

        Ok(SubmitTranslationResponse {
            translation,
            cached: false,
        })
    }
}

/// SubmitTranslationAsync Handler - 异步翻译
///
/// 请求登记到 tracker 后立即返回，后台任务负责同步进度与最终结果。
pub struct SubmitTranslationAsyncHandler {
    orchestrator: Arc<TranslatorOrchestrator>,
    tracker: Arc<dyn TranslationTrackerPort>,
    cache: Option<Arc<dyn TranslationCachePort>>,
}

impl SubmitTranslationAsyncHandler {
    pub fn new(
        orchestrator: Arc<TranslatorOrchestrator>,
        tracker: Arc<dyn TranslationTrackerPort>,
        cache: Option<Arc<dyn TranslationCachePort>>,
    ) -> Self {
        Self {
            orchestrator,
            tracker,
            cache,
        }
    }

    pub async fn handle(
        &self,
        cmd: SubmitTranslationAsyncCommand,
    ) -> Result<SubmitTranslationAsyncResponse, ApplicationError> {
        let request = build_request(cmd.source_text, &cmd.target_language, cmd.options)?;
        let request_id = *request.request_id();
        let cache_key = cache_key_for(&self.orchestrator, &request)?;
        let tracked = TrackedTranslation::new(request_id, request.target_language().as_str());

        if let Some(translation) = lookup(self.cache.as_ref(), &cache_key, request_id).await {
            self.tracker
                .register(tracked, CancellationToken::new())?;
            let total = translation.chunks.len();
            self.tracker.set_progress(&request_id, total, total);
            self.tracker.complete(&request_id, translation)?;
            return Ok(SubmitTranslationAsyncResponse {
                request_id,
                cached: true,
            });
        }

        // 先登记，登记失败时不启动翻译
        let cancel = CancellationToken::new();
        self.tracker.register(tracked, cancel.clone())?;
        let handle = self
            .orchestrator
            .submit_translation_async_with(request, cancel);

        tracing::info!(request_id = %request_id, "Translation submitted");

        let tracker = self.tracker.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            follow(handle, tracker, cache, cache_key).await;
        });

        Ok(SubmitTranslationAsyncResponse {
            request_id,
            cached: false,
        })
    }
}

/// 跟随异步请求，把进度与结果写入 tracker
async fn follow(
    handle: TranslationHandle,
    tracker: Arc<dyn TranslationTrackerPort>,
    cache: Option<Arc<dyn TranslationCachePort>>,
    cache_key: String,
) {
    let request_id = *handle.request_id();
    let mut progress = handle.subscribe_progress();
    if let Err(e) = tracker.set_state(&request_id, RequestState::Running) {
        tracing::warn!(request_id = %request_id, error = %e, "Failed to mark translation running");
    }

    let wait = handle.wait();
    tokio::pin!(wait);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            changed = progress.changed() => {
                if changed.is_err() {
                    // 发送端已释放，请求即将结束
                    break (&mut wait).await;
                }
                let current = *progress.borrow_and_update();
                tracker.set_progress(&request_id, current.completed, current.total);
            }
        }
    };

    let recorded = match result {
        Ok(translation) => {
            let total = translation.chunks.len();
            let completed = translation
                .chunks
                .iter()
                .filter(|r| r.status != ChunkStatus::Cancelled)
                .count();
            tracker.set_progress(&request_id, completed, total);
            store(cache.as_ref(), &cache_key, &translation).await;
            tracker.complete(&request_id, translation)
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Translation failed");
            tracker.fail(&request_id, e.to_string())
        }
    };

    if let Err(e) = recorded {
        tracing::warn!(request_id = %request_id, error = %e, "Failed to record translation result");
    }
}

/// CancelTranslation Handler - 取消翻译
pub struct CancelTranslationHandler {
    tracker: Arc<dyn TranslationTrackerPort>,
}

impl CancelTranslationHandler {
    pub fn new(tracker: Arc<dyn TranslationTrackerPort>) -> Self {
        Self { tracker }
    }

    pub fn handle(
        &self,
        cmd: CancelTranslationCommand,
    ) -> Result<CancelTranslationResponse, ApplicationError> {
        let request_id = RequestId::parse(&cmd.request_id).ok_or_else(|| {
            ApplicationError::validation(format!("Invalid request_id: {}", cmd.request_id))
        })?;

        if self.tracker.get(&request_id).is_none() {
            return Err(ApplicationError::not_found(
                "Translation",
                *request_id.as_uuid(),
            ));
        }

        let was_running = self.tracker.cancel(&request_id);
        tracing::info!(request_id = %request_id, was_running, "Translation cancel requested");

        Ok(CancelTranslationResponse {
            request_id,
            was_running,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::application::ports::{
        BackendProfiles, CacheError, CacheStats, LocalModelSettings, ModelBackendPort,
        NoopEventSink, TrackerError,
    };
    use crate::domain::translation::ModelBackendKind;
    use crate::infrastructure::adapters::backends::{BackendRegistry, FakeModelBackend};
    use crate::infrastructure::memory::InMemoryTranslationTracker;
    use crate::infrastructure::pool::{ExecutionPool, ExecutionPoolConfig, InProcessWorkerLauncher};

    #[derive(Default)]
    struct MapCache {
        entries: Mutex<HashMap<String, AggregatedTranslation>>,
    }

    #[async_trait]
    impl TranslationCachePort for MapCache {
        async fn save(&self, cache_key: &str, translation: &AggregatedTranslation) -> Result<(), CacheError> {
            self.entries
                .lock()
                .unwrap()
                .insert(cache_key.to_string(), translation.clone());
            Ok(())
        }

        async fn retrieve(&self, cache_key: &str) -> Result<Option<AggregatedTranslation>, CacheError> {
            Ok(self.entries.lock().unwrap().get(cache_key).cloned())
        }

        async fn remove(&self, cache_key: &str) -> Result<(), CacheError> {
            self.entries.lock().unwrap().remove(cache_key);
            Ok(())
        }

        async fn stats(&self) -> CacheStats {
            CacheStats {
                total_entries: self.entries.lock().unwrap().len(),
                ..CacheStats::default()
            }
        }
    }

    /// 拒绝登记的 tracker，其余操作交给内存实现
    #[derive(Default)]
    struct RejectingTracker {
        inner: InMemoryTranslationTracker,
    }

    impl TranslationTrackerPort for RejectingTracker {
        fn register(&self, translation: TrackedTranslation, _cancel: CancellationToken) -> Result<(), TrackerError> {
            Err(TrackerError::AlreadyExists(translation.request_id.to_string()))
        }

        fn set_state(&self, request_id: &RequestId, state: RequestState) -> Result<(), TrackerError> {
            self.inner.set_state(request_id, state)
        }

        fn set_progress(&self, request_id: &RequestId, completed: usize, total: usize) {
            self.inner.set_progress(request_id, completed, total)
        }

        fn complete(&self, request_id: &RequestId, result: AggregatedTranslation) -> Result<(), TrackerError> {
            self.inner.complete(request_id, result)
        }

        fn fail(&self, request_id: &RequestId, error: String) -> Result<(), TrackerError> {
            self.inner.fail(request_id, error)
        }

        fn cancel(&self, request_id: &RequestId) -> bool {
            self.inner.cancel(request_id)
        }

        fn get(&self, request_id: &RequestId) -> Option<TrackedTranslation> {
            self.inner.get(request_id)
        }

        fn list_active(&self) -> Vec<TrackedTranslation> {
            self.inner.list_active()
        }

        fn cleanup_finished(&self, older_than: DateTime<Utc>) -> usize {
            self.inner.cleanup_finished(older_than)
        }
    }

    async fn orchestrator(fake: Arc<FakeModelBackend>) -> Arc<TranslatorOrchestrator> {
        let mut registry = BackendRegistry::empty();
        registry.register(ModelBackendKind::Local, move |_| {
            Ok(fake.clone() as Arc<dyn ModelBackendPort>)
        });
        let registry = registry.arc();
        let pool = ExecutionPool::start(
            ExecutionPoolConfig {
                worker_count: 2,
                queue_capacity: 8,
            },
            InProcessWorkerLauncher::new(registry.clone()).arc(),
        )
        .await
        .unwrap();
        let profiles = BackendProfiles {
            local: Some(LocalModelSettings {
                models_dir: PathBuf::from("models"),
                model_name: "fake".to_string(),
                revision: "v1".to_string(),
            }),
            remote: None,
        };
        TranslatorOrchestrator::new(pool.arc(), registry, profiles, Arc::new(NoopEventSink)).arc()
    }

    fn options() -> TranslationOptions {
        TranslationOptions {
            retry_backoff_ms: 1,
            timeout_seconds: 5.0,
            ..TranslationOptions::default()
        }
    }

    async fn wait_finished(
        tracker: &InMemoryTranslationTracker,
        request_id: &RequestId,
    ) -> TrackedTranslation {
        for _ in 0..200 {
            if let Some(tracked) = tracker.get(request_id) {
                if tracked.state.is_finished() {
                    return tracked;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("translation {} did not finish", request_id);
    }

    #[tokio::test]
    async fn test_sync_submit_uses_cache_on_second_call() {
        let fake = FakeModelBackend::new().arc();
        let cache: Arc<dyn TranslationCachePort> = Arc::new(MapCache::default());
        let handler = SubmitTranslationHandler::new(orchestrator(fake.clone()).await, Some(cache.clone()));

        let cmd = SubmitTranslationCommand {
            source_text: "PRINT 1\n".to_string(),
            target_language: "python".to_string(),
            options: options(),
        };
        let first = handler.handle(cmd.clone()).await.unwrap();
        assert!(!first.cached);
        assert!(first.translation.success);
        assert_eq!(cache.stats().await.total_entries, 1);

        let second = handler.handle(cmd).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.translation.code, first.translation.code);
        assert_ne!(second.translation.request_id, first.translation.request_id);
        assert_eq!(fake.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_key_follows_chunking_options() {
        let fake = FakeModelBackend::new().arc();
        let cache: Arc<dyn TranslationCachePort> = Arc::new(MapCache::default());
        let handler = SubmitTranslationHandler::new(orchestrator(fake.clone()).await, Some(cache.clone()));
        let cmd = |options: TranslationOptions| SubmitTranslationCommand {
            source_text: "PRINT 1\n".to_string(),
            target_language: "python".to_string(),
            options,
        };

        let first = handler.handle(cmd(options())).await.unwrap();
        assert!(!first.cached);

        let smaller = handler
            .handle(cmd(TranslationOptions {
                max_chunk_size: 1000,
                ..options()
            }))
            .await
            .unwrap();
        assert!(!smaller.cached);

        let no_overlap = handler
            .handle(cmd(TranslationOptions {
                overlap_lines: 0,
                ..options()
            }))
            .await
            .unwrap();
        assert!(!no_overlap.cached);

        assert_eq!(cache.stats().await.total_entries, 3);
        assert_eq!(fake.total_calls(), 3);
        assert!(handler.handle(cmd(options())).await.unwrap().cached);
    }

    #[tokio::test]
    async fn test_sync_submit_does_not_cache_failures() {
        let fake = FakeModelBackend::new().always_fail(0).arc();
        let cache: Arc<dyn TranslationCachePort> = Arc::new(MapCache::default());
        let handler = SubmitTranslationHandler::new(orchestrator(fake).await, Some(cache.clone()));

        let response = handler
            .handle(SubmitTranslationCommand {
                source_text: "PRINT 1\n".to_string(),
                target_language: "python".to_string(),
                options: options(),
            })
            .await
            .unwrap();
        assert!(!response.translation.success);
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_sync_submit_rejects_invalid_request() {
        let fake = FakeModelBackend::new().arc();
        let handler = SubmitTranslationHandler::new(orchestrator(fake).await, None);

        let err = handler
            .handle(SubmitTranslationCommand {
                source_text: "PRINT 1\n".to_string(),
                target_language: "python".to_string(),
                options: TranslationOptions {
                    worker_count: 0,
                    ..options()
                },
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApplicationError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_async_submit_records_result_in_tracker() {
        let fake = FakeModelBackend::new().arc();
        let tracker = Arc::new(InMemoryTranslationTracker::new());
        let handler = SubmitTranslationAsyncHandler::new(orchestrator(fake).await, tracker.clone(), None);

        let response = handler
            .handle(SubmitTranslationAsyncCommand {
                source_text: "PRINT 1\nPRINT 2\n".to_string(),
                target_language: "javascript".to_string(),
                options: options(),
            })
            .await
            .unwrap();
        assert!(!response.cached);

        let tracked = wait_finished(&tracker, &response.request_id).await;
        assert_eq!(tracked.state, RequestState::Completed);
        assert_eq!(tracked.completed_chunks, tracked.total_chunks);
        let result = tracked.result.unwrap();
        assert_eq!(result.code, "// PRINT 1\n// PRINT 2\n");
    }

    #[tokio::test]
    async fn test_async_submit_does_not_start_when_registration_fails() {
        let fake = FakeModelBackend::new().arc();
        let tracker = Arc::new(RejectingTracker::default());
        let handler = SubmitTranslationAsyncHandler::new(orchestrator(fake.clone()).await, tracker, None);

        let err = handler
            .handle(SubmitTranslationAsyncCommand {
                source_text: "PRINT 1\n".to_string(),
                target_language: "python".to_string(),
                options: options(),
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApplicationError::InvalidState(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_running_translation() {
        let fake = FakeModelBackend::new().hang_chunk(0).arc();
        let tracker = Arc::new(InMemoryTranslationTracker::new());
        let submit = SubmitTranslationAsyncHandler::new(orchestrator(fake).await, tracker.clone(), None);
        let cancel = CancelTranslationHandler::new(tracker.clone());

        let response = submit
            .handle(SubmitTranslationAsyncCommand {
                source_text: "PRINT 1\n".to_string(),
                target_language: "python".to_string(),
                options: options(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cancelled = cancel
            .handle(CancelTranslationCommand {
                request_id: response.request_id.to_string(),
            })
            .unwrap();
        assert!(cancelled.was_running);

        let tracked = wait_finished(&tracker, &response.request_id).await;
        assert_eq!(tracked.state, RequestState::Cancelled);
        let result = tracked.result.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.code, "PRINT 1\n");
    }

    #[test]
    fn test_cancel_unknown_or_invalid_id() {
        let tracker = Arc::new(InMemoryTranslationTracker::new());
        let cancel = CancelTranslationHandler::new(tracker);

        let err = cancel
            .handle(CancelTranslationCommand {
                request_id: "not-a-uuid".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ApplicationError::ValidationError(_)));

        let err = cancel
            .handle(CancelTranslationCommand {
                request_id: RequestId::new().to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound { .. }));
    }
}
