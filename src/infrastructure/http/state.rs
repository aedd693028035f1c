//! Application State
//!
//! 包含所有 Command/Query Handlers 的应用状态

use std::sync::Arc;

use crate::application::{
    // Command handlers
    CancelTranslationHandler, SubmitTranslationAsyncHandler, SubmitTranslationHandler,
    // Query handlers
    GetMetricsHandler, GetPoolStatusHandler, GetTranslationStatusHandler,
    ListActiveTranslationsHandler,
    // Ports
    TranslationCachePort, TranslationTrackerPort, TranslatorOrchestrator,
};
use crate::domain::translation::TranslationOptions;
use crate::infrastructure::events::EventPublisher;

/// 请求未携带时使用的默认值
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub target_language: String,
    pub options: TranslationOptions,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            target_language: "python".to_string(),
            options: TranslationOptions::default(),
        }
    }
}

/// 应用状态
pub struct AppState {
    // ========== Ports ==========
    pub orchestrator: Arc<TranslatorOrchestrator>,
    pub tracker: Arc<dyn TranslationTrackerPort>,
    pub event_publisher: Arc<EventPublisher>,
    pub defaults: RequestDefaults,

    // ========== Command Handlers ==========
    pub submit_translation_handler: SubmitTranslationHandler,
    pub submit_translation_async_handler: SubmitTranslationAsyncHandler,
    pub cancel_translation_handler: CancelTranslationHandler,

    // ========== Query Handlers ==========
    pub get_translation_status_handler: GetTranslationStatusHandler,
    pub list_active_translations_handler: ListActiveTranslationsHandler,
    pub get_pool_status_handler: GetPoolStatusHandler,
    pub get_metrics_handler: GetMetricsHandler,
}

impl AppState {
    /// 创建应用状态
    ///
    /// `event_publisher` 应与编排器使用的事件出口是同一个实例，
    /// 否则 WebSocket 收不到进度。
    pub fn new(
        orchestrator: Arc<TranslatorOrchestrator>,
        tracker: Arc<dyn TranslationTrackerPort>,
        event_publisher: Arc<EventPublisher>,
        cache: Option<Arc<dyn TranslationCachePort>>,
        defaults: RequestDefaults,
    ) -> Self {
        Self {
            // Ports
            orchestrator: orchestrator.clone(),
            tracker: tracker.clone(),
            event_publisher,
            defaults,

            // Command handlers
            submit_translation_handler: SubmitTranslationHandler::new(
                orchestrator.clone(),
                cache.clone(),
            ),
            submit_translation_async_handler: SubmitTranslationAsyncHandler::new(
                orchestrator.clone(),
                tracker.clone(),
                cache,
            ),
            cancel_translation_handler: CancelTranslationHandler::new(tracker.clone()),

            // Query handlers
            get_translation_status_handler: GetTranslationStatusHandler::new(tracker.clone()),
            list_active_translations_handler: ListActiveTranslationsHandler::new(tracker),
            get_pool_status_handler: GetPoolStatusHandler::new(orchestrator.pool().clone()),
            get_metrics_handler: GetMetricsHandler::new(
                orchestrator.metrics().clone(),
                orchestrator.pool().clone(),
            ),
        }
    }
}
