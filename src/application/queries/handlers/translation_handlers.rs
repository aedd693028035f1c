//! Translation Query Handlers

use std::sync::Arc;

use serde::Serialize;

use crate::application::error::ApplicationError;
use crate::application::metrics::{MetricsSnapshot, TranslationMetrics};
use crate::application::ports::{
    ExecutionPoolPort, PoolStatus, RequestState, TrackedTranslation, TranslationTrackerPort,
};
use crate::application::queries::{
    GetMetrics, GetPoolStatus, GetTranslationStatus, ListActiveTranslations,
};
use crate::domain::translation::{AggregatedTranslation, RequestId};

// ============================================================================
// Response DTOs
// ============================================================================

/// 翻译请求状态响应
#[derive(Debug, Clone)]
pub struct TranslationStatusResponse {
    pub request_id: RequestId,
    pub target_language: String,
    pub state: RequestState,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub result: Option<AggregatedTranslation>,
    pub error: Option<String>,
}

impl From<TrackedTranslation> for TranslationStatusResponse {
    fn from(tracked: TrackedTranslation) -> Self {
        Self {
            request_id: tracked.request_id,
            target_language: tracked.target_language,
            state: tracked.state,
            total_chunks: tracked.total_chunks,
            completed_chunks: tracked.completed_chunks,
            created_at: tracked.created_at.to_rfc3339(),
            finished_at: tracked.finished_at.map(|t| t.to_rfc3339()),
            result: tracked.result,
            error: tracked.error_message,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GetTranslationStatus Handler
pub struct GetTranslationStatusHandler {
    tracker: Arc<dyn TranslationTrackerPort>,
}

impl GetTranslationStatusHandler {
    pub fn new(tracker: Arc<dyn TranslationTrackerPort>) -> Self {
        Self { tracker }
    }

    pub fn handle(
        &self,
        query: GetTranslationStatus,
    ) -> Result<TranslationStatusResponse, ApplicationError> {
        let request_id = RequestId::parse(&query.request_id).ok_or_else(|| {
            ApplicationError::validation(format!("Invalid request_id: {}", query.request_id))
        })?;

        let tracked = self
            .tracker
            .get(&request_id)
            .ok_or_else(|| ApplicationError::not_found("Translation", *request_id.as_uuid()))?;

        Ok(TranslationStatusResponse::from(tracked))
    }
}

/// ListActiveTranslations Handler
pub struct ListActiveTranslationsHandler {
    tracker: Arc<dyn TranslationTrackerPort>,
}

impl ListActiveTranslationsHandler {
    pub fn new(tracker: Arc<dyn TranslationTrackerPort>) -> Self {
        Self { tracker }
    }

    pub fn handle(&self, _query: ListActiveTranslations) -> Vec<TranslationStatusResponse> {
        let mut active: Vec<TranslationStatusResponse> = self
            .tracker
            .list_active()
            .into_iter()
            .map(TranslationStatusResponse::from)
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active
    }
}

/// GetPoolStatus Handler
pub struct GetPoolStatusHandler {
    pool: Arc<dyn ExecutionPoolPort>,
}

impl GetPoolStatusHandler {
    pub fn new(pool: Arc<dyn ExecutionPoolPort>) -> Self {
        Self { pool }
    }

    pub fn handle(&self, _query: GetPoolStatus) -> PoolStatus {
        self.pool.status()
    }
}

/// 指标响应：翻译计时与执行池重启次数
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub live_workers: usize,
    pub busy_workers: usize,
    pub total_restarts: u64,
    pub translations: MetricsSnapshot,
}

/// GetMetrics Handler
pub struct GetMetricsHandler {
    metrics: Arc<TranslationMetrics>,
    pool: Arc<dyn ExecutionPoolPort>,
}

impl GetMetricsHandler {
    pub fn new(metrics: Arc<TranslationMetrics>, pool: Arc<dyn ExecutionPoolPort>) -> Self {
        Self { metrics, pool }
    }

    pub fn handle(&self, _query: GetMetrics) -> MetricsResponse {
        let status = self.pool.status();
        MetricsResponse {
            live_workers: status.live_workers,
            busy_workers: status.busy_workers,
            total_restarts: status.total_restarts,
            translations: self.metrics.snapshot(),
        }
    }
}
