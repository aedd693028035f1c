//! Data Transfer Objects

use serde::{Deserialize, Serialize};

use crate::application::TranslationStatusResponse;
use crate::domain::translation::{AggregatedTranslation, ModelBackendKind, TranslationOptions};

// ============================================================================
// 统一响应结构
// ============================================================================

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub errno: i32,
    pub error: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(data),
        }
    }
}

// ============================================================================
// Translation DTOs
// ============================================================================

/// 请求中可选的翻译选项，缺省字段使用服务端配置
#[derive(Debug, Default, Deserialize)]
pub struct TranslationOptionsDto {
    pub max_chunk_size: Option<usize>,
    pub overlap_lines: Option<usize>,
    pub max_retries: Option<u32>,
    pub worker_count: Option<usize>,
    pub timeout_seconds: Option<f64>,
    pub model_backend: Option<ModelBackendKind>,
    pub model_revision: Option<String>,
    pub retry_backoff_ms: Option<u64>,
}

impl TranslationOptionsDto {
    pub fn merge_into(self, defaults: &TranslationOptions) -> TranslationOptions {
        TranslationOptions {
            max_chunk_size: self.max_chunk_size.unwrap_or(defaults.max_chunk_size),
            overlap_lines: self.overlap_lines.unwrap_or(defaults.overlap_lines),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            model_backend: self.model_backend.unwrap_or(defaults.model_backend),
            model_revision: self
                .model_revision
                .unwrap_or_else(|| defaults.model_revision.clone()),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(defaults.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub source_text: String,
    pub target_language: Option<String>,
    #[serde(default)]
    pub options: TranslationOptionsDto,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponseDto {
    pub cached: bool,
    pub translation: AggregatedTranslation,
}

#[derive(Debug, Serialize)]
pub struct SubmitTranslationResponseDto {
    pub request_id: String,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
pub struct RequestIdRequest {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelTranslationResponseDto {
    pub request_id: String,
    pub was_running: bool,
}

#[derive(Debug, Serialize)]
pub struct TranslationStatusDto {
    pub request_id: String,
    pub target_language: String,
    pub state: String,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregatedTranslation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TranslationStatusResponse> for TranslationStatusDto {
    fn from(status: TranslationStatusResponse) -> Self {
        Self {
            request_id: status.request_id.to_string(),
            target_language: status.target_language,
            state: status.state.as_str().to_string(),
            total_chunks: status.total_chunks,
            completed_chunks: status.completed_chunks,
            created_at: status.created_at,
            finished_at: status.finished_at,
            result: status.result,
            error: status.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActiveTranslationsDto {
    pub translations: Vec<TranslationStatusDto>,
}
