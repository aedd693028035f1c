//! Translation Tracker Port - 异步翻译请求管理
//!
//! 记录异步提交的请求状态、进度与最终结果，具体实现在 infrastructure/memory 层

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::translation::{AggregatedTranslation, RequestId};

/// Tracker 错误
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Translation not found: {0}")]
    NotFound(String),

    #[error("Translation already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

/// 请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// 已受理，尚未开始
    Pending,
    /// 正在翻译
    Running,
    /// 已产出聚合结果（可能部分失败）
    Completed,
    /// 致命错误，没有聚合结果
    Failed,
    /// 已取消
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Running => "running",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestState::Pending),
            "running" => Some(RequestState::Running),
            "completed" => Some(RequestState::Completed),
            "failed" => Some(RequestState::Failed),
            "cancelled" => Some(RequestState::Cancelled),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }
}

/// 被跟踪的翻译请求
#[derive(Debug, Clone)]
pub struct TrackedTranslation {
    pub request_id: RequestId,
    pub target_language: String,
    pub state: RequestState,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<AggregatedTranslation>,
    pub error_message: Option<String>,
}

impl TrackedTranslation {
    pub fn new(request_id: RequestId, target_language: impl Into<String>) -> Self {
        Self {
            request_id,
            target_language: target_language.into(),
            state: RequestState::Pending,
            total_chunks: 0,
            completed_chunks: 0,
            created_at: Utc::now(),
            finished_at: None,
            result: None,
            error_message: None,
        }
    }
}

/// Translation Tracker Port
///
/// 所有状态存储在内存中
pub trait TranslationTrackerPort: Send + Sync {
    /// 登记请求及其取消令牌
    fn register(
        &self,
        translation: TrackedTranslation,
        cancel: CancellationToken,
    ) -> Result<(), TrackerError>;

    /// 设置请求状态
    fn set_state(&self, request_id: &RequestId, state: RequestState) -> Result<(), TrackerError>;

    /// 更新进度
    fn set_progress(&self, request_id: &RequestId, completed: usize, total: usize);

    /// 记录聚合结果
    fn complete(
        &self,
        request_id: &RequestId,
        result: AggregatedTranslation,
    ) -> Result<(), TrackerError>;

    /// 记录致命错误
    fn fail(&self, request_id: &RequestId, error: String) -> Result<(), TrackerError>;

    /// 触发取消，返回请求是否仍在运行
    fn cancel(&self, request_id: &RequestId) -> bool;

    /// 获取请求
    fn get(&self, request_id: &RequestId) -> Option<TrackedTranslation>;

    /// 未结束的请求
    fn list_active(&self) -> Vec<TrackedTranslation>;

    /// 清理已结束且早于 `older_than` 的请求，返回清理数量
    fn cleanup_finished(&self, older_than: DateTime<Utc>) -> usize;
}
