//! Translation Events Port - 翻译进度事件

use serde::{Deserialize, Serialize};

use super::TaskState;

/// 翻译进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum TranslationEvent {
    /// 分块完成，开始提交
    Started {
        request_id: String,
        total_chunks: usize,
    },
    /// 分块任务状态变化
    ChunkState {
        request_id: String,
        chunk_index: usize,
        attempt: u32,
        state: TaskState,
    },
    /// 分块翻译成功
    ChunkCompleted {
        request_id: String,
        chunk_index: usize,
        attempts: u32,
        confidence: f64,
        completed: usize,
        total: usize,
    },
    /// 分块失败，将在退避后重试
    ChunkRetrying {
        request_id: String,
        chunk_index: usize,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// 分块重试耗尽
    ChunkAbandoned {
        request_id: String,
        chunk_index: usize,
        attempts: u32,
        reason: String,
    },
    /// 聚合完成
    Completed {
        request_id: String,
        success: bool,
        confidence: f64,
        warnings: usize,
        errors: usize,
    },
    /// 请求被取消
    Cancelled {
        request_id: String,
        completed: usize,
        total: usize,
    },
    /// 致命错误
    Failed { request_id: String, error: String },
}

impl TranslationEvent {
    pub fn request_id(&self) -> &str {
        match self {
            TranslationEvent::Started { request_id, .. }
            | TranslationEvent::ChunkState { request_id, .. }
            | TranslationEvent::ChunkCompleted { request_id, .. }
            | TranslationEvent::ChunkRetrying { request_id, .. }
            | TranslationEvent::ChunkAbandoned { request_id, .. }
            | TranslationEvent::Completed { request_id, .. }
            | TranslationEvent::Cancelled { request_id, .. }
            | TranslationEvent::Failed { request_id, .. } => request_id,
        }
    }

    /// 请求级终止事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranslationEvent::Completed { .. }
                | TranslationEvent::Cancelled { .. }
                | TranslationEvent::Failed { .. }
        )
    }
}

/// 事件出口
pub trait TranslationEventSink: Send + Sync {
    fn publish(&self, event: TranslationEvent);
}

/// 丢弃所有事件
pub struct NoopEventSink;

impl TranslationEventSink for NoopEventSink {
    fn publish(&self, _event: TranslationEvent) {}
}
