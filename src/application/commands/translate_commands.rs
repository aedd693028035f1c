//! Translation Commands - 翻译相关命令

use crate::domain::translation::{AggregatedTranslation, RequestId, TranslationOptions};

/// 同步翻译命令
#[derive(Debug, Clone)]
pub struct SubmitTranslationCommand {
    pub source_text: String,
    pub target_language: String,
    pub options: TranslationOptions,
}

/// 同步翻译响应
#[derive(Debug, Clone)]
pub struct SubmitTranslationResponse {
    pub translation: AggregatedTranslation,
    /// 结果来自缓存
    pub cached: bool,
}

/// 异步翻译命令
#[derive(Debug, Clone)]
pub struct SubmitTranslationAsyncCommand {
    pub source_text: String,
    pub target_language: String,
    pub options: TranslationOptions,
}

/// 异步翻译响应
#[derive(Debug, Clone)]
pub struct SubmitTranslationAsyncResponse {
    pub request_id: RequestId,
    pub cached: bool,
}

/// 取消翻译命令
#[derive(Debug, Clone)]
pub struct CancelTranslationCommand {
    pub request_id: String,
}

/// 取消翻译响应
#[derive(Debug, Clone)]
pub struct CancelTranslationResponse {
    pub request_id: RequestId,
    /// 取消时请求是否仍在运行
    pub was_running: bool,
}
