//! Translation Context - Errors
//!
//! 只有致命错误会越过编排器边界，分块级别的失败都体现在结果里。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("无效的翻译请求: {0}")]
    InvalidRequest(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无法解析模型版本 {model}@{revision}: {reason}")]
    ModelRevisionUnresolvable {
        model: String,
        revision: String,
        reason: String,
    },

    #[error("模型后端不可用: {0}")]
    BackendUnavailable(String),

    #[error("执行池不可用: {0}")]
    PoolUnavailable(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TranslationError {
    /// 是否属于配置类错误（启动时应直接退出）
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TranslationError::Configuration(_) | TranslationError::ModelRevisionUnresolvable { .. }
        )
    }
}
