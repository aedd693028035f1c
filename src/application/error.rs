//! 应用层错误定义
//!
//! 统一的命令/查询错误类型

use thiserror::Error;
use uuid::Uuid;

use crate::application::ports::{CacheError, TrackerError};
use crate::domain::translation::TranslationError;

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: Uuid,
    },

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 配置错误（后端未配置、模型版本无法解析）
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// 状态无效
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 外部服务错误
    #[error("External service error: {0}")]
    ExternalServiceError(String),

    /// 存储错误
    #[error("Storage error: {0}")]
    StorageError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApplicationError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: Uuid) -> Self {
        Self::NotFound { resource_type, id }
    }

    /// 创建 NotFound 错误（使用字符串 ID）
    pub fn not_found_str(resource_type: &'static str, id: &str) -> Self {
        Self::ValidationError(format!("{} not found: {}", resource_type, id))
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// 创建状态无效错误
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}

impl From<TranslationError> for ApplicationError {
    fn from(err: TranslationError) -> Self {
        match err {
            TranslationError::InvalidRequest(message) => Self::ValidationError(message),
            TranslationError::Configuration(_) | TranslationError::ModelRevisionUnresolvable { .. } => {
                Self::ConfigurationError(err.to_string())
            }
            TranslationError::BackendUnavailable(_) | TranslationError::PoolUnavailable(_) => {
                Self::ExternalServiceError(err.to_string())
            }
            TranslationError::Internal(message) => Self::InternalError(message),
        }
    }
}

impl From<CacheError> for ApplicationError {
    fn from(err: CacheError) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<TrackerError> for ApplicationError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(id) => Self::not_found_str("Translation", &id),
            TrackerError::AlreadyExists(_) | TrackerError::InvalidStateTransition(_) => {
                Self::InvalidState(err.to_string())
            }
        }
    }
}
