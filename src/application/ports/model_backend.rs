//! Model Backend Port - 模型后端抽象
//!
//! 本地模型与远程推理服务实现同一个接口，编排器与执行池只依赖这里的定义。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::translation::{
    Chunk, ModelBackendKind, TargetLanguage, TranslationError, TranslationResult,
};

/// 模型后端错误
///
/// 只在加载、预检这类致命路径上返回；单次翻译的失败写进 `TranslationResult`。
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model revision is not pinned: {0:?}")]
    UnpinnedRevision(String),

    #[error("Invalid model manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid backend configuration: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No backend registered for kind: {0}")]
    Unregistered(ModelBackendKind),
}

/// 后端能力描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_streaming: bool,
    pub max_context_tokens: usize,
    /// 空列表表示不限制
    pub supported_languages: Vec<String>,
}

impl ModelCapabilities {
    pub fn supports_language(&self, language: &TargetLanguage) -> bool {
        self.supported_languages.is_empty()
            || self
                .supported_languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(language.as_str()))
    }
}

/// 单次翻译调用的参数
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub target_language: TargetLanguage,
    /// 执行池对本次调用的超时，后端自身的超时应更短
    pub timeout: Duration,
    /// 第几次尝试（从 1 开始）
    pub attempt: u32,
}

/// 本地模型配置
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalModelSettings {
    pub models_dir: PathBuf,
    pub model_name: String,
    pub revision: String,
}

/// 远程模型配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteModelSettings {
    pub base_url: String,
    pub model_name: String,
    pub revision: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_secs: f64,
    pub default_confidence: f64,
    #[serde(default)]
    pub supported_languages: Vec<String>,
    pub max_context_tokens: usize,
}

/// 后端完整描述（可序列化，随任务发往 worker 进程）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSpec {
    Local(LocalModelSettings),
    Remote(RemoteModelSettings),
}

impl BackendSpec {
    pub fn kind(&self) -> ModelBackendKind {
        match self {
            BackendSpec::Local(_) => ModelBackendKind::Local,
            BackendSpec::Remote(_) => ModelBackendKind::Remote,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            BackendSpec::Local(s) => &s.model_name,
            BackendSpec::Remote(s) => &s.model_name,
        }
    }

    pub fn revision(&self) -> &str {
        match self {
            BackendSpec::Local(s) => &s.revision,
            BackendSpec::Remote(s) => &s.revision,
        }
    }

    pub fn with_revision(mut self, revision: &str) -> Self {
        match &mut self {
            BackendSpec::Local(s) => s.revision = revision.to_string(),
            BackendSpec::Remote(s) => s.revision = revision.to_string(),
        }
        self
    }

    /// 用于在 worker 内复用后端实例
    pub fn identity(&self) -> String {
        match self {
            BackendSpec::Local(s) => format!(
                "local:{}:{}@{}",
                s.models_dir.display(),
                s.model_name,
                s.revision
            ),
            BackendSpec::Remote(s) => format!("remote:{}:{}@{}", s.base_url, s.model_name, s.revision),
        }
    }
}

/// Model Backend Port
#[async_trait]
pub trait ModelBackendPort: Send + Sync {
    fn kind(&self) -> ModelBackendKind;

    fn capabilities(&self) -> ModelCapabilities;

    /// 翻译一个分块
    ///
    /// 永不返回 Err：所有失败都以 `TranslationResult::failure` 表达。
    async fn translate(&self, chunk: &Chunk, config: &TranslateConfig) -> TranslationResult;

    /// 预检：确认模型可以加载或服务地址有效
    async fn preflight(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// 按描述构造后端
pub trait BackendFactoryPort: Send + Sync {
    fn create(&self, spec: &BackendSpec) -> Result<Arc<dyn ModelBackendPort>, BackendError>;
}

/// 已配置的后端集合
///
/// 请求只携带后端类型与版本，这里补全其余配置。
#[derive(Debug, Clone, Default)]
pub struct BackendProfiles {
    pub local: Option<LocalModelSettings>,
    pub remote: Option<RemoteModelSettings>,
}

impl BackendProfiles {
    pub fn resolve(
        &self,
        kind: ModelBackendKind,
        revision: &str,
    ) -> Result<BackendSpec, TranslationError> {
        let spec = match kind {
            ModelBackendKind::Local => self.local.clone().map(BackendSpec::Local),
            ModelBackendKind::Remote => self.remote.clone().map(BackendSpec::Remote),
        };
        spec.map(|s| s.with_revision(revision)).ok_or_else(|| {
            TranslationError::Configuration(format!("model backend '{}' is not configured", kind))
        })
    }
}
