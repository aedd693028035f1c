//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::ports::{BackendProfiles, LocalModelSettings, RemoteModelSettings};
use crate::domain::translation::{ModelBackendKind, TranslationOptions};

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 翻译请求默认值
    #[serde(default)]
    pub translator: TranslatorConfig,

    /// 执行池配置
    #[serde(default)]
    pub pool: PoolConfig,

    /// 本地模型
    #[serde(default)]
    pub local_model: LocalModelConfig,

    /// 远程模型，url 为空表示未配置
    #[serde(default)]
    pub remote_model: RemoteModelConfig,

    /// 翻译结果缓存
    #[serde(default)]
    pub cache: CacheConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 根据配置生成后端描述
    pub fn backend_profiles(&self) -> BackendProfiles {
        let revision = self.translator.model_revision.clone();
        BackendProfiles {
            local: Some(LocalModelSettings {
                models_dir: self.local_model.models_dir.clone(),
                model_name: self.local_model.model_name.clone(),
                revision: revision.clone(),
            }),
            remote: self
                .remote_model
                .is_configured()
                .then(|| self.remote_model.to_settings(&revision)),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 翻译请求默认值
///
/// HTTP 请求未指定的选项从这里取值。
#[derive(Debug, Clone, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 单个请求同时在途的分块数
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub model_backend: ModelBackendKind,
    #[serde(default = "default_model_revision")]
    pub model_revision: String,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_target_language() -> String {
    "python".to_string()
}

fn default_max_chunk_size() -> usize {
    2000
}

fn default_overlap_lines() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_worker_count() -> usize {
    4
}

fn default_timeout_seconds() -> f64 {
    60.0
}

fn default_model_revision() -> String {
    "v1".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
            max_chunk_size: default_max_chunk_size(),
            overlap_lines: default_overlap_lines(),
            max_retries: default_max_retries(),
            worker_count: default_worker_count(),
            timeout_seconds: default_timeout_seconds(),
            model_backend: ModelBackendKind::default(),
            model_revision: default_model_revision(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl TranslatorConfig {
    pub fn options(&self) -> TranslationOptions {
        TranslationOptions {
            max_chunk_size: self.max_chunk_size,
            overlap_lines: self.overlap_lines,
            max_retries: self.max_retries,
            worker_count: self.worker_count,
            timeout_seconds: self.timeout_seconds,
            model_backend: self.model_backend,
            model_revision: self.model_revision.clone(),
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// 执行池配置
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// worker 进程数，未设置时与 translator.worker_count 相同
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// worker 可执行文件，未设置时在当前可执行文件旁查找 quill-worker
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_startup_timeout() -> u64 {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            worker_program: None,
            queue_capacity: default_queue_capacity(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// 本地模型配置
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModelConfig {
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_model_name() -> String {
    "pseudo-rules".to_string()
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            model_name: default_model_name(),
        }
    }
}

/// 远程模型配置
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteModelConfig {
    /// 推理服务基础 URL
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: f64,
    /// 服务未返回置信度时使用
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    /// 为空表示不限制
    #[serde(default)]
    pub supported_languages: Vec<String>,
    #[serde(default = "default_remote_context_tokens")]
    pub max_context_tokens: usize,
}

fn default_remote_timeout() -> f64 {
    120.0
}

fn default_confidence() -> f64 {
    0.8
}

fn default_remote_context_tokens() -> usize {
    8192
}

impl Default for RemoteModelConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model_name: String::new(),
            api_key: None,
            timeout_secs: default_remote_timeout(),
            default_confidence: default_confidence(),
            supported_languages: Vec::new(),
            max_context_tokens: default_remote_context_tokens(),
        }
    }
}

impl RemoteModelConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn to_settings(&self, revision: &str) -> RemoteModelSettings {
        RemoteModelSettings {
            base_url: self.url.clone(),
            model_name: self.model_name.clone(),
            revision: revision.to_string(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
            default_confidence: self.default_confidence,
            supported_languages: self.supported_languages.clone(),
            max_context_tokens: self.max_context_tokens,
        }
    }
}

/// 翻译结果缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/translations.sled")
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            path: default_cache_path(),
            max_entries: default_cache_max_entries(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
