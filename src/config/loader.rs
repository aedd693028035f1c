//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `QUILL_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `QUILL_SERVER__PORT=8080`
/// - `QUILL_TRANSLATOR__WORKER_COUNT=8`
/// - `QUILL_REMOTE_MODEL__URL=http://inference:9000`
/// - `QUILL_CACHE__ENABLED=false`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值由各结构体的 serde default 提供

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 注意: 环境变量名会被转换为小写
    builder = builder.add_source(
        Environment::with_prefix("QUILL")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    // 请求默认值与请求本身使用同一套校验
    config
        .translator
        .options()
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("translator: {}", e)))?;

    if config.translator.target_language.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "translator.target_language cannot be empty".to_string(),
        ));
    }

    if config.pool.worker_count == Some(0) {
        return Err(ConfigError::ValidationError(
            "pool.worker_count must be greater than 0".to_string(),
        ));
    }

    if config.pool.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "pool.queue_capacity must be greater than 0".to_string(),
        ));
    }

    if config.local_model.model_name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "local_model.model_name cannot be empty".to_string(),
        ));
    }

    if config.remote_model.is_configured() {
        let remote = &config.remote_model;
        if remote.model_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "remote_model.model_name cannot be empty when url is set".to_string(),
            ));
        }
        if !remote.timeout_secs.is_finite() || remote.timeout_secs <= 0.0 {
            return Err(ConfigError::ValidationError(
                "remote_model.timeout_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&remote.default_confidence) {
            return Err(ConfigError::ValidationError(
                "remote_model.default_confidence must be within [0, 1]".to_string(),
            ));
        }
    }

    if config.cache.enabled && config.cache.max_entries == 0 {
        return Err(ConfigError::ValidationError(
            "cache.max_entries cannot be 0 when cache is enabled".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    let t = &config.translator;
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}", config.server.addr());
    tracing::info!("Default Target Language: {}", t.target_language);
    tracing::info!(
        "Chunking: max_chunk_size={} overlap_lines={}",
        t.max_chunk_size,
        t.overlap_lines
    );
    tracing::info!(
        "Retries: max_retries={} backoff={}ms timeout={}s",
        t.max_retries,
        t.retry_backoff_ms,
        t.timeout_seconds
    );
    tracing::info!("Model Backend: {}@{}", t.model_backend, t.model_revision);
    tracing::info!(
        "Local Model: {}/{}",
        config.local_model.models_dir.display(),
        config.local_model.model_name
    );
    if config.remote_model.is_configured() {
        tracing::info!(
            "Remote Model: {} ({})",
            config.remote_model.url,
            config.remote_model.model_name
        );
    }
    tracing::info!(
        "Pool: workers={} queue_capacity={}",
        config.pool.worker_count.unwrap_or(t.worker_count),
        config.pool.queue_capacity
    );
    tracing::info!("Cache Enabled: {}", config.cache.enabled);
    if config.cache.enabled {
        tracing::info!("Cache Path: {}", config.cache.path.display());
    }
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::translation::ModelBackendKind;
    use std::io::Write;

    #[test]
    fn test_validation_passes_for_default_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validation_error_for_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_bad_translator_defaults() {
        let mut config = AppConfig::default();
        config.translator.worker_count = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.translator.model_revision = " ".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.translator.timeout_seconds = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_incomplete_remote() {
        let mut config = AppConfig::default();
        config.remote_model.url = "http://localhost:9000".to_string();
        assert!(validate_config(&config).is_err());

        config.remote_model.model_name = "coder".to_string();
        assert!(validate_config(&config).is_ok());

        config.remote_model.default_confidence = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[translator]\nworker_count = 2\nmodel_backend = \"remote\"\n\n[remote_model]\nurl = \"http://localhost:9000\"\nmodel_name = \"coder\""
        )
        .unwrap();

        let config = load_config_from_path(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.translator.worker_count, 2);
        assert_eq!(config.translator.model_backend, ModelBackendKind::Remote);
        // 未出现的字段保持默认值
        assert_eq!(config.translator.max_chunk_size, 2000);
        assert!(config.backend_profiles().remote.is_some());
    }
}
