//! Remote Model Backend - 远程推理服务客户端
//!
//! 通过 HTTP 调用远程翻译服务。传输失败、非 2xx 响应和无法解析的
//! 响应体都转换为失败的 `TranslationResult`，不会向调用方抛出。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::application::ports::{
    BackendError, ModelBackendPort, ModelCapabilities, RemoteModelSettings, TranslateConfig,
};
use crate::domain::prompt::{build_prompt, extract_code};
use crate::domain::translation::{Chunk, ModelBackendKind, ResultMetadata, TranslationResult};

/// 远程超时相对执行池超时的比例
const POOL_TIMEOUT_SHARE: f64 = 0.8;

/// 翻译请求
#[derive(Debug, Serialize)]
struct RemoteTranslateRequest<'a> {
    model: &'a str,
    revision: &'a str,
    target_language: &'a str,
    prompt: String,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    nesting_depth: usize,
}

/// 翻译响应
#[derive(Debug, Deserialize)]
struct RemoteTranslateResponse {
    code: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// 远程模型后端
pub struct RemoteModelBackend {
    settings: RemoteModelSettings,
    endpoint: Url,
    client: Client,
}

impl RemoteModelBackend {
    /// 创建客户端；地址无法解析时返回配置错误
    pub fn new(settings: RemoteModelSettings) -> Result<Self, BackendError> {
        let mut base = Url::parse(&settings.base_url).map_err(|e| {
            BackendError::Configuration(format!("invalid remote url '{}': {}", settings.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(BackendError::Configuration(format!(
                "unsupported url scheme '{}'",
                base.scheme()
            )));
        }
        // 保留基础路径前缀：`http://host/api` 拼为 `http://host/api/v1/translate`
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("v1/translate")
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        if !(settings.timeout_secs.is_finite() && settings.timeout_secs > 0.0) {
            return Err(BackendError::Configuration(format!(
                "timeout_secs must be positive, got {}",
                settings.timeout_secs
            )));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        tracing::info!(
            endpoint = %endpoint,
            model = %settings.model_name,
            revision = %settings.revision,
            "RemoteModelBackend initialized"
        );

        Ok(Self {
            settings,
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// 实际使用的超时：配置值与执行池超时 80% 中较小者
    pub fn effective_timeout(&self, pool_timeout: Duration) -> Duration {
        let configured = Duration::from_secs_f64(self.settings.timeout_secs);
        let pool_share = pool_timeout.mul_f64(POOL_TIMEOUT_SHARE);
        configured.min(pool_share)
    }

    fn metadata(&self) -> ResultMetadata {
        ResultMetadata::new(
            &self.settings.model_name,
            &self.settings.revision,
            ModelBackendKind::Remote,
        )
    }

    async fn call(
        &self,
        chunk: &Chunk,
        config: &TranslateConfig,
        timeout: Duration,
    ) -> Result<RemoteTranslateResponse, String> {
        let body = RemoteTranslateRequest {
            model: &self.settings.model_name,
            revision: &self.settings.revision,
            target_language: config.target_language.as_str(),
            prompt: build_prompt(chunk, &config.target_language),
            source: &chunk.source_text,
            context: chunk.leading_context.as_deref(),
            nesting_depth: chunk.nesting_depth,
        };

        let mut request = self.client.post(self.endpoint.clone()).timeout(timeout).json(&body);
        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                format!("remote model timed out after {:.1}s", timeout.as_secs_f64())
            } else if e.is_connect() {
                format!("network error: {}", e)
            } else {
                format!("request failed: {}", e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, error_text.trim()));
        }

        response
            .json::<RemoteTranslateResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("remote model timed out after {:.1}s", timeout.as_secs_f64())
                } else {
                    format!("invalid response: {}", e)
                }
            })
    }
}

#[async_trait]
impl ModelBackendPort for RemoteModelBackend {
    fn kind(&self) -> ModelBackendKind {
        ModelBackendKind::Remote
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: false,
            max_context_tokens: self.settings.max_context_tokens,
            supported_languages: self.settings.supported_languages.clone(),
        }
    }

    async fn translate(&self, chunk: &Chunk, config: &TranslateConfig) -> TranslationResult {
        let started = Instant::now();
        let metadata = self.metadata();

        if !self.capabilities().supports_language(&config.target_language) {
            return TranslationResult::failure(
                format!(
                    "remote model {} does not support target language '{}'",
                    self.settings.model_name,
                    config.target_language.as_str()
                ),
                metadata,
            );
        }

        let timeout = self.effective_timeout(config.timeout);
        tracing::debug!(
            endpoint = %self.endpoint,
            chunk_index = chunk.index,
            attempt = config.attempt,
            timeout_ms = timeout.as_millis() as u64,
            "Sending remote translate request"
        );

        let response = match self.call(chunk, config, timeout).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(chunk_index = chunk.index, error = %error, "Remote translate failed");
                return TranslationResult::failure(error, metadata.with_latency_ms(
                    started.elapsed().as_millis() as u64,
                ));
            }
        };

        let code = extract_code(&response.code);
        if code.trim().is_empty() && !chunk.is_blank() {
            return TranslationResult::failure("remote model returned empty code", metadata);
        }

        let confidence = response
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(self.settings.default_confidence);
        let latency_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            chunk_index = chunk.index,
            code_len = code.len(),
            confidence,
            latency_ms,
            "Remote translate completed"
        );

        TranslationResult::success(code, confidence, metadata)
            .with_warnings(response.warnings)
            .with_latency_ms(latency_ms)
    }

    async fn preflight(&self) -> Result<(), BackendError> {
        // 地址在构造时已校验，这里不发起网络请求
        if self.settings.model_name.trim().is_empty() {
            return Err(BackendError::Configuration(
                "remote model name is empty".to_string(),
            ));
        }
        Ok(())
    }
}
