//! Local Model Backend - 本地模型包
//!
//! 模型包目录结构：`<models_dir>/<model_name>/<revision>/manifest.toml`。
//! 模型在第一次使用时加载，每个进程只加载一次；版本必须显式固定，
//! 找不到对应版本时直接失败，不会退回到其它版本。

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::rule_engine::{RuleEngine, RuleLanguage};
use crate::application::ports::{
    BackendError, LocalModelSettings, ModelBackendPort, ModelCapabilities, TranslateConfig,
};
use crate::domain::translation::{Chunk, ModelBackendKind, ResultMetadata, TranslationResult};

/// 视为未固定的版本名
const UNPINNED_REVISIONS: &[&str] = &["latest", "main", "head", "master"];

const MANIFEST_FILE: &str = "manifest.toml";

fn default_max_context_tokens() -> usize {
    4096
}

fn default_indent_width() -> usize {
    4
}

fn default_languages() -> Vec<String> {
    vec!["python".to_string(), "javascript".to_string()]
}

/// 模型包清单
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub revision: String,
    #[serde(default = "default_languages")]
    pub supported_languages: Vec<String>,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_indent_width")]
    pub indent_width: usize,
}

/// 已加载的模型
#[derive(Debug)]
struct LoadedModel {
    manifest: ModelManifest,
    path: PathBuf,
}

impl LoadedModel {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: false,
            max_context_tokens: self.manifest.max_context_tokens,
            supported_languages: self.manifest.supported_languages.clone(),
        }
    }
}

/// 版本是否未固定
pub fn is_unpinned_revision(revision: &str) -> bool {
    let revision = revision.trim();
    revision.is_empty()
        || UNPINNED_REVISIONS
            .iter()
            .any(|r| r.eq_ignore_ascii_case(revision))
}

fn is_safe_path_component(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\'])
}

/// 模型包清单路径
pub fn manifest_path(settings: &LocalModelSettings) -> PathBuf {
    settings
        .models_dir
        .join(&settings.model_name)
        .join(&settings.revision)
        .join(MANIFEST_FILE)
}

/// 解析并校验模型包清单
pub async fn load_manifest(settings: &LocalModelSettings) -> Result<ModelManifest, BackendError> {
    if is_unpinned_revision(&settings.revision) {
        return Err(BackendError::UnpinnedRevision(settings.revision.clone()));
    }
    if !is_safe_path_component(&settings.model_name) || !is_safe_path_component(&settings.revision)
    {
        return Err(BackendError::Configuration(format!(
            "invalid model reference {}@{}",
            settings.model_name, settings.revision
        )));
    }

    let path = manifest_path(settings);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackendError::ModelNotFound(format!(
                "{}@{} ({})",
                settings.model_name,
                settings.revision,
                path.display()
            )));
        }
        Err(e) => {
            return Err(BackendError::InvalidManifest(format!(
                "{}: {}",
                path.display(),
                e
            )));
        }
    };

    let manifest: ModelManifest = toml::from_str(&content)
        .map_err(|e| BackendError::InvalidManifest(format!("{}: {}", path.display(), e)))?;

    if manifest.name != settings.model_name {
        return Err(BackendError::InvalidManifest(format!(
            "manifest name '{}' does not match model '{}'",
            manifest.name, settings.model_name
        )));
    }
    if manifest.revision != settings.revision {
        return Err(BackendError::InvalidManifest(format!(
            "manifest revision '{}' does not match requested revision '{}'",
            manifest.revision, settings.revision
        )));
    }
    if manifest.indent_width == 0 || manifest.indent_width > 8 {
        return Err(BackendError::InvalidManifest(format!(
            "indent_width must be between 1 and 8, got {}",
            manifest.indent_width
        )));
    }
    if manifest.max_context_tokens == 0 {
        return Err(BackendError::InvalidManifest(
            "max_context_tokens must be positive".to_string(),
        ));
    }

    Ok(manifest)
}

/// 按空白切分估算 token 数
fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// 截断到 token 预算内，按整行截断
fn truncate_to_budget(source: &str, budget: usize) -> (String, bool) {
    if count_tokens(source) <= budget {
        return (source.to_string(), false);
    }
    let mut used = 0;
    let mut kept = String::new();
    for line in source.split_inclusive('\n') {
        let tokens = count_tokens(line);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        kept.push_str(line);
    }
    (kept, true)
}

/// 本地模型后端
pub struct LocalModelBackend {
    settings: LocalModelSettings,
    model: OnceLock<Arc<LoadedModel>>,
    load_guard: Mutex<()>,
    loads: AtomicUsize,
}

impl LocalModelBackend {
    pub fn new(settings: LocalModelSettings) -> Self {
        Self {
            settings,
            model: OnceLock::new(),
            load_guard: Mutex::new(()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn settings(&self) -> &LocalModelSettings {
        &self.settings
    }

    /// 实际从磁盘加载的次数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// 双重检查加载：快路径无锁，慢路径持锁后再检查一次
    async fn model(&self) -> Result<Arc<LoadedModel>, BackendError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let _guard = self.load_guard.lock().await;
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let manifest = load_manifest(&self.settings).await?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        let loaded = Arc::new(LoadedModel {
            path: manifest_path(&self.settings),
            manifest,
        });

        tracing::info!(
            model = %self.settings.model_name,
            revision = %self.settings.revision,
            path = %loaded.path.display(),
            "Local model loaded"
        );

        let _ = self.model.set(loaded.clone());
        Ok(loaded)
    }

    fn metadata(&self) -> ResultMetadata {
        ResultMetadata::new(
            &self.settings.model_name,
            &self.settings.revision,
            ModelBackendKind::Local,
        )
    }
}

#[async_trait]
impl ModelBackendPort for LocalModelBackend {
    fn kind(&self) -> ModelBackendKind {
        ModelBackendKind::Local
    }

    fn capabilities(&self) -> ModelCapabilities {
        match self.model.get() {
            Some(model) => model.capabilities(),
            None => ModelCapabilities {
                supports_streaming: false,
                max_context_tokens: default_max_context_tokens(),
                supported_languages: default_languages(),
            },
        }
    }

    async fn translate(&self, chunk: &Chunk, config: &TranslateConfig) -> TranslationResult {
        let started = Instant::now();
        let metadata = self.metadata();

        let model = match self.model().await {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(
                    model = %self.settings.model_name,
                    revision = %self.settings.revision,
                    error = %e,
                    "Local model unavailable"
                );
                return TranslationResult::failure(
                    format!("local model unavailable: {}", e),
                    metadata,
                );
            }
        };

        let language = &config.target_language;
        let rule_language = RuleLanguage::from_name(language.as_str())
            .filter(|_| model.capabilities().supports_language(language));
        let Some(rule_language) = rule_language else {
            return TranslationResult::failure(
                format!(
                    "model {}@{} does not support target language '{}'",
                    model.manifest.name,
                    model.manifest.revision,
                    language.as_str()
                ),
                metadata,
            );
        };

        let context = chunk.leading_context.as_deref();
        let budget = model
            .manifest
            .max_context_tokens
            .saturating_sub(context.map(count_tokens).unwrap_or(0));
        let (source, truncated) = truncate_to_budget(&chunk.source_text, budget);

        let engine = RuleEngine::new(rule_language, model.manifest.indent_width);
        let generation = engine.generate(&source, context, chunk.nesting_depth, chunk.continues);

        let mut confidence = 0.5 + 0.5 * generation.coverage();
        if truncated {
            confidence /= 2.0;
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let mut result = TranslationResult::success(generation.code, confidence, metadata)
            .with_latency_ms(latency_ms);

        if !generation.unrecognized_lines.is_empty() {
            let lines: Vec<String> = generation
                .unrecognized_lines
                .iter()
                .map(|n| (chunk.start_line + n - 1).to_string())
                .collect();
            result = result.with_warning(format!(
                "line(s) {} not recognized, kept as comments",
                lines.join(", ")
            ));
        }
        if truncated {
            let kept = source.lines().count();
            result = result
                .with_warning(format!(
                    "input truncated to {} of {} line(s) to fit max_context_tokens ({})",
                    kept,
                    chunk.source_text.lines().count(),
                    model.manifest.max_context_tokens
                ))
                .mark_best_effort();
        }

        tracing::debug!(
            chunk_index = chunk.index,
            attempt = config.attempt,
            recognized = generation.recognized,
            total = generation.total,
            truncated,
            latency_ms,
            "Local model translated chunk"
        );

        result
    }

    async fn preflight(&self) -> Result<(), BackendError> {
        self.model().await.map(|_| ())
    }
}
