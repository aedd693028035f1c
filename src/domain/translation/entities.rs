//! Translation Context - Entities

use serde::{Deserialize, Serialize};

use super::{ModelBackendKind, RequestId, TargetLanguage, TranslationError, TranslationOptions};

/// 翻译请求
///
/// 构造时完成校验，之后不可变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    request_id: RequestId,
    source_text: String,
    target_language: TargetLanguage,
    options: TranslationOptions,
}

impl TranslationRequest {
    pub fn new(
        source_text: impl Into<String>,
        target_language: &str,
        options: TranslationOptions,
    ) -> Result<Self, TranslationError> {
        let target_language = TargetLanguage::new(target_language)
            .map_err(|e| TranslationError::InvalidRequest(e.to_string()))?;
        options.validate().map_err(TranslationError::InvalidRequest)?;

        Ok(Self {
            request_id: RequestId::new(),
            source_text: source_text.into(),
            target_language,
            options,
        })
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn target_language(&self) -> &TargetLanguage {
        &self.target_language
    }

    pub fn options(&self) -> &TranslationOptions {
        &self.options
    }
}

/// 分块边界类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// 由完整结构块（或块间的松散语句）组成
    WholeBlock,
    /// 超长结构块被拆开后的一部分
    PartialBlock,
    /// 没有可识别结构时按行切出的片段
    LeftoverFragment,
}

impl BoundaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryKind::WholeBlock => "whole_block",
            BoundaryKind::PartialBlock => "partial_block",
            BoundaryKind::LeftoverFragment => "leftover_fragment",
        }
    }
}

/// 源文本分块
///
/// 行号从 1 开始，闭区间。`source_text` 只包含本块负责的源文本，
/// 前导上下文单独保存，拼接所有块的 `source_text` 即可还原输入。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub source_text: String,
    pub kind: BoundaryKind,
    pub start_line: usize,
    pub end_line: usize,
    /// 来自前一块末尾的上下文行
    #[serde(default)]
    pub leading_context: Option<String>,
    /// 首行所处的结构嵌套深度
    #[serde(default)]
    pub nesting_depth: usize,
    /// 最后一个结构块是否在下一个分块中继续
    #[serde(default)]
    pub continues: bool,
}

impl Chunk {
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }

    pub fn char_len(&self) -> usize {
        self.source_text.chars().count()
    }

    /// 分块是否只包含空白
    pub fn is_blank(&self) -> bool {
        self.source_text.trim().is_empty()
    }
}

/// 结果元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub model_name: String,
    pub model_revision: String,
    pub backend: ModelBackendKind,
    pub latency_ms: u64,
    /// 生成过程被截断等情况下的尽力结果
    #[serde(default)]
    pub best_effort: bool,
    /// 执行该结果的 worker 进程 id
    #[serde(default)]
    pub worker_pid: Option<u32>,
}

impl ResultMetadata {
    pub fn new(model_name: impl Into<String>, model_revision: impl Into<String>, backend: ModelBackendKind) -> Self {
        Self {
            model_name: model_name.into(),
            model_revision: model_revision.into(),
            backend,
            latency_ms: 0,
            best_effort: false,
            worker_pid: None,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// 单个分块的翻译结果
///
/// 字段私有，只能通过 [`TranslationResult::success`] 与
/// [`TranslationResult::failure`] 构造：成功时 `code` 必然存在，
/// 失败时 `errors` 至少一条且 `confidence` 为 0。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    success: bool,
    code: Option<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
    confidence: f64,
    metadata: ResultMetadata,
}

impl TranslationResult {
    pub fn success(code: impl Into<String>, confidence: f64, metadata: ResultMetadata) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            success: true,
            code: Some(code.into()),
            errors: Vec::new(),
            warnings: Vec::new(),
            confidence,
            metadata,
        }
    }

    pub fn failure(error: impl Into<String>, metadata: ResultMetadata) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown backend failure".to_string();
        }
        Self {
            success: false,
            code: None,
            errors: vec![error],
            warnings: Vec::new(),
            confidence: 0.0,
            metadata,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// 追加错误（只对失败结果生效）
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        if !self.success {
            self.errors.push(error.into());
        }
        self
    }

    pub fn mark_best_effort(mut self) -> Self {
        self.metadata.best_effort = true;
        self
    }

    pub fn with_worker_pid(mut self, pid: Option<u32>) -> Self {
        self.metadata.worker_pid = pid;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.metadata.latency_ms = latency_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    /// 错误信息合并为一行
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}
