//! Translation Context - Value Objects

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 翻译请求唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 目标语言
///
/// 以小写名称规范化保存，常见别名（`py`、`js`、`ts`）在构造时展开。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetLanguage(String);

impl TargetLanguage {
    pub fn new(name: impl Into<String>) -> Result<Self, &'static str> {
        let name = name.into();
        let normalized = name.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err("目标语言不能为空");
        }
        if normalized.len() > 32 {
            return Err("目标语言名称不能超过32字符");
        }
        let canonical = match normalized.as_str() {
            "py" | "python3" => "python".to_string(),
            "js" | "node" => "javascript".to_string(),
            "ts" => "typescript".to_string(),
            "c++" => "cpp".to_string(),
            _ => normalized,
        };
        Ok(Self(canonical))
    }

    pub fn python() -> Self {
        Self("python".to_string())
    }

    pub fn javascript() -> Self {
        Self("javascript".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 是否以缩进表示块结构
    pub fn is_indentation_based(&self) -> bool {
        matches!(self.0.as_str(), "python" | "nim" | "yaml")
    }

    /// 行注释前缀
    pub fn comment_prefix(&self) -> &'static str {
        match self.0.as_str() {
            "python" | "ruby" | "shell" | "bash" | "nim" | "r" => "#",
            "sql" | "lua" | "haskell" => "--",
            _ => "//",
        }
    }

    /// 用于提示词的展示名
    pub fn display_name(&self) -> String {
        match self.0.as_str() {
            "javascript" => "JavaScript".to_string(),
            "typescript" => "TypeScript".to_string(),
            "cpp" => "C++".to_string(),
            other => {
                let mut chars = other.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 模型后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackendKind {
    /// 本地模型（进程内加载，固定版本）
    #[default]
    Local,
    /// 远程推理服务
    Remote,
}

impl ModelBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelBackendKind::Local => "local",
            ModelBackendKind::Remote => "remote",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ModelBackendKind::Local),
            "remote" => Some(ModelBackendKind::Remote),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 翻译选项
///
/// 所有字段均由调用方显式提供（或由配置层填充默认值），核心不读取环境。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationOptions {
    /// 单个分块的最大字符数（不含前导上下文）
    pub max_chunk_size: usize,
    /// 拆分块时携带的上下文行数
    pub overlap_lines: usize,
    /// 每个分块的最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    /// 单个请求同时在途的分块数
    pub worker_count: usize,
    /// 单个分块的执行超时（秒）
    pub timeout_seconds: f64,
    /// 模型后端
    pub model_backend: ModelBackendKind,
    /// 固定的模型版本
    pub model_revision: String,
    /// 重试退避基数（毫秒）
    pub retry_backoff_ms: u64,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            overlap_lines: 3,
            max_retries: 2,
            worker_count: 4,
            timeout_seconds: 60.0,
            model_backend: ModelBackendKind::Local,
            model_revision: "v1".to_string(),
            retry_backoff_ms: 250,
        }
    }
}

impl TranslationOptions {
    /// 校验选项，返回第一个问题的描述
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be greater than 0".to_string());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".to_string());
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(format!(
                "timeout_seconds must be a positive number, got {}",
                self.timeout_seconds
            ));
        }
        if self.model_revision.trim().is_empty() {
            return Err("model_revision must be pinned".to_string());
        }
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_language_aliases() {
        assert_eq!(TargetLanguage::new("Py").unwrap().as_str(), "python");
        assert_eq!(TargetLanguage::new(" js ").unwrap().as_str(), "javascript");
        assert_eq!(TargetLanguage::new("rust").unwrap().as_str(), "rust");
        assert!(TargetLanguage::new("   ").is_err());
    }

    #[test]
    fn test_target_language_traits() {
        assert!(TargetLanguage::python().is_indentation_based());
        assert!(!TargetLanguage::javascript().is_indentation_based());
        assert_eq!(TargetLanguage::python().comment_prefix(), "#");
        assert_eq!(TargetLanguage::javascript().comment_prefix(), "//");
        assert_eq!(TargetLanguage::javascript().display_name(), "JavaScript");
        assert_eq!(TargetLanguage::new("go").unwrap().display_name(), "Go");
    }

    #[test]
    fn test_backend_kind_roundtrip() {
        for kind in [ModelBackendKind::Local, ModelBackendKind::Remote] {
            assert_eq!(ModelBackendKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ModelBackendKind::from_str("cloud"), None);
    }

    #[test]
    fn test_options_validation() {
        assert!(TranslationOptions::default().validate().is_ok());

        let mut options = TranslationOptions::default();
        options.worker_count = 0;
        assert!(options.validate().is_err());

        let mut options = TranslationOptions::default();
        options.max_chunk_size = 0;
        assert!(options.validate().is_err());

        let mut options = TranslationOptions::default();
        options.timeout_seconds = 0.0;
        assert!(options.validate().is_err());

        let mut options = TranslationOptions::default();
        options.timeout_seconds = -1.5;
        assert!(options.validate().is_err());

        let mut options = TranslationOptions::default();
        options.model_revision = " ".to_string();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(RequestId::parse("not-a-uuid"), None);
    }
}
