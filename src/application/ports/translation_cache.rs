//! Translation Cache Port - 翻译结果缓存
//!
//! 定义翻译结果缓存的抽象接口，具体实现使用 Sled

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::translation::AggregatedTranslation;

/// Translation Cache 错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub max_entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Translation Cache Port
///
/// 只缓存成功的聚合结果，key 由源文本、目标语言与后端版本共同决定
#[async_trait]
pub trait TranslationCachePort: Send + Sync {
    /// 保存聚合结果（超过容量时淘汰最旧的条目）
    async fn save(&self, cache_key: &str, translation: &AggregatedTranslation) -> Result<(), CacheError>;

    /// 读取聚合结果
    async fn retrieve(&self, cache_key: &str) -> Result<Option<AggregatedTranslation>, CacheError>;

    /// 删除缓存条目
    async fn remove(&self, cache_key: &str) -> Result<(), CacheError>;

    /// 获取缓存统计信息
    async fn stats(&self) -> CacheStats;
}

/// 生成缓存 key
///
/// md5(source_text) + 目标语言 + 后端身份（类型、模型名与版本）+ 切分参数
///
/// 切分参数不同，分块边界和上下文就不同，结果不能共用。
pub fn generate_cache_key(
    source_text: &str,
    target_language: &str,
    backend: &str,
    model_name: &str,
    revision: &str,
    max_chunk_size: usize,
    overlap_lines: usize,
) -> String {
    let digest = md5::compute(source_text.as_bytes());
    format!(
        "{:x}:{}:{}:{}@{}:{}/{}",
        digest, target_language, backend, model_name, revision, max_chunk_size, overlap_lines
    )
}
