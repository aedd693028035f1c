//! Translation Queries

/// 查询单个翻译请求
#[derive(Debug, Clone)]
pub struct GetTranslationStatus {
    pub request_id: String,
}

/// 列出未结束的翻译请求
#[derive(Debug, Clone)]
pub struct ListActiveTranslations;

/// 查询执行池状态
#[derive(Debug, Clone)]
pub struct GetPoolStatus;

/// 查询运行期指标
#[derive(Debug, Clone)]
pub struct GetMetrics;
