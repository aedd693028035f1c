//! 应用层 - 查询（读操作）
//!
//! CQRS 查询侧：翻译请求状态与执行池状态

mod translation_queries;

pub mod handlers;

pub use translation_queries::*;
