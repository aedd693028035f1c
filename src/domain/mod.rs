//! Domain Layer - 领域层
//!
//! - Translation Context: 翻译请求、分块、结果与聚合
//! - Parser: 结构块识别与生成代码校验
//! - Chunker: 按结构边界切分源文本
//! - Prompt: 模型提示词

pub mod chunker;
pub mod parser;
pub mod prompt;
pub mod translation;

pub use chunker::{chunk_source, plan_chunks, ChunkConfig, ChunkPlan};
