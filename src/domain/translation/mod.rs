//! Translation Context - 翻译上下文
//!
//! 请求、分块、单块结果与聚合结果。

mod aggregate;
mod entities;
mod errors;
mod imports;
mod value_objects;

pub use aggregate::{AggregatedTranslation, ChunkDiagnostic, ChunkFinal, ChunkReport, ChunkStatus};
pub use entities::{BoundaryKind, Chunk, ResultMetadata, TranslationRequest, TranslationResult};
pub use errors::TranslationError;
pub use imports::{is_leading_import, is_top_level_import};
pub use value_objects::{ModelBackendKind, RequestId, TargetLanguage, TranslationOptions};
