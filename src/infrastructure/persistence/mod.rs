//! Persistence Layer - 数据持久化
//!
//! Sled 翻译结果缓存

pub mod sled;

pub use self::sled::{SledCacheConfig, SledTranslationCache};
