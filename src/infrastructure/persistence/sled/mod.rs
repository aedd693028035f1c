//! Sled 存储

mod translation_cache;

pub use translation_cache::{SledCacheConfig, SledTranslationCache};
