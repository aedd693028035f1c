//! Memory Layer - In-Memory State Management
//!
//! 实现 TranslationTracker，管理异步翻译请求的内存状态

mod translation_tracker;

pub use translation_tracker::InMemoryTranslationTracker;
