//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现

pub mod adapters;
pub mod events;
pub mod http;
pub mod memory;
pub mod persistence;
pub mod pool;

pub use events::EventPublisher;
pub use memory::InMemoryTranslationTracker;
pub use persistence::sled::SledTranslationCache;
pub use pool::{ExecutionPool, ExecutionPoolConfig, ProcessWorkerConfig, ProcessWorkerLauncher};
