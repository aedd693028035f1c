//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod execution_pool;
mod model_backend;
mod translation_cache;
mod translation_events;
mod translation_tracker;

pub use execution_pool::{
    ExecutionPoolPort, InvalidTransition, PoolError, PoolStatus, TaskHandle, TaskId,
    TaskLifecycle, TaskState, WorkerOutcome, WorkerSlotStatus, WorkerTask, COLLECT_GRACE,
};
pub use model_backend::{
    BackendError, BackendFactoryPort, BackendProfiles, BackendSpec, LocalModelSettings,
    ModelBackendPort, ModelCapabilities, RemoteModelSettings, TranslateConfig,
};
pub use translation_cache::{generate_cache_key, CacheError, CacheStats, TranslationCachePort};
pub use translation_events::{NoopEventSink, TranslationEvent, TranslationEventSink};
pub use translation_tracker::{
    RequestState, TrackedTranslation, TrackerError, TranslationTrackerPort,
};
