//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（ModelBackend、ExecutionPool、TranslationCache 等）
//! - orchestrator: 翻译编排器
//! - metrics: 运行期计时与计数
//! - commands: CQRS 命令及处理器
//! - queries: CQRS 查询及处理器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod ports;
pub mod queries;

// Re-exports
pub use commands::{
    CancelTranslationCommand,
    CancelTranslationResponse,
    SubmitTranslationAsyncCommand,
    SubmitTranslationAsyncResponse,
    SubmitTranslationCommand,
    SubmitTranslationResponse,
    // Handlers
    handlers::{CancelTranslationHandler, SubmitTranslationAsyncHandler, SubmitTranslationHandler},
};

pub use error::ApplicationError;

pub use metrics::{EventStats, MetricsSnapshot, TranslationMetrics};

pub use orchestrator::{
    retry_delay, TranslationHandle, TranslationProgress, TranslatorOrchestrator, MAX_RETRY_BACKOFF,
};

pub use ports::{
    // Translation cache
    generate_cache_key,
    CacheError,
    CacheStats,
    TranslationCachePort,
    // Model backend
    BackendError,
    BackendFactoryPort,
    BackendProfiles,
    BackendSpec,
    LocalModelSettings,
    ModelBackendPort,
    ModelCapabilities,
    RemoteModelSettings,
    TranslateConfig,
    // Execution pool
    ExecutionPoolPort,
    PoolError,
    PoolStatus,
    TaskHandle,
    TaskId,
    TaskLifecycle,
    TaskState,
    WorkerOutcome,
    WorkerSlotStatus,
    WorkerTask,
    // Events
    NoopEventSink,
    TranslationEvent,
    TranslationEventSink,
    // Tracker
    RequestState,
    TrackedTranslation,
    TrackerError,
    TranslationTrackerPort,
};

pub use queries::{
    GetMetrics,
    GetPoolStatus,
    GetTranslationStatus,
    ListActiveTranslations,
    // Handlers
    handlers::{
        GetMetricsHandler, GetPoolStatusHandler, GetTranslationStatusHandler,
        ListActiveTranslationsHandler, MetricsResponse, TranslationStatusResponse,
    },
};
