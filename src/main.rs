//! Quill - 伪代码翻译服务
//!
//! - Domain: parser/, chunker, translation/
//! - Application: orchestrator, commands, queries, ports
//! - Infrastructure: http, pool, adapters, memory, events, persistence

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quill::application::{
    ExecutionPoolPort, TranslationCachePort, TranslationEventSink, TranslationTrackerPort,
    TranslatorOrchestrator,
};
use quill::config::{load_config, print_config, AppConfig};
use quill::infrastructure::adapters::BackendRegistry;
use quill::infrastructure::events::EventPublisher;
use quill::infrastructure::http::{AppState, HttpServer, RequestDefaults, ServerConfig};
use quill::infrastructure::memory::InMemoryTranslationTracker;
use quill::infrastructure::persistence::SledTranslationCache;
use quill::infrastructure::pool::{
    ExecutionPool, ExecutionPoolConfig, ProcessWorkerConfig, ProcessWorkerLauncher,
};

const WORKER_BINARY: &str = "quill-worker";

/// 已结束请求在 tracker 中保留的时间
const FINISHED_RETENTION_SECS: i64 = 3600;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

fn init_tracing(config: &AppConfig) {
    let log_filter = format!(
        "{},quill={},tower_http=debug",
        config.log.level, config.log.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));

    if config.log.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// worker 可执行文件：配置优先，否则取当前可执行文件所在目录
fn worker_program(config: &AppConfig) -> anyhow::Result<PathBuf> {
    if let Some(program) = &config.pool.worker_program {
        return Ok(program.clone());
    }
    let current = std::env::current_exe()?;
    let dir = current
        .parent()
        .ok_or_else(|| anyhow::anyhow!("cannot locate directory of {}", current.display()))?;
    Ok(dir.join(format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX)))
}

async fn open_cache(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn TranslationCachePort>>> {
    if !config.cache.enabled {
        return Ok(None);
    }
    if let Some(parent) = config.cache.path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let cache: Arc<dyn TranslationCachePort> =
        SledTranslationCache::open(&config.cache.path, config.cache.max_entries)
            .map_err(|e| anyhow::anyhow!("Failed to open translation cache: {}", e))?
            .arc();
    Ok(Some(cache))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    init_tracing(&config);
    tracing::info!("Quill - pseudocode translation service");
    print_config(&config);

    // 后端注册表（进程内预检与 worker 进程共用同一套构造规则）
    let registry = BackendRegistry::with_defaults().arc();

    // 执行池
    let program = worker_program(&config)?;
    let launcher = ProcessWorkerLauncher::new(
        ProcessWorkerConfig::new(&program)
            .with_startup_timeout(config.pool.startup_timeout())
            .with_log_filter(format!("warn,quill={}", config.log.level)),
    )
    .arc();
    let pool_config = ExecutionPoolConfig {
        worker_count: config
            .pool
            .worker_count
            .unwrap_or(config.translator.worker_count),
        queue_capacity: config.pool.queue_capacity,
    };
    let pool: Arc<dyn ExecutionPoolPort> = ExecutionPool::start(pool_config, launcher)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start execution pool ({}): {}", program.display(), e))?
        .arc();

    let event_publisher = EventPublisher::new().arc();
    let tracker = InMemoryTranslationTracker::new().arc();
    let cache = open_cache(&config).await?;

    let orchestrator = TranslatorOrchestrator::new(
        pool.clone(),
        registry,
        config.backend_profiles(),
        event_publisher.clone() as Arc<dyn TranslationEventSink>,
    )
    .arc();

    // 默认后端必须可用，否则直接退出
    if let Err(e) = orchestrator
        .verify_backend(config.translator.model_backend, &config.translator.model_revision)
        .await
    {
        pool.shutdown().await;
        return Err(anyhow::anyhow!("Model backend check failed: {}", e));
    }

    // 定期清理已结束的请求记录
    let cleanup_tracker: Arc<dyn TranslationTrackerPort> = tracker.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::seconds(FINISHED_RETENTION_SECS);
            cleanup_tracker.cleanup_finished(cutoff);
        }
    });

    let state = AppState::new(
        orchestrator,
        tracker,
        event_publisher,
        cache,
        RequestDefaults {
            target_language: config.translator.target_language.clone(),
            options: config.translator.options(),
        },
    );
    let server = HttpServer::new(
        ServerConfig::new(&config.server.host, config.server.port),
        state,
    );

    // 启动服务器（带优雅关闭）
    server
        .run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;

    pool.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}
