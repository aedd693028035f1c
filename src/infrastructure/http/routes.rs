//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping                      GET   健康检查
//! - /api/translate                 POST  同步翻译，返回聚合结果
//! - /api/translate/submit          POST  异步提交，返回 request_id
//! - /api/translate/status          POST  查询请求状态（结束后携带结果）
//! - /api/translate/cancel          POST  取消请求
//! - /api/translate/active          GET   列出未结束的请求
//! - /api/pool/status               GET   执行池 worker 快照
//! - /api/pool/metrics              GET   分块耗时、重试与 worker 重启统计
//! - /ws/translation/{request_id}   WS    请求进度事件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route(
            "/ws/translation/:request_id",
            get(handlers::translation_websocket_handler),
        )
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/translate", translate_routes())
        .nest("/pool", pool_routes())
}

/// Translate 路由
fn translate_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::translate))
        .route("/submit", post(handlers::submit_translation))
        .route("/status", post(handlers::translation_status))
        .route("/cancel", post(handlers::cancel_translation))
        .route("/active", get(handlers::list_active_translations))
}

/// Pool 路由
fn pool_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::pool_status))
        .route("/metrics", get(handlers::pool_metrics))
}
