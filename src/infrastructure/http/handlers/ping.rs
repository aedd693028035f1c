//! Ping Handler

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::infrastructure::http::state::AppState;

/// Ping 响应
#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub live_workers: usize,
}

/// Ping endpoint - 健康检查
///
/// 没有存活 worker 时返回 `degraded`。
pub async fn ping(State(state): State<Arc<AppState>>) -> Json<PingResponse> {
    let live_workers = state.orchestrator.pool().status().live_workers;
    Json(PingResponse {
        status: if live_workers > 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        live_workers,
    })
}
