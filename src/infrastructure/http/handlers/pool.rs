//! Execution Pool Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::application::{GetMetrics, GetPoolStatus, MetricsResponse, PoolStatus};
use crate::infrastructure::http::dto::ApiResponse;
use crate::infrastructure::http::state::AppState;

/// worker 槽位快照
pub async fn pool_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<PoolStatus>> {
    Json(ApiResponse::success(
        state.get_pool_status_handler.handle(GetPoolStatus),
    ))
}

/// 翻译耗时、重试与 worker 重启统计
pub async fn pool_metrics(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<MetricsResponse>> {
    Json(ApiResponse::success(
        state.get_metrics_handler.handle(GetMetrics),
    ))
}
