//! HTTP Middleware
//!
//! HTTP 状态码错误日志与慢请求日志

use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};

/// 超过该耗时的请求记录 warn（同步翻译可能较慢，阈值放宽）
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(30);

/// HTTP 状态码错误日志中间件
///
/// 业务错误（errno != 0）在 ApiError::into_response() 中记录，这里只看 HTTP 状态码。
pub async fn error_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            elapsed_ms,
            "HTTP server error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            elapsed_ms,
            "HTTP client error"
        );
    } else if started.elapsed() >= SLOW_REQUEST_THRESHOLD {
        tracing::warn!(method = %method, uri = %uri, elapsed_ms, "Slow HTTP request");
    }

    response
}
