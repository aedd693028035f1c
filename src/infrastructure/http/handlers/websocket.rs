//! WebSocket Handler - 翻译进度推送

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::domain::translation::RequestId;
use crate::infrastructure::http::state::AppState;

/// 轮询 tracker 的间隔，用于发现订阅前已结束的请求
const FINISHED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 请求进度 WebSocket
pub async fn translation_websocket_handler(
    ws: WebSocketUpgrade,
    Path(request_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_translation_socket(socket, request_id, state))
}

fn is_finished(state: &AppState, request_id: &RequestId) -> bool {
    state
        .tracker
        .get(request_id)
        .map(|t| t.state.is_finished())
        .unwrap_or(true)
}

async fn handle_translation_socket(socket: WebSocket, request_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // 只接受已登记的异步请求
    let parsed = match RequestId::parse(&request_id) {
        Some(id) if state.tracker.get(&id).is_some() => id,
        _ => {
            tracing::warn!(request_id = %request_id, "WebSocket connection rejected: unknown request");
            let _ = sender.close().await;
            return;
        }
    };

    let mut event_rx = state.event_publisher.subscribe(&request_id);
    tracing::info!(request_id = %request_id, "WebSocket connected");

    let request_id_for_forward = request_id.clone();
    let state_for_forward = state.clone();

    // 事件转发任务，终止事件之后通道关闭
    let forward_task = tokio::spawn(async move {
        let mut poll = tokio::time::interval(FINISHED_POLL_INTERVAL);
        loop {
            tokio::select! {
                received = event_rx.recv() => match received {
                    Ok(event) => {
                        let msg = match serde_json::to_string(&event) {
                            Ok(json) => Message::Text(json),
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        };
                        if let Err(e) = sender.send(msg).await {
                            tracing::debug!(
                                request_id = %request_id_for_forward,
                                error = %e,
                                "Failed to send WebSocket message"
                            );
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            request_id = %request_id_for_forward,
                            skipped,
                            "WebSocket subscriber lagged"
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = poll.tick() => {
                    if is_finished(&state_for_forward, &parsed) {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    let request_id_for_receive = request_id.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    tracing::info!(request_id = %request_id_for_receive, "WebSocket closed by client");
                    break;
                }
                Err(e) => {
                    tracing::debug!(request_id = %request_id_for_receive, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = forward_task => {}
        _ = receive_task => {}
    }

    // 请求仍在运行时保留通道，由终止事件负责清理
    if is_finished(&state, &parsed) {
        state.event_publisher.unregister(&request_id);
    }
    tracing::info!(request_id = %request_id, "WebSocket disconnected");
}
