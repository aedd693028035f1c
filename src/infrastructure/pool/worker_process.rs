//! Worker 进程主循环
//!
//! 从输入逐行读取请求，调用后端翻译后写回结果。后端按描述缓存，
//! 同一 worker 内本地模型只加载一次。

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::launcher::WorkerFault;
use super::protocol::{decode_line, encode_line, WorkerReply, WorkerRequest};
use crate::application::ports::{BackendFactoryPort, TranslateConfig};
use crate::domain::translation::{ResultMetadata, TranslationResult};
use crate::infrastructure::adapters::backends::BackendCache;

async fn send<W: AsyncWrite + Unpin>(output: &mut W, reply: &WorkerReply) -> Result<(), WorkerFault> {
    let line = encode_line(reply).map_err(|e| WorkerFault::Protocol(e.to_string()))?;
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// 运行 worker 主循环，直到输入结束或收到 `shutdown`
pub async fn serve<R, W>(
    input: R,
    mut output: W,
    factory: Arc<dyn BackendFactoryPort>,
) -> Result<(), WorkerFault>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let pid = std::process::id();
    let backends = BackendCache::new(factory);
    send(&mut output, &WorkerReply::Ready { pid }).await?;
    tracing::info!(pid, "Worker ready");

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request = match decode_line::<WorkerRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid request line");
                send(
                    &mut output,
                    &WorkerReply::Error {
                        task_id: None,
                        message: format!("invalid request: {}", e),
                    },
                )
                .await?;
                continue;
            }
        };

        match request {
            WorkerRequest::Shutdown => {
                tracing::info!(pid, "Worker shutting down");
                break;
            }
            WorkerRequest::Translate {
                task_id,
                chunk,
                spec,
                target_language,
                attempt,
                timeout_ms,
            } => {
                tracing::debug!(
                    task_id = %task_id,
                    chunk_index = chunk.index,
                    attempt,
                    backend = %spec.kind(),
                    "Translating chunk"
                );

                let result = match backends.create(&spec) {
                    Ok(backend) => {
                        let config = TranslateConfig {
                            target_language,
                            timeout: Duration::from_millis(timeout_ms),
                            attempt,
                        };
                        backend.translate(&chunk, &config).await
                    }
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "Backend unavailable");
                        TranslationResult::failure(
                            format!("backend unavailable: {}", e),
                            ResultMetadata::new(spec.model_name(), spec.revision(), spec.kind()),
                        )
                    }
                };

                let reply = WorkerReply::Result {
                    task_id,
                    result: result.with_worker_pid(Some(pid)),
                };
                send(&mut output, &reply).await?;
            }
        }
    }

    Ok(())
}
