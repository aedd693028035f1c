//! Worker 进程通信协议
//!
//! stdin/stdout 上逐行传输 JSON：
//! - worker 启动后先发送 `ready`
//! - 父进程发送 `translate`，worker 回复同一 `task_id` 的 `result`
//! - 父进程发送 `shutdown` 或关闭 stdin 时 worker 退出

use serde::{Deserialize, Serialize};

use crate::application::ports::{BackendSpec, TaskId};
use crate::domain::translation::{Chunk, TargetLanguage, TranslationResult};

/// 父进程 -> worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Translate {
        task_id: TaskId,
        chunk: Chunk,
        spec: BackendSpec,
        target_language: TargetLanguage,
        attempt: u32,
        timeout_ms: u64,
    },
    Shutdown,
}

/// worker -> 父进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    Ready {
        pid: u32,
    },
    Result {
        task_id: TaskId,
        result: TranslationResult,
    },
    /// 请求无法处理（例如无法解析）
    Error {
        #[serde(default)]
        task_id: Option<TaskId>,
        message: String,
    },
}

/// 编码为一行（含换行符）
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::translation::{ModelBackendKind, ResultMetadata};

    #[test]
    fn test_reply_wire_format() {
        let line = encode_line(&WorkerReply::Ready { pid: 42 }).unwrap();
        assert_eq!(line, "{\"type\":\"ready\",\"pid\":42}\n");

        let result = TranslationResult::success(
            "print(1)\n",
            0.8,
            ResultMetadata::new("m", "v1", ModelBackendKind::Local),
        );
        let task_id = TaskId::new();
        let line = encode_line(&WorkerReply::Result {
            task_id,
            result: result.clone(),
        })
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let decoded: WorkerReply = decode_line(&line).unwrap();
        assert_eq!(decoded, WorkerReply::Result { task_id, result });
    }

    #[test]
    fn test_error_reply_without_task_id() {
        let decoded: WorkerReply =
            decode_line("{\"type\":\"error\",\"message\":\"bad request\"}").unwrap();
        assert_eq!(
            decoded,
            WorkerReply::Error {
                task_id: None,
                message: "bad request".to_string()
            }
        );
    }
}
