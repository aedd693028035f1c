//! Fake Model Backend - 用于测试的模型后端
//!
//! 把每一行源文本转成目标语言的注释，可按分块注入失败、延迟、挂起与崩溃。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::application::ports::{ModelBackendPort, ModelCapabilities, TranslateConfig};
use crate::domain::translation::{
    Chunk, ModelBackendKind, ResultMetadata, TargetLanguage, TranslationResult,
};

/// Fake 后端
#[derive(Debug, Default)]
pub struct FakeModelBackend {
    confidence: Option<f64>,
    delay: Option<Duration>,
    /// 每个分块输出前附加的行
    preamble: Option<String>,
    /// 分块 -> 前 N 次调用失败
    fail_first: HashMap<usize, usize>,
    always_fail: HashSet<usize>,
    hang: HashSet<usize>,
    panic: HashSet<usize>,
    calls: DashMap<usize, usize>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeModelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_preamble(mut self, line: impl Into<String>) -> Self {
        self.preamble = Some(line.into());
        self
    }

    /// 指定分块的前 `times` 次调用失败
    pub fn fail_chunk(mut self, index: usize, times: usize) -> Self {
        self.fail_first.insert(index, times);
        self
    }

    pub fn always_fail(mut self, index: usize) -> Self {
        self.always_fail.insert(index);
        self
    }

    /// 指定分块永远不返回
    pub fn hang_chunk(mut self, index: usize) -> Self {
        self.hang.insert(index);
        self
    }

    /// 指定分块在执行时 panic，模拟 worker 崩溃
    pub fn panic_chunk(mut self, index: usize) -> Self {
        self.panic.insert(index);
        self
    }

    pub fn calls(&self, index: usize) -> usize {
        self.calls.get(&index).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// 同时执行中的调用数峰值
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 与 `translate` 产出相同的代码，供断言使用
    pub fn expected_code(source: &str, language: &TargetLanguage) -> String {
        source
            .lines()
            .map(|line| {
                if line.trim().is_empty() {
                    String::new()
                } else {
                    format!("{} {}\n", language.comment_prefix(), line.trim())
                }
            })
            .collect()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelBackendPort for FakeModelBackend {
    fn kind(&self) -> ModelBackendKind {
        ModelBackendKind::Local
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: false,
            max_context_tokens: usize::MAX,
            supported_languages: Vec::new(),
        }
    }

    async fn translate(&self, chunk: &Chunk, config: &TranslateConfig) -> TranslationResult {
        let call = {
            let mut entry = self.calls.entry(chunk.index).or_insert(0);
            *entry += 1;
            *entry
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        tracing::debug!(
            chunk_index = chunk.index,
            call,
            attempt = config.attempt,
            "FakeModelBackend: translating"
        );

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hang.contains(&chunk.index) {
            std::future::pending::<()>().await;
        }
        if self.panic.contains(&chunk.index) {
            panic!("fake backend crashed on chunk {}", chunk.index);
        }

        let metadata = ResultMetadata::new("fake", "v1", ModelBackendKind::Local);
        let fail_limit = self.fail_first.get(&chunk.index).copied().unwrap_or(0);
        if self.always_fail.contains(&chunk.index) || call <= fail_limit {
            return TranslationResult::failure(
                format!("injected failure on chunk {} (call {})", chunk.index, call),
                metadata,
            );
        }

        let mut code = Self::expected_code(&chunk.source_text, &config.target_language);
        if let Some(preamble) = &self.preamble {
            code = format!("{}\n{}", preamble, code);
        }
        TranslationResult::success(code, self.confidence.unwrap_or(0.9), metadata)
    }
}
