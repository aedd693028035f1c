//! Translation Metrics - 运行期计时与计数
//!
//! 按事件名聚合：次数、耗时（总计/最小/最大/直方图）与自定义计数器。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// 耗时直方图的桶上界（毫秒），超出的计入 `inf`
const BUCKET_EDGES_MS: &[f64] = &[
    0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0,
];

fn bucket_label(duration_ms: f64) -> String {
    BUCKET_EDGES_MS
        .iter()
        .find(|edge| duration_ms <= **edge)
        .map(|edge| edge.to_string())
        .unwrap_or_else(|| "inf".to_string())
}

/// 单个事件名的聚合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub buckets: BTreeMap<String, u64>,
    pub counters: BTreeMap<String, u64>,
}

impl EventStats {
    pub fn mean_ms(&self) -> Option<f64> {
        if self.buckets.is_empty() {
            return None;
        }
        let timed: u64 = self.buckets.values().sum();
        Some(self.total_ms / timed as f64)
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// 聚合快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub events: BTreeMap<String, EventStats>,
}

impl MetricsSnapshot {
    pub fn event(&self, name: &str) -> Option<&EventStats> {
        self.events.get(name)
    }
}

/// 运行期指标
pub struct TranslationMetrics {
    started_at: DateTime<Utc>,
    events: DashMap<String, EventStats>,
}

impl TranslationMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            events: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 记录一次事件
    pub fn record(&self, name: &str, duration: Option<Duration>, counters: &[(&str, u64)]) {
        let mut stats = self.events.entry(name.to_string()).or_default();
        stats.count += 1;

        if let Some(duration) = duration {
            let ms = duration.as_secs_f64() * 1000.0;
            stats.total_ms += ms;
            stats.min_ms = Some(stats.min_ms.map_or(ms, |min| min.min(ms)));
            stats.max_ms = Some(stats.max_ms.map_or(ms, |max| max.max(ms)));
            *stats.buckets.entry(bucket_label(ms)).or_insert(0) += 1;
        }

        for (key, value) in counters {
            *stats.counters.entry((*key).to_string()).or_insert(0) += value;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pid: std::process::id(),
            started_at: self.started_at,
            events: self
                .events
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

impl Default for TranslationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
