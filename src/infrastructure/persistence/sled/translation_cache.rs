//! Sled-based LRU Translation Cache Implementation

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::application::ports::{CacheError, CacheStats, TranslationCachePort};
use crate::domain::translation::AggregatedTranslation;

const ENTRY_PREFIX: &str = "cache:";

/// Sled 缓存配置
#[derive(Debug, Clone)]
pub struct SledCacheConfig {
    /// 数据库路径
    pub db_path: String,
    /// 最多保存的条目数
    pub max_entries: usize,
}

impl Default for SledCacheConfig {
    fn default() -> Self {
        Self {
            db_path: "data/translations.sled".to_string(),
            max_entries: 10_000,
        }
    }
}

/// 内部缓存条目
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InternalCacheEntry {
    translation: AggregatedTranslation,
    /// 访问序号，越大越新
    sequence: u64,
    last_accessed: i64,
    created_at: i64,
}

/// Sled 翻译缓存
pub struct SledTranslationCache {
    db: Db,
    max_entries: usize,
    entry_count: AtomicUsize,
    next_sequence: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

fn db_error(e: sled::Error) -> CacheError {
    CacheError::DatabaseError(e.to_string())
}

fn ser_error(e: bincode::Error) -> CacheError {
    CacheError::SerializationError(e.to_string())
}

impl SledTranslationCache {
    /// 创建新的缓存实例
    pub fn new(config: &SledCacheConfig) -> Result<Self, CacheError> {
        if config.max_entries == 0 {
            return Err(CacheError::IoError(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        let db = sled::open(&config.db_path).map_err(db_error)?;

        // 统计现有条目并恢复访问序号
        let mut entry_count = 0usize;
        let mut max_sequence = 0u64;
        for item in db.scan_prefix(ENTRY_PREFIX) {
            let (_, value) = item.map_err(db_error)?;
            if let Ok(entry) = bincode::deserialize::<InternalCacheEntry>(&value) {
                entry_count += 1;
                max_sequence = max_sequence.max(entry.sequence);
            }
        }

        tracing::info!(
            db_path = %config.db_path,
            max_entries = config.max_entries,
            entries = entry_count,
            "SledTranslationCache initialized"
        );

        Ok(Self {
            db,
            max_entries: config.max_entries,
            entry_count: AtomicUsize::new(entry_count),
            next_sequence: AtomicU64::new(max_sequence + 1),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    /// 打开现有缓存
    pub fn open<P: AsRef<Path>>(path: P, max_entries: usize) -> Result<Self, CacheError> {
        let config = SledCacheConfig {
            db_path: path.as_ref().to_string_lossy().to_string(),
            max_entries,
        };
        Self::new(&config)
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn entry_key(cache_key: &str) -> String {
        format!("{}{}", ENTRY_PREFIX, cache_key)
    }

    fn sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// LRU 淘汰
    fn evict_lru(&self) -> Result<(), CacheError> {
        let mut oldest: Option<(sled::IVec, u64)> = None;

        for item in self.db.scan_prefix(ENTRY_PREFIX) {
            let (key, value) = item.map_err(db_error)?;
            let sequence = match bincode::deserialize::<InternalCacheEntry>(&value) {
                Ok(entry) => entry.sequence,
                // 无法解析的条目优先淘汰
                Err(_) => 0,
            };
            let is_older = oldest
                .as_ref()
                .map(|(_, s)| sequence < *s)
                .unwrap_or(true);
            if is_older {
                oldest = Some((key, sequence));
            }
        }

        if let Some((key, sequence)) = oldest {
            if self.db.remove(&key).map_err(db_error)?.is_some() {
                self.entry_count.fetch_sub(1, Ordering::Relaxed);
            }
            tracing::debug!(
                key = %String::from_utf8_lossy(&key),
                sequence,
                "LRU evicted cache entry"
            );
        }

        Ok(())
    }

    /// 刷新数据库
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush().map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl TranslationCachePort for SledTranslationCache {
    async fn save(&self, cache_key: &str, translation: &AggregatedTranslation) -> Result<(), CacheError> {
        let key = Self::entry_key(cache_key);
        let now = Utc::now().timestamp_millis();
        let entry = InternalCacheEntry {
            translation: translation.clone(),
            sequence: self.sequence(),
            last_accessed: now,
            created_at: now,
        };
        let entry_bytes = bincode::serialize(&entry).map_err(ser_error)?;

        let replaced = self.db.insert(&key, entry_bytes).map_err(db_error)?;
        if replaced.is_none() {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }

        while self.entry_count.load(Ordering::Relaxed) > self.max_entries {
            self.evict_lru()?;
        }

        tracing::debug!(
            cache_key = %cache_key,
            chunks = translation.chunks.len(),
            "Translation cached"
        );

        Ok(())
    }

    async fn retrieve(&self, cache_key: &str) -> Result<Option<AggregatedTranslation>, CacheError> {
        let key = Self::entry_key(cache_key);

        match self.db.get(&key) {
            Ok(Some(data)) => {
                let mut entry: InternalCacheEntry = bincode::deserialize(&data).map_err(ser_error)?;

                // LRU touch
                entry.sequence = self.sequence();
                entry.last_accessed = Utc::now().timestamp_millis();
                let entry_bytes = bincode::serialize(&entry).map_err(ser_error)?;
                self.db.insert(&key, entry_bytes).map_err(db_error)?;

                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.translation))
            }
            Ok(None) => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn remove(&self, cache_key: &str) -> Result<(), CacheError> {
        let key = Self::entry_key(cache_key);
        if self.db.remove(&key).map_err(db_error)?.is_some() {
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entry_count.load(Ordering::Relaxed),
            max_entries: self.max_entries,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}
