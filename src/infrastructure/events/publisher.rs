//! Event Publisher Implementation
//!
//! 翻译进度事件推送：按请求分发，同时广播到全局通道

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::application::ports::{TranslationEvent, TranslationEventSink};

const CHANNEL_CAPACITY: usize = 100;

/// 事件发布器
pub struct EventPublisher {
    /// request_id -> broadcast sender
    request_channels: DashMap<String, broadcast::Sender<TranslationEvent>>,
    /// 所有请求的事件
    global_channel: broadcast::Sender<TranslationEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            request_channels: DashMap::new(),
            global_channel: global_tx,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅全局事件
    pub fn subscribe_global(&self) -> broadcast::Receiver<TranslationEvent> {
        self.global_channel.subscribe()
    }

    /// 订阅指定请求的事件
    ///
    /// 请求开始前也可以订阅；请求结束后通道关闭。
    pub fn subscribe(&self, request_id: &str) -> broadcast::Receiver<TranslationEvent> {
        self.request_channels
            .entry(request_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 取消注册请求
    pub fn unregister(&self, request_id: &str) {
        self.request_channels.remove(request_id);
    }

    pub fn active_channels(&self) -> usize {
        self.request_channels.len()
    }

    fn publish_to_request(&self, request_id: &str, event: TranslationEvent) {
        if let Some(sender) = self.request_channels.get(request_id) {
            if let Err(e) = sender.send(event) {
                tracing::debug!(
                    request_id = %request_id,
                    error = %e,
                    "Failed to publish event (no receivers)"
                );
            }
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationEventSink for EventPublisher {
    fn publish(&self, event: TranslationEvent) {
        let request_id = event.request_id().to_string();
        let terminal = event.is_terminal();

        if self.global_channel.send(event.clone()).is_err() {
            tracing::trace!(request_id = %request_id, "No global event receivers");
        }
        self.publish_to_request(&request_id, event);

        if terminal {
            // 释放发送端，订阅者在读完缓冲后收到 Closed
            self.unregister(&request_id);
        }
    }
}
