//! Events - 翻译进度事件推送

mod publisher;

pub use publisher::EventPublisher;
