//! Quill - 伪代码到目标语言代码的翻译管线
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - parser: 结构解析与校验
//! - chunker: 按结构边界流式分块
//! - translation: 请求、分块结果与聚合
//!
//! 应用层 (application/):
//! - Ports: 模型后端、执行池、缓存、跟踪器、事件
//! - Orchestrator: 分块提交、重试、重组
//! - Commands / Queries: CQRS 处理器
//!
//! 基础设施层 (infrastructure/):
//! - Adapters: 本地 / 远程模型后端
//! - Pool: worker 进程池
//! - HTTP: RESTful API + WebSocket
//! - Memory / Events / Persistence: 请求跟踪、进度推送、结果缓存

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
