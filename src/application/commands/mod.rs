//! 应用层 - 命令（写操作）
//!
//! CQRS 命令侧：提交与取消翻译

mod translate_commands;

pub mod handlers;

pub use translate_commands::*;
