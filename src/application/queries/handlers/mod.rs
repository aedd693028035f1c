//! Query Handlers 实现

mod translation_handlers;

pub use translation_handlers::*;
