//! Command Handlers 实现

mod translate_handlers;

pub use translate_handlers::*;
