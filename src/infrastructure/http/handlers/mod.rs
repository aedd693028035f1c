//! HTTP Handlers

mod ping;
mod pool;
mod translate;
mod websocket;

pub use ping::*;
pub use pool::*;
pub use translate::*;
pub use websocket::*;
