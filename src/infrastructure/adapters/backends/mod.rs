//! Model Backends - 模型后端实现

mod fake_backend;
mod local_model;
mod registry;
mod remote_model;
pub mod rule_engine;

pub use fake_backend::FakeModelBackend;
pub use local_model::{is_unpinned_revision, load_manifest, manifest_path, LocalModelBackend, ModelManifest};
pub use registry::{BackendCache, BackendRegistry};
pub use remote_model::RemoteModelBackend;
