//! Backend Registry - 后端注册表
//!
//! 按后端类型登记构造函数；`BackendCache` 在同一进程内按描述复用实例，
//! 保证本地模型在每个 worker 里只加载一次。

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::local_model::LocalModelBackend;
use super::remote_model::RemoteModelBackend;
use crate::application::ports::{BackendError, BackendFactoryPort, BackendSpec, ModelBackendPort};
use crate::domain::translation::ModelBackendKind;

type Constructor =
    Box<dyn Fn(&BackendSpec) -> Result<Arc<dyn ModelBackendPort>, BackendError> + Send + Sync>;

/// 后端注册表
pub struct BackendRegistry {
    constructors: HashMap<ModelBackendKind, Constructor>,
}

impl BackendRegistry {
    /// 空注册表
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// 注册本地与远程两种后端
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ModelBackendKind::Local, |spec| match spec {
            BackendSpec::Local(settings) => {
                Ok(Arc::new(LocalModelBackend::new(settings.clone())) as Arc<dyn ModelBackendPort>)
            }
            other => Err(mismatch(ModelBackendKind::Local, other)),
        });
        registry.register(ModelBackendKind::Remote, |spec| match spec {
            BackendSpec::Remote(settings) => Ok(Arc::new(RemoteModelBackend::new(settings.clone())?)
                as Arc<dyn ModelBackendPort>),
            other => Err(mismatch(ModelBackendKind::Remote, other)),
        });
        registry
    }

    pub fn register<F>(&mut self, kind: ModelBackendKind, constructor: F)
    where
        F: Fn(&BackendSpec) -> Result<Arc<dyn ModelBackendPort>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn mismatch(expected: ModelBackendKind, spec: &BackendSpec) -> BackendError {
    BackendError::Configuration(format!(
        "constructor for '{}' received a '{}' spec",
        expected,
        spec.kind()
    ))
}

impl BackendFactoryPort for BackendRegistry {
    fn create(&self, spec: &BackendSpec) -> Result<Arc<dyn ModelBackendPort>, BackendError> {
        let kind = spec.kind();
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or(BackendError::Unregistered(kind))?;
        constructor(spec)
    }
}

/// 按 `BackendSpec::identity` 缓存后端实例
pub struct BackendCache {
    factory: Arc<dyn BackendFactoryPort>,
    backends: DashMap<String, Arc<dyn ModelBackendPort>>,
}

impl BackendCache {
    pub fn new(factory: Arc<dyn BackendFactoryPort>) -> Self {
        Self {
            factory,
            backends: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl BackendFactoryPort for BackendCache {
    fn create(&self, spec: &BackendSpec) -> Result<Arc<dyn ModelBackendPort>, BackendError> {
        let identity = spec.identity();
        if let Some(backend) = self.backends.get(&identity) {
            return Ok(backend.clone());
        }
        let backend = self.factory.create(spec)?;
        let backend = self.backends.entry(identity).or_insert(backend).clone();
        Ok(backend)
    }
}
