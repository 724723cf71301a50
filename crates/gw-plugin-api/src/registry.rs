//! Plugin registry (spec C2): explicit compile-time registration, no
//! dynamic loading — matching spec §9's note that adapters/sinks are
//! linked into the gateway binary, not loaded from `.so`/`.dll` files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use orion_error::StructError;

use crate::adapter::{AdapterFactory, AdapterHandle};
use crate::error::{PluginError, PluginReason, PluginResult};
use crate::sink::{SinkFactory, SinkHandle};
use crate::types::ParamMap;
use crate::{AdapterBuildCtx, SinkBuildCtx};

#[derive(Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<&'static str, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub async fn build(
        &self,
        kind: &str,
        instance_id: &str,
        work_root: &Path,
        params: ParamMap,
    ) -> PluginResult<Box<dyn AdapterHandle>> {
        let factory = self.factories.get(kind).ok_or_else(|| unknown_kind("adapter", kind))?;
        factory.validate_params(&params)?;
        let ctx = AdapterBuildCtx { instance_id: instance_id.to_string(), work_root: work_root.to_path_buf(), params };
        factory.build(&ctx).await
    }
}

#[derive(Default)]
pub struct SinkRegistry {
    factories: BTreeMap<&'static str, Arc<dyn SinkFactory>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn SinkFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub async fn build(&self, kind: &str, instance_id: &str, work_root: &Path, params: ParamMap) -> PluginResult<SinkHandle> {
        let factory = self.factories.get(kind).ok_or_else(|| unknown_kind("sink", kind))?;
        factory.validate_params(&params)?;
        let ctx = SinkBuildCtx { instance_id: instance_id.to_string(), work_root: work_root.to_path_buf(), params };
        factory.build(&ctx).await
    }
}

fn unknown_kind(scope: &str, kind: &str) -> PluginError {
    StructError::from(PluginReason::Build(format!("no {scope} factory registered for kind {kind:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthStatus;
    use async_trait::async_trait;
    use gw_core::Point;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct MockAdapter;

    #[async_trait]
    impl AdapterHandle for MockAdapter {
        async fn run(&mut self, _tx: mpsc::Sender<Point>, _cancel: CancellationToken) -> PluginResult<()> {
            Ok(())
        }
        fn health(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
    }

    struct MockAdapterFactory;

    #[async_trait]
    impl AdapterFactory for MockAdapterFactory {
        fn kind(&self) -> &'static str {
            "mock"
        }
        fn adapter_def(&self) -> crate::adapter::AdapterDef {
            crate::adapter::AdapterDef { id: "mock".into(), kind: "mock".into(), default_params: ParamMap::new() }
        }
        fn validate_params(&self, _params: &ParamMap) -> PluginResult<()> {
            Ok(())
        }
        async fn build(&self, _ctx: &AdapterBuildCtx) -> PluginResult<Box<dyn AdapterHandle>> {
            Ok(Box::new(MockAdapter))
        }
    }

    #[tokio::test]
    async fn builds_registered_adapter_kind() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapterFactory));
        let handle = registry.build("mock", "a1", Path::new("/tmp"), ParamMap::new()).await;
        assert!(handle.is_ok());
    }

    #[tokio::test]
    async fn unknown_kind_errors() {
        let registry = AdapterRegistry::new();
        let result = registry.build("nonexistent", "a1", Path::new("/tmp"), ParamMap::new()).await;
        assert!(result.is_err());
    }
}
