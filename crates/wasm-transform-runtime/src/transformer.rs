//! The transformer abstraction consumed by the replication pipeline.

use async_trait::async_trait;

use wasm_transform_common::TransformError;

use crate::runtime::TransformRuntime;

/// Something that can rewrite records on their way to a destination.
#[async_trait]
pub trait DataTransformer: Send + Sync {
    /// Identifiers of the modules currently loaded.
    fn modules(&self) -> Vec<String>;

    /// Prepare the module at `module_id` for use.
    async fn initialize_module(&self, module_id: &str) -> Result<(), TransformError>;

    /// Transform one record destined for `table`.
    async fn execute_module(
        &self,
        module_id: &str,
        table: &str,
        record: &[u8],
    ) -> Result<Vec<u8>, TransformError>;

    /// Release all resources.
    async fn close(&self) -> Result<(), TransformError>;
}

#[async_trait]
impl DataTransformer for TransformRuntime {
    fn modules(&self) -> Vec<String> {
        TransformRuntime::modules(self)
    }

    async fn initialize_module(&self, module_id: &str) -> Result<(), TransformError> {
        TransformRuntime::initialize_module(self, module_id).await
    }

    async fn execute_module(
        &self,
        module_id: &str,
        table: &str,
        record: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        TransformRuntime::execute_module(self, module_id, table, record).await
    }

    async fn close(&self) -> Result<(), TransformError> {
        TransformRuntime::close(self).await
    }
}

/// Passes every record through unchanged.
///
/// Used when no transform modules are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransformer;

#[async_trait]
impl DataTransformer for NoopTransformer {
    fn modules(&self) -> Vec<String> {
        Vec::new()
    }

    async fn initialize_module(&self, _module_id: &str) -> Result<(), TransformError> {
        Ok(())
    }

    async fn execute_module(
        &self,
        _module_id: &str,
        _table: &str,
        record: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        Ok(record.to_vec())
    }

    async fn close(&self) -> Result<(), TransformError> {
        Ok(())
    }
}
