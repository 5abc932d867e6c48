//! The module store.
//!
//! This module provides [`TransformRuntime`], which owns the engine, the
//! linker with host functions, and every initialized module instance.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use wasm_transform_common::{RuntimeConfig, TransformError};
use wasm_transform_core::{
    CompiledModule, EngineSelection, EpochTicker, InstanceRunner, TransformDescriptor,
    TransformInstance, WasmEngine,
};
use wasm_transform_host::create_instance_runner;

use crate::dispatcher::{TransformReport, dispatch};

/// Loads transform modules and dispatches records to them.
///
/// Module identifiers are the paths the modules were loaded from. Each
/// instance sits behind its own async mutex, so calls into one module are
/// serialized while distinct modules proceed in parallel.
///
/// # Example
///
/// ```ignore
/// let runtime = TransformRuntime::new(&RuntimeConfig::default())?;
/// runtime.initialize_module("./mask.wasm").await?;
/// let out = runtime.execute_module("./mask.wasm", "users", b"{...}").await?;
/// runtime.close().await?;
/// ```
pub struct TransformRuntime {
    runner: Arc<InstanceRunner>,
    modules: DashMap<String, Arc<Mutex<TransformInstance>>>,
    ticker: parking_lot::Mutex<Option<EpochTicker>>,
    closed: AtomicBool,
}

impl TransformRuntime {
    /// Select an engine and prepare the host functions.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::EngineUnavailable`] if no backend works.
    pub fn new(config: &RuntimeConfig) -> Result<Self, TransformError> {
        let engine = WasmEngine::new(&config.engine)?;
        let ticker = engine.start_epoch_ticker();
        let runner = create_instance_runner(engine, config.execution.clone())?;

        Ok(Self {
            runner: Arc::new(runner),
            modules: DashMap::new(),
            ticker: parking_lot::Mutex::new(ticker),
            closed: AtomicBool::new(false),
        })
    }

    /// The engine combination selected at startup.
    pub fn selection(&self) -> EngineSelection {
        self.runner.engine().selection()
    }

    /// Identifiers of all initialized modules, sorted.
    pub fn modules(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Compile a module without instantiating or registering it.
    pub fn compile(&self, path: impl AsRef<Path>) -> Result<CompiledModule, TransformError> {
        self.ensure_open()?;
        CompiledModule::from_file(self.runner.engine().inner(), path)
    }

    /// Load, compile, and instantiate the module at `module_id`.
    ///
    /// On failure nothing is registered and the call may be retried.
    ///
    /// # Errors
    ///
    /// - [`TransformError::AlreadyInitialized`] if the identifier is live
    /// - [`TransformError::ModuleReadFailure`],
    ///   [`TransformError::ModuleCompileFailure`], or
    ///   [`TransformError::ModuleInstantiateFailure`] from the load itself
    #[instrument(skip(self))]
    pub async fn initialize_module(&self, module_id: &str) -> Result<(), TransformError> {
        self.ensure_open()?;
        if self.modules.contains_key(module_id) {
            return Err(TransformError::AlreadyInitialized {
                module_id: module_id.to_string(),
            });
        }

        let compiled = CompiledModule::from_file(self.runner.engine().inner(), module_id)?;
        let instance = self.runner.instantiate(&compiled).await?;
        self.register(module_id, instance)
    }

    /// Store a freshly built instance under `module_id`.
    ///
    /// `close` may start while the instance is being built. The closed flag
    /// is checked after the insert so an instance registered behind
    /// `close`'s drain is taken back out.
    fn register(&self, module_id: &str, instance: TransformInstance) -> Result<(), TransformError> {
        let transforms = instance.transforms().len();

        match self.modules.entry(module_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(TransformError::AlreadyInitialized {
                    module_id: module_id.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(instance)));
            }
        }

        if self.is_closed() {
            self.modules.remove(module_id);
            return Err(TransformError::RuntimeClosed);
        }

        info!(module = module_id, transforms, "Module initialized");
        Ok(())
    }

    /// Transforms discovered for an initialized module.
    pub async fn transforms(
        &self,
        module_id: &str,
    ) -> Result<Vec<TransformDescriptor>, TransformError> {
        let module = self.get(module_id)?;
        let instance = module.lock().await;
        Ok(instance.transforms().to_vec())
    }

    /// Run `record` through the module's transforms that match `table`.
    pub async fn execute_module(
        &self,
        module_id: &str,
        table: &str,
        record: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        self.execute_module_with_report(module_id, table, record)
            .await
            .map(|report| report.record)
    }

    /// Like [`execute_module`](Self::execute_module), with call details.
    #[instrument(skip(self, record), fields(call_id = %Uuid::new_v4()))]
    pub async fn execute_module_with_report(
        &self,
        module_id: &str,
        table: &str,
        record: &[u8],
    ) -> Result<TransformReport, TransformError> {
        let module = self.get(module_id)?;
        let mut instance = module.lock().await;
        dispatch(&mut instance, table, record).await
    }

    /// Discard one module instance, waiting for any in-flight call.
    ///
    /// Returns `false` if the identifier was not initialized.
    pub async fn remove_module(&self, module_id: &str) -> Result<bool, TransformError> {
        self.ensure_open()?;
        let Some((_, module)) = self.modules.remove(module_id) else {
            return Ok(false);
        };

        let instance = module.lock().await;
        info!(
            module = module_id,
            poisoned = instance.is_poisoned(),
            "Module removed"
        );
        Ok(true)
    }

    /// Release every instance and stop the epoch ticker.
    ///
    /// Waits for in-flight calls to drain. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<(), TransformError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ids: Vec<String> = self.modules.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            if let Some((_, module)) = self.modules.remove(&id) {
                drop(module.lock().await);
            }
        }

        let ticker = self.ticker.lock().take();
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }

        info!("Runtime closed");
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn get(&self, module_id: &str) -> Result<Arc<Mutex<TransformInstance>>, TransformError> {
        self.ensure_open()?;
        self.modules
            .get(module_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransformError::unknown_module(module_id))
    }

    fn ensure_open(&self) -> Result<(), TransformError> {
        if self.is_closed() {
            return Err(TransformError::RuntimeClosed);
        }
        Ok(())
    }
}

impl Drop for TransformRuntime {
    fn drop(&mut self) {
        if !self.is_closed() && !self.modules.is_empty() {
            warn!(
                modules = self.modules.len(),
                "Runtime dropped without close"
            );
        }
    }
}

impl std::fmt::Debug for TransformRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRuntime")
            .field("selection", &self.selection())
            .field("modules_count", &self.modules.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
