//! Instance lifecycle and the host/guest call protocol.
//!
//! [`InstanceRunner`] instantiates compiled modules against a linker that
//! carries the host capability functions. The resulting
//! [`TransformInstance`] owns one store and one linear memory and performs
//! the marshaling protocol for each transform call:
//!
//! 1. Call the guest's `allocate(len) -> offset`
//! 2. Write the input record at `offset`
//! 3. Call the transform with `(offset, len)`, receiving a packed `u64`
//! 4. Read the output buffer described by the packed value
//!
//! A guest that exits with status zero at any step produces no output.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Instance, Linker, Memory, Store, Trap, WasmParams, WasmResults};
use wasmtime_wasi::I32Exit;

use wasm_transform_common::{
    ExecutionConfig, GuestFailure, HostFunctionError, OutOfRange, TransformError,
};

use crate::discovery::{TransformDescriptor, discover_transforms};
use crate::memory::{read_bytes, unpack_ptr_len, write_bytes};
use crate::store::{GuestContext, arm_store, calculate_fuel_consumed, create_store, get_remaining_fuel};
use crate::{CompiledModule, WasmEngine};

/// Export every guest must provide to receive input buffers.
pub const ALLOCATE_EXPORT: &str = "allocate";

/// Linear memory export shared with the host.
pub const MEMORY_EXPORT: &str = "memory";

/// Reactor-style initializer, run once after instantiation.
const INITIALIZE_EXPORT: &str = "_initialize";

/// Command-style entry point, run once after instantiation.
const START_EXPORT: &str = "_start";

/// Instantiates modules with the registered host functions.
///
/// # Thread Safety
///
/// `InstanceRunner` is thread-safe and can be shared across tasks; each
/// instance it creates gets its own [`Store`].
pub struct InstanceRunner {
    engine: WasmEngine,
    linker: Linker<GuestContext>,
    config: ExecutionConfig,
}

impl InstanceRunner {
    /// Create a new instance runner with an empty linker.
    pub fn new(engine: WasmEngine, config: ExecutionConfig) -> Self {
        let linker = Linker::new(engine.inner());

        Self {
            engine,
            linker,
            config,
        }
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host functions before instantiating anything.
    pub fn linker_mut(&mut self) -> &mut Linker<GuestContext> {
        &mut self.linker
    }

    /// Get the engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the execution configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Instantiate a compiled module and discover its transforms.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::ModuleInstantiateFailure`] if linking fails
    /// or the module's initializer does not complete.
    #[instrument(skip(self, module), fields(module = %module.module_id()))]
    pub async fn instantiate(
        &self,
        module: &CompiledModule,
    ) -> Result<TransformInstance, TransformError> {
        let start = Instant::now();
        let module_id = module.module_id().to_string();
        let mut store = create_store(&self.engine, &self.config, module_id.as_str())?;

        let instance = self
            .linker
            .instantiate_async(&mut store, module.as_module())
            .await
            .map_err(|e| TransformError::instantiate_failed(&module_id, e.to_string()))?;

        let function_exports: Vec<String> = instance
            .exports(&mut store)
            .filter_map(|export| {
                let name = export.name().to_string();
                export.into_func().map(|_| name)
            })
            .collect();

        let transforms = discover_transforms(function_exports.iter().map(String::as_str));

        if !transforms.is_empty() && !function_exports.iter().any(|n| n == ALLOCATE_EXPORT) {
            warn!(
                module = %module_id,
                "Module exports transforms but no `allocate`; calls will fail"
            );
        }

        let mut transform_instance = TransformInstance {
            module_id,
            store,
            instance,
            transforms,
            deadline_ticks: self.engine.deadline_ticks(self.config.timeout_ms),
            config: self.config.clone(),
            poisoned: false,
        };

        for entry_point in [INITIALIZE_EXPORT, START_EXPORT] {
            if function_exports.iter().any(|n| n == entry_point) {
                transform_instance
                    .call_guest::<(), ()>(entry_point, ())
                    .await
                    .map_err(|e| {
                        TransformError::instantiate_failed(
                            &transform_instance.module_id,
                            e.to_string(),
                        )
                    })?;
            }
        }

        info!(
            module = %transform_instance.module_id,
            transforms = transform_instance.transforms.len(),
            duration_ms = start.elapsed().as_millis(),
            "Module instantiated"
        );

        Ok(transform_instance)
    }
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// A live module instance and its discovered transforms.
///
/// The allocate-write-call-read sequence is not atomic, so a
/// `TransformInstance` must only ever be driven by one caller at a time.
/// Methods take `&mut self` to enforce that.
pub struct TransformInstance {
    module_id: String,
    store: Store<GuestContext>,
    instance: Instance,
    transforms: Vec<TransformDescriptor>,
    config: ExecutionConfig,
    deadline_ticks: Option<u64>,
    poisoned: bool,
}

impl TransformInstance {
    /// Identifier of the module.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Transforms discovered at instantiation, in export order.
    pub fn transforms(&self) -> &[TransformDescriptor] {
        &self.transforms
    }

    /// Returns `true` once a call has run past its deadline.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// The store's guest context.
    pub fn context(&self) -> &GuestContext {
        self.store.data()
    }

    /// Mutable access to the store's guest context.
    pub fn context_mut(&mut self) -> &mut GuestContext {
        self.store.data_mut()
    }

    /// Return fuel consumed since the last call and reset the counter.
    pub fn take_fuel_consumed(&mut self) -> u64 {
        std::mem::take(&mut self.store.data_mut().metrics.fuel_consumed)
    }

    /// Current size of linear memory in bytes, or zero if none is exported.
    pub fn memory_size(&mut self) -> usize {
        self.instance
            .get_memory(&mut self.store, MEMORY_EXPORT)
            .map_or(0, |memory| memory.data_size(&self.store))
    }

    /// Run one transform over `input`.
    ///
    /// Returns `Ok(None)` when the guest exits with status zero before
    /// producing output.
    ///
    /// # Errors
    ///
    /// - [`TransformError::MemoryWriteOutOfRange`] if the allocated buffer
    ///   does not fit in memory
    /// - [`TransformError::MemoryReadOutOfRange`] if the returned buffer
    ///   does not fit in memory
    /// - [`TransformError::GuestExecutionFailure`] for traps, non-zero
    ///   exits, missing exports, and wrong signatures
    #[instrument(skip(self, input), fields(module = %self.module_id, input_len = input.len()))]
    pub async fn call_transform(
        &mut self,
        export_name: &str,
        input: &[u8],
    ) -> Result<Option<Vec<u8>>, TransformError> {
        let Some(offset) = self.stage_input(input).await? else {
            return Ok(None);
        };

        #[allow(clippy::cast_possible_truncation)]
        let length = input.len() as u32;

        let Some(packed) = self
            .call_guest::<(u32, u32), u64>(export_name, (offset, length))
            .await?
        else {
            return Ok(None);
        };

        let (out_offset, out_length) = unpack_ptr_len(packed);
        let output = self
            .read_memory(export_name, out_offset, out_length)
            .map_err(TransformError::MemoryReadOutOfRange)?;

        debug!(
            export = export_name,
            output_len = output.len(),
            "Transform produced output"
        );

        Ok(Some(output))
    }

    /// Allocate a guest buffer for `input` and copy it in.
    ///
    /// Returns the buffer offset, or `None` if the allocator exited cleanly.
    pub async fn stage_input(&mut self, input: &[u8]) -> Result<Option<u32>, TransformError> {
        let Ok(length) = u32::try_from(input.len()) else {
            return Err(TransformError::MemoryWriteOutOfRange(OutOfRange {
                offset: 0,
                length: input.len() as u64,
                memory_size: self.memory_size() as u64,
            }));
        };

        let Some(offset) = self.call_guest::<u32, u32>(ALLOCATE_EXPORT, length).await? else {
            return Ok(None);
        };

        let memory = self.memory(ALLOCATE_EXPORT)?;
        write_bytes(memory.data_mut(&mut self.store), offset, input)
            .map_err(TransformError::MemoryWriteOutOfRange)?;

        Ok(Some(offset))
    }

    /// Copy a range out of guest memory.
    pub fn read_memory(
        &mut self,
        export_name: &str,
        offset: u32,
        length: u32,
    ) -> Result<Vec<u8>, OutOfRange> {
        let Ok(memory) = self.memory(export_name) else {
            return Err(OutOfRange {
                offset: u64::from(offset),
                length: u64::from(length),
                memory_size: 0,
            });
        };
        read_bytes(memory.data(&self.store), offset, length)
    }

    fn memory(&mut self, export_name: &str) -> Result<Memory, TransformError> {
        self.instance
            .get_memory(&mut self.store, MEMORY_EXPORT)
            .ok_or_else(|| {
                TransformError::guest(
                    export_name,
                    GuestFailure::MissingExport {
                        name: MEMORY_EXPORT.to_string(),
                    },
                )
            })
    }

    /// Call a guest export under fresh fuel and deadline limits.
    ///
    /// Returns `Ok(None)` if the guest exited with status zero.
    async fn call_guest<P, R>(
        &mut self,
        name: &str,
        params: P,
    ) -> Result<Option<R>, TransformError>
    where
        P: WasmParams + Send + Sync,
        R: WasmResults + Send + Sync,
    {
        if self.poisoned {
            return Err(TransformError::guest(name, GuestFailure::Poisoned));
        }

        let func = self.instance.get_func(&mut self.store, name).ok_or_else(|| {
            TransformError::guest(
                name,
                GuestFailure::MissingExport {
                    name: name.to_string(),
                },
            )
        })?;

        let typed = func.typed::<P, R>(&self.store).map_err(|e| {
            TransformError::guest(
                name,
                GuestFailure::SignatureMismatch {
                    name: name.to_string(),
                    reason: e.to_string(),
                },
            )
        })?;

        arm_store(&mut self.store, &self.config, self.deadline_ticks)?;
        let initial_fuel = get_remaining_fuel(&self.store).unwrap_or(0);

        let result = typed.call_async(&mut self.store, params).await;

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &self.store);
        let metrics = &mut self.store.data_mut().metrics;
        metrics.fuel_consumed = metrics.fuel_consumed.saturating_add(fuel_consumed);
        metrics.calls += 1;

        match result {
            Ok(value) => Ok(Some(value)),
            Err(error) => match classify_failure(&error, self.config.timeout_ms) {
                None => {
                    debug!(module = %self.module_id, export = name, "Guest exited with status 0");
                    Ok(None)
                }
                Some(cause) => {
                    if matches!(cause, GuestFailure::Timeout { .. }) {
                        self.poisoned = true;
                    }
                    warn!(
                        module = %self.module_id,
                        export = name,
                        fuel_consumed,
                        cause = %cause,
                        "Guest call failed"
                    );
                    Err(TransformError::guest(name, cause))
                }
            },
        }
    }
}

impl std::fmt::Debug for TransformInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformInstance")
            .field("module_id", &self.module_id)
            .field("transforms", &self.transforms)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

/// Map a failed guest call to its cause.
///
/// Returns `None` for a clean `proc_exit(0)`, which is not a failure.
fn classify_failure(error: &wasmtime::Error, timeout_ms: u64) -> Option<GuestFailure> {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return (exit.0 != 0).then_some(GuestFailure::Exit { code: exit.0 });
    }

    if let Some(trap) = error.downcast_ref::<Trap>() {
        return Some(match trap {
            Trap::OutOfFuel => GuestFailure::FuelExhausted,
            Trap::Interrupt => GuestFailure::Timeout { timeout_ms },
            _ => GuestFailure::Trap {
                message: trap.to_string(),
            },
        });
    }

    if let Some(host) = error.downcast_ref::<HostFunctionError>() {
        return Some(GuestFailure::Trap {
            message: host.to_string(),
        });
    }

    Some(GuestFailure::Trap {
        message: error.root_cause().to_string(),
    })
}
