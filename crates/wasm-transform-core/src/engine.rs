//! Engine selection and creation.
//!
//! The [`WasmEngine`] is built once per process from the first
//! compiler/allocation combination that Wasmtime accepts. Both axes are
//! walked in the priority order given by [`EngineConfig`]; nothing
//! downstream of selection branches on which combination won.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig, Strategy};

use wasm_transform_common::{AllocationMode, CompilerBackend, EngineConfig, TransformError};

/// Largest epoch delta handed to a store.
///
/// Wasmtime adds the delta to the current epoch without saturating, so an
/// unbounded deadline is expressed as this value rather than `u64::MAX`.
pub const MAX_DEADLINE_TICKS: u64 = u64::MAX / 2;

/// The compiler and allocation mode chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSelection {
    /// Compilation backend.
    pub compiler: CompilerBackend,
    /// Instance allocation mode.
    pub allocation: AllocationMode,
}

impl std::fmt::Display for EngineSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.compiler, self.allocation)
    }
}

/// Thread-safe WebAssembly engine wrapper.
///
/// The engine holds no per-module state and is shared by every instance
/// the runtime creates. It is always configured with:
/// - **Async Support**: guest calls are awaited
/// - **Fuel Metering**: per-call CPU limiting
/// - **Epoch Interruption** (optional): per-call deadlines
///
/// # Example
///
/// ```ignore
/// use wasm_transform_common::EngineConfig;
/// use wasm_transform_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// println!("running on {}", engine.selection());
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    selection: EngineSelection,
}

impl WasmEngine {
    /// Select and create an engine.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::EngineUnavailable`] if no combination of
    /// the configured compilers and allocation modes yields an engine.
    pub fn new(config: &EngineConfig) -> Result<Self, TransformError> {
        let mut attempts = Vec::new();

        for &compiler in &config.compilers {
            for &allocation in &config.allocation {
                let selection = EngineSelection {
                    compiler,
                    allocation,
                };

                match Engine::new(&Self::wasmtime_config(config, selection)) {
                    Ok(engine) => {
                        info!(
                            compiler = %compiler,
                            allocation = %allocation,
                            epoch_interruption = config.epoch_interruption,
                            "Wasmtime engine initialized"
                        );

                        return Ok(Self {
                            engine: Arc::new(engine),
                            config: config.clone(),
                            selection,
                        });
                    }
                    Err(e) => {
                        debug!(
                            compiler = %compiler,
                            allocation = %allocation,
                            error = %e,
                            "Engine combination unavailable"
                        );
                        attempts.push(format!("{selection}: {e}"));
                    }
                }
            }
        }

        let attempts = if attempts.is_empty() {
            "no compiler or allocation mode configured".to_string()
        } else {
            attempts.join("; ")
        };

        warn!(attempts = %attempts, "No WebAssembly engine available");
        Err(TransformError::EngineUnavailable { attempts })
    }

    /// Build the Wasmtime configuration for one combination.
    fn wasmtime_config(config: &EngineConfig, selection: EngineSelection) -> Config {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);
        wasmtime_config.consume_fuel(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        match selection.compiler {
            CompilerBackend::Cranelift => {
                wasmtime_config.strategy(Strategy::Cranelift);
                wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);
            }
            CompilerBackend::Winch => {
                wasmtime_config.strategy(Strategy::Winch);
            }
        }

        if selection.allocation == AllocationMode::Pooling {
            wasmtime_config.allocation_strategy(InstanceAllocationStrategy::Pooling(
                Self::create_pooling_config(config),
            ));
        }

        wasmtime_config
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_component_instances(config.max_instances);
        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The combination that was selected.
    pub fn selection(&self) -> EngineSelection {
        self.selection
    }

    /// Increment the epoch counter.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Number of epoch ticks that make up `timeout_ms`.
    ///
    /// Returns `None` when no deadline applies.
    pub fn deadline_ticks(&self, timeout_ms: u64) -> Option<u64> {
        if !self.config.epoch_interruption || timeout_ms == 0 {
            return None;
        }
        let tick_ms = self.config.epoch_tick().as_millis().max(1);
        let ticks = u128::from(timeout_ms).div_ceil(tick_ms);
        let ticks = u64::try_from(ticks).unwrap_or(MAX_DEADLINE_TICKS);
        Some(ticks.clamp(1, MAX_DEADLINE_TICKS))
    }

    /// Start a background thread that advances the epoch.
    ///
    /// Returns `None` if epoch interruption is disabled.
    pub fn start_epoch_ticker(&self) -> Option<EpochTicker> {
        if !self.config.epoch_interruption {
            return None;
        }
        Some(EpochTicker::start(self.clone()))
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("compiler", &self.selection.compiler)
            .field("allocation", &self.selection.allocation)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}

/// Background thread driving epoch-based deadlines.
///
/// A dedicated OS thread keeps ticking even while a guest call is
/// spinning on the thread that awaits it.
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: WasmEngine) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let tick = engine.config().epoch_tick();
        let flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("wasm-epoch-ticker".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| warn!(error = %e, "Failed to spawn epoch ticker; deadlines disabled"))
            .ok();

        Self { stop, handle }
    }

    /// Stop the ticker and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Epoch ticker thread panicked");
            }
        }
    }

    /// Returns `true` while the ticker thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EpochTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochTicker")
            .field("running", &self.is_running())
            .finish()
    }
}
