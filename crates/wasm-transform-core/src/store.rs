//! Per-instance guest context and store management.
//!
//! This module provides:
//! - [`GuestContext`]: State owned by a module's store, reachable from host functions
//! - [`GuestLog`] and [`LogLevel`]: Log lines emitted by guest code
//! - [`ExecutionMetrics`]: Counters accumulated across guest calls

use std::time::Instant;

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::engine::MAX_DEADLINE_TICKS;
use wasm_transform_common::{ExecutionConfig, TransformError};

/// State attached to a module instance's store.
///
/// A transform instance lives for the lifetime of the runtime, so logs are
/// buffered only between two calls to [`GuestContext::take_logs`] and are
/// capped at `max_buffered_logs`.
pub struct GuestContext {
    /// Identifier of the module this store belongs to.
    module_id: String,

    /// WASI preview1 context.
    wasi: WasiP1Ctx,

    /// Memory growth limits.
    limits: StoreLimits,

    /// Logs collected since the last drain.
    logs: Vec<GuestLog>,

    /// Upper bound for `logs`.
    max_logs: usize,

    /// Logs discarded because the buffer was full.
    dropped_logs: usize,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,
}

/// A single log line from guest code.
#[derive(Debug, Clone)]
pub struct GuestLog {
    /// Log level.
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// When the line was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Counters accumulated across guest calls.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed since the counter was last reset.
    pub fuel_consumed: u64,

    /// Guest calls made over the instance's lifetime.
    pub calls: u64,
}

impl GuestContext {
    /// Create a new guest context for the given module.
    pub fn new(module_id: impl Into<String>, config: &ExecutionConfig) -> Self {
        let mut builder = WasiCtxBuilder::new();
        builder.args(&[config.program_name.as_str()]);
        if config.inherit_stdio {
            builder.inherit_stdout().inherit_stderr();
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();

        Self {
            module_id: module_id.into(),
            wasi: builder.build_p1(),
            limits,
            logs: Vec::new(),
            max_logs: config.max_buffered_logs,
            dropped_logs: 0,
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Identifier of the module this context belongs to.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The WASI context, for linker registration.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Record a guest log line.
    ///
    /// Returns `false` if the buffer is full and the line was dropped.
    pub fn log(&mut self, level: LogLevel, message: String) -> bool {
        if self.logs.len() >= self.max_logs {
            self.dropped_logs += 1;
            return false;
        }

        self.logs.push(GuestLog {
            level,
            message,
            timestamp: Instant::now(),
        });
        true
    }

    /// Buffered logs, oldest first.
    pub fn logs(&self) -> &[GuestLog] {
        &self.logs
    }

    /// Drain buffered logs and reset the dropped counter.
    pub fn take_logs(&mut self) -> Vec<GuestLog> {
        self.dropped_logs = 0;
        std::mem::take(&mut self.logs)
    }

    /// Number of logs dropped since the last drain.
    pub fn dropped_logs(&self) -> usize {
        self.dropped_logs
    }
}

/// Create a store for one module instance.
///
/// The store is armed with fuel and an epoch deadline so that instantiation
/// itself runs under the same limits as later calls.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    module_id: impl Into<String>,
) -> Result<Store<GuestContext>, TransformError> {
    let context = GuestContext::new(module_id, config);
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    arm_store(&mut store, config, engine.deadline_ticks(config.timeout_ms))?;

    Ok(store)
}

/// Reset fuel and the epoch deadline ahead of a guest call.
///
/// The engine always meters fuel, so a store with metering turned off is
/// given an effectively unlimited budget instead of none.
pub fn arm_store(
    store: &mut Store<GuestContext>,
    config: &ExecutionConfig,
    deadline_ticks: Option<u64>,
) -> Result<(), TransformError> {
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| TransformError::invalid_config(format!("Failed to set fuel: {e}")))?;

    let ticks = deadline_ticks.map_or(MAX_DEADLINE_TICKS, |t| t.min(MAX_DEADLINE_TICKS));
    store.set_epoch_deadline(ticks);

    Ok(())
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<GuestContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<GuestContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
