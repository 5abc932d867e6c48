//! Configuration structures for wasm-transform.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Backend priorities and engine-wide settings
//! - [`ExecutionConfig`]: Per-call execution limits (fuel, memory, timeout)

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine selection and engine-wide settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// A compilation backend for WebAssembly code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompilerBackend {
    /// The optimizing Cranelift compiler.
    Cranelift,
    /// The single-pass Winch baseline compiler.
    Winch,
}

impl fmt::Display for CompilerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerBackend::Cranelift => write!(f, "cranelift"),
            CompilerBackend::Winch => write!(f, "winch"),
        }
    }
}

/// How instance memory is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMode {
    /// Pre-reserved slots from a pooling allocator.
    Pooling,
    /// Allocate memory for each instance when it is created.
    OnDemand,
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationMode::Pooling => write!(f, "pooling"),
            AllocationMode::OnDemand => write!(f, "on-demand"),
        }
    }
}

/// Engine configuration.
///
/// The two priority lists are walked in order at startup and the first
/// combination that yields a working engine is kept for the process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Compilation backends, most preferred first.
    #[serde(default = "defaults::compilers")]
    pub compilers: Vec<CompilerBackend>,

    /// Allocation modes, most preferred first.
    #[serde(default = "defaults::allocation")]
    pub allocation: Vec<AllocationMode>,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when the pooling allocator is selected.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per pool slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable epoch-based interruption, which enforces `timeout_ms`.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Interval between epoch increments in milliseconds.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compilers: defaults::compilers(),
            allocation: defaults::allocation(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Get the epoch tick interval as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms.max(1))
    }
}

/// Per-call execution configuration.
///
/// These settings control resource limits for each guest call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per guest call.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Deadline for a single guest call in milliseconds.
    ///
    /// Only enforced when the engine has epoch interruption enabled.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Pass host stdout/stderr through to WASI guests.
    #[serde(default = "defaults::inherit_stdio")]
    pub inherit_stdio: bool,

    /// Program name handed to WASI guests as `argv[0]`.
    #[serde(default = "defaults::program_name")]
    pub program_name: String,

    /// Guest log lines kept per dispatch for the transform report.
    #[serde(default = "defaults::max_buffered_logs")]
    pub max_buffered_logs: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            fuel_metering: defaults::fuel_metering(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
            inherit_stdio: defaults::inherit_stdio(),
            program_name: defaults::program_name(),
            max_buffered_logs: defaults::max_buffered_logs(),
        }
    }
}

impl ExecutionConfig {
    /// Maximum linear memory in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Default value functions for serde.
mod defaults {
    use super::{AllocationMode, CompilerBackend};

    pub fn compilers() -> Vec<CompilerBackend> {
        vec![CompilerBackend::Cranelift, CompilerBackend::Winch]
    }

    pub fn allocation() -> Vec<AllocationMode> {
        vec![AllocationMode::Pooling, AllocationMode::OnDemand]
    }

    pub const fn max_instances() -> u32 {
        64
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        1
    }

    pub const fn max_fuel() -> u64 {
        100_000_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn timeout_ms() -> u64 {
        1_000
    }

    pub const fn max_memory_mb() -> u32 {
        64
    }

    pub const fn inherit_stdio() -> bool {
        true
    }

    pub fn program_name() -> String {
        "wasm-transform".to_string()
    }

    pub const fn max_buffered_logs() -> usize {
        256
    }
}
