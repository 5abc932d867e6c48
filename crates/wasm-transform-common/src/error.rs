//! Error types for wasm-transform.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`TransformError`]: Top-level errors for module lifecycle and dispatch
//! - [`GuestFailure`]: Why a guest call failed to complete
//! - [`HostFunctionError`]: Errors raised by host capability functions
//! - [`OutOfRange`]: A rejected access to guest linear memory

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// a transform module, from engine selection to per-record dispatch.
#[derive(Error, Debug)]
pub enum TransformError {
    /// No compiler/allocation combination could build an engine.
    ///
    /// This is a deployment or build configuration error and is not retried.
    #[error("No WebAssembly engine available: {attempts}")]
    EngineUnavailable {
        /// Summary of every combination that was attempted.
        attempts: String,
    },

    /// The module source could not be read.
    #[error("Unable to load {module_id}: {source}")]
    ModuleReadFailure {
        /// The module identifier (its path).
        module_id: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation of {module_id} failed: {reason}")]
    ModuleCompileFailure {
        /// The module identifier (its path).
        module_id: String,
        /// Description of the compilation failure.
        reason: String,
    },

    /// Linking or instantiation failed.
    #[error("Instantiation of {module_id} failed: {reason}")]
    ModuleInstantiateFailure {
        /// The module identifier (its path).
        module_id: String,
        /// Description of the instantiation failure.
        reason: String,
    },

    /// Dispatch was requested for a module that was never initialized.
    #[error("Requested unknown module {module_id}")]
    UnknownModule {
        /// The identifier that was requested.
        module_id: String,
    },

    /// The identifier already maps to a live instance.
    #[error("Module {module_id} is already initialized")]
    AlreadyInitialized {
        /// The identifier that was requested.
        module_id: String,
    },

    /// Writing the input record into guest memory would exceed its bounds.
    #[error("Couldn't write to guest memory: {0}")]
    MemoryWriteOutOfRange(OutOfRange),

    /// The output buffer returned by the guest lies outside its memory.
    #[error("Failed to read output buffer: {0}")]
    MemoryReadOutOfRange(OutOfRange),

    /// The guest trapped, exited non-zero, or violated the call convention.
    #[error("Guest execution of `{export}` failed: {cause}")]
    GuestExecutionFailure {
        /// The export being called when the failure happened.
        export: String,
        /// What went wrong.
        cause: GuestFailure,
    },

    /// The runtime has been closed.
    #[error("Runtime is closed")]
    RuntimeClosed,

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Why a single guest call did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuestFailure {
    /// The guest called `proc_exit` with a non-zero status.
    #[error("exited with status {code}")]
    Exit {
        /// The exit status.
        code: i32,
    },

    /// A WebAssembly trap, including traps raised by host functions.
    #[error("trapped: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The call consumed all of its fuel.
    #[error("fuel exhausted")]
    FuelExhausted,

    /// The call ran past its epoch deadline.
    #[error("deadline of {timeout_ms}ms exceeded")]
    Timeout {
        /// The configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// A function the protocol requires is not exported.
    #[error("missing export `{name}`")]
    MissingExport {
        /// The export name that was looked up.
        name: String,
    },

    /// An export exists but with the wrong calling convention.
    #[error("export `{name}` has an unexpected signature: {reason}")]
    SignatureMismatch {
        /// The export name.
        name: String,
        /// The type-check failure reported by the engine.
        reason: String,
    },

    /// The instance timed out earlier and is no longer trusted.
    #[error("instance is poisoned by an earlier timeout")]
    Poisoned,
}

/// A guest memory access outside the current bounds of linear memory.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("range {offset}+{length} exceeds memory of {memory_size} bytes")]
pub struct OutOfRange {
    /// Start of the requested range.
    pub offset: u64,
    /// Length of the requested range.
    pub length: u64,
    /// Size of linear memory at the time of the access.
    pub memory_size: u64,
}

/// Errors from host function implementations.
///
/// These are returned from host functions as the trap payload, so they
/// terminate the guest call that invoked them and nothing else.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// The guest passed a buffer outside its own memory.
    #[error("Memory.Read out of range: {0}")]
    MemoryOutOfRange(#[from] OutOfRange),

    /// The guest does not export a linear memory named `memory`.
    #[error("Guest module does not export `memory`")]
    MissingMemory,
}

impl TransformError {
    /// Create a new `UnknownModule` error.
    pub fn unknown_module(module_id: impl Into<String>) -> Self {
        Self::UnknownModule {
            module_id: module_id.into(),
        }
    }

    /// Create a new `ModuleCompileFailure` error.
    pub fn compile_failed(module_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleCompileFailure {
            module_id: module_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `ModuleInstantiateFailure` error.
    pub fn instantiate_failed(module_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleInstantiateFailure {
            module_id: module_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `GuestExecutionFailure` error.
    pub fn guest(export: impl Into<String>, cause: GuestFailure) -> Self {
        Self::GuestExecutionFailure {
            export: export.into(),
            cause,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the module was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownModule { .. })
    }

    /// Returns `true` if the guest violated the protocol or failed to run.
    pub fn is_guest_fault(&self) -> bool {
        matches!(
            self,
            Self::MemoryWriteOutOfRange(_)
                | Self::MemoryReadOutOfRange(_)
                | Self::GuestExecutionFailure { .. }
        )
    }
}
