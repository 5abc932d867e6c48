//! Host function registration for Wasmtime linkers.
//!
//! This module provides functions to register host functions on Wasmtime linkers,
//! enabling WebAssembly modules to call into the host runtime.

use tracing::debug;
use wasmtime::{Caller, Extern, Linker};

use wasm_transform_common::{ExecutionConfig, HostFunctionError, TransformError};
use wasm_transform_core::instance::MEMORY_EXPORT;
use wasm_transform_core::memory::read_bytes;
use wasm_transform_core::{GuestContext, InstanceRunner, LogLevel, WasmEngine};

use crate::logging::{LoggingHost, level_from_i32};

/// Import namespace for the host capability functions.
pub const HOST_MODULE: &str = "env";

/// Create an instance runner with every host function registered.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn create_instance_runner(
    engine: WasmEngine,
    config: ExecutionConfig,
) -> Result<InstanceRunner, TransformError> {
    let mut runner = InstanceRunner::new(engine, config);
    register_all(runner.linker_mut())?;
    Ok(runner)
}

/// Register all standard host functions on a linker.
///
/// This registers:
/// - `env::log` and `env::log_at` for guest logging
/// - WASI preview1
pub fn register_all(linker: &mut Linker<GuestContext>) -> Result<(), TransformError> {
    register_logging(linker)?;
    register_wasi(linker)?;
    debug!("Host functions registered");
    Ok(())
}

/// Register the logging host functions.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `offset`: Pointer to the message in guest memory
/// - `length`: Length of the message in bytes (UTF-8, decoded lossily)
///
/// `log_at` takes a leading `level` (0=debug, 1=info, 2=warn, 3=error).
/// A range outside guest memory traps the calling function.
pub fn register_logging(linker: &mut Linker<GuestContext>) -> Result<(), TransformError> {
    linker
        .func_wrap(
            HOST_MODULE,
            "log",
            |mut caller: Caller<'_, GuestContext>,
             offset: u32,
             length: u32|
             -> wasmtime::Result<()> {
                let message = read_guest_message(&mut caller, offset, length)?;
                LoggingHost::log(caller.data_mut(), LogLevel::Info, message);
                Ok(())
            },
        )
        .map_err(|e| {
            TransformError::invalid_config(format!("Failed to register log function: {e}"))
        })?;

    linker
        .func_wrap(
            HOST_MODULE,
            "log_at",
            |mut caller: Caller<'_, GuestContext>,
             level: i32,
             offset: u32,
             length: u32|
             -> wasmtime::Result<()> {
                let message = read_guest_message(&mut caller, offset, length)?;
                LoggingHost::log(caller.data_mut(), level_from_i32(level), message);
                Ok(())
            },
        )
        .map_err(|e| {
            TransformError::invalid_config(format!("Failed to register log_at function: {e}"))
        })?;

    Ok(())
}

/// Register WASI preview1 under `wasi_snapshot_preview1`.
pub fn register_wasi(linker: &mut Linker<GuestContext>) -> Result<(), TransformError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, GuestContext::wasi_mut).map_err(|e| {
        TransformError::invalid_config(format!("Failed to register WASI preview1: {e}"))
    })
}

/// Read a message out of the caller's exported memory.
fn read_guest_message(
    caller: &mut Caller<'_, GuestContext>,
    offset: u32,
    length: u32,
) -> wasmtime::Result<String> {
    let memory = caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or(HostFunctionError::MissingMemory)?;

    let bytes = read_bytes(memory.data(&*caller), offset, length)
        .map_err(HostFunctionError::MemoryOutOfRange)?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
