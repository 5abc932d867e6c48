//! Host functions implementation for wasm-transform.
//!
//! This crate provides the capabilities guest modules may import. They are
//! installed on the linker before any module is instantiated.
//!
//! # Imports
//!
//! - `env::log(offset, length)`: log a UTF-8 message at info level
//! - `env::log_at(level, offset, length)`: log at a guest-chosen level
//! - `wasi_snapshot_preview1::*`: WASI preview1, so guests built for
//!   `wasm32-wasi` link and may call `proc_exit`
//!
//! Host functions never touch guest memory directly: every read goes through
//! the bounds-checked views in [`wasm_transform_core::memory`], and an
//! out-of-range request traps only the offending call.

pub mod linker;
pub mod logging;

pub use linker::{create_instance_runner, register_all};
pub use logging::LoggingHost;
