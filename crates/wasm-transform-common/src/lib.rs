//! Common types, errors, and configuration for wasm-transform.
//!
//! This crate provides shared functionality used across the wasm-transform workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine selection and execution limits
//! - The TOML configuration file naming the transforms to load

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{AllocationMode, CompilerBackend, EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, TransformEntry};
pub use error::{GuestFailure, HostFunctionError, OutOfRange, TransformError};
