//! Core Wasmtime runtime for wasm-transform.
//!
//! This crate provides the building blocks for running guest transforms:
//! - [`WasmEngine`]: Engine built from the first available backend combination
//! - [`CompiledModule`]: Compiled WebAssembly module wrapper
//! - [`GuestContext`]: Per-instance state reachable from host functions
//! - [`InstanceRunner`] / [`TransformInstance`]: Instantiation and the
//!   allocate-write-call-read marshaling protocol
//! - [`discovery`] and [`glob`]: Pure parsing of the transform naming convention
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (One per process, thread-safe)                         │
//! │  - Selected compiler + allocation mode                  │
//! │  - Fuel metering, epoch interruption                    │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  - Pre-compiled machine code                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        Store<GuestContext> + TransformInstance          │
//! │  (One per module identifier, single caller at a time)   │
//! │  - Linear memory                                        │
//! │  - Discovered transform descriptors                     │
//! │  - Guest logs and metrics                               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod discovery;
pub mod engine;
pub mod glob;
pub mod instance;
pub mod memory;
pub mod module;
pub mod store;

pub use discovery::{TransformDescriptor, discover_transforms, parse_transform_export};
pub use engine::{EngineSelection, EpochTicker, MAX_DEADLINE_TICKS, WasmEngine};
pub use instance::{InstanceRunner, TransformInstance};
pub use module::CompiledModule;
pub use store::{ExecutionMetrics, GuestContext, GuestLog, LogLevel};
