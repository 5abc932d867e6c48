//! Module store and record dispatcher for wasm-transform.
//!
//! [`TransformRuntime`] owns every loaded module, keyed by its path, and
//! routes each record through the transforms whose table filter matches:
//!
//! ```text
//! initialize_module(path)
//!     read -> compile -> link host functions -> instantiate -> discover
//!
//! execute_module(path, table, record)
//!     lock instance -> for each matching transform (export order):
//!         allocate -> write -> call -> read -> feed into next
//! ```
//!
//! Calls into one module are serialized; distinct modules run in parallel.

pub mod dispatcher;
pub mod runtime;
pub mod transformer;

pub use dispatcher::{TransformReport, dispatch};
pub use runtime::TransformRuntime;
pub use transformer::{DataTransformer, NoopTransformer};

pub use wasm_transform_common::{GuestFailure, RuntimeConfig, TransformError};
pub use wasm_transform_core::TransformDescriptor;
