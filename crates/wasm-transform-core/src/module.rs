//! WebAssembly module loading and compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! tagged with the identifier it was loaded under.
//!
//! Sources ending in `.wat` are compiled from the text format; anything else
//! must be a binary module carrying the `\0asm` header.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, ExternType, Module};

use wasm_transform_common::TransformError;

use crate::discovery::{TransformDescriptor, discover_transforms};

/// A compiled WebAssembly module.
///
/// `CompiledModule` is cheap to clone and can be shared across threads.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,

    /// Identifier the module was loaded under.
    module_id: String,

    /// Hash of the original source bytes.
    content_hash: String,
}

impl CompiledModule {
    /// Read and compile a module from disk.
    ///
    /// The path's display form becomes the module identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::ModuleReadFailure`] if the file cannot be
    /// read and [`TransformError::ModuleCompileFailure`] if it is not a
    /// valid module.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, TransformError> {
        let path = path.as_ref();
        let module_id = path.display().to_string();

        let bytes = std::fs::read(path).map_err(|e| TransformError::ModuleReadFailure {
            module_id: module_id.clone(),
            source: e,
        })?;

        let is_text = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wat"));

        if is_text {
            let wat = std::str::from_utf8(&bytes).map_err(|e| {
                TransformError::compile_failed(&module_id, format!("WAT source is not UTF-8: {e}"))
            })?;
            Self::from_wat(engine, module_id, wat)
        } else {
            Self::from_bytes(engine, module_id, &bytes)
        }
    }

    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(
        engine: &Engine,
        module_id: impl Into<String> + std::fmt::Debug,
        bytes: &[u8],
    ) -> Result<Self, TransformError> {
        let module_id = module_id.into();
        let start = Instant::now();

        Self::validate_wasm_header(&module_id, bytes)?;

        let module = Module::new(engine, bytes)
            .map_err(|e| TransformError::compile_failed(&module_id, e.to_string()))?;

        Ok(Self::finish(module, module_id, bytes, start))
    }

    /// Compile a core module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(
        engine: &Engine,
        module_id: impl Into<String> + std::fmt::Debug,
        wat: &str,
    ) -> Result<Self, TransformError> {
        let module_id = module_id.into();
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            TransformError::compile_failed(&module_id, format!("WAT compilation failed: {e}"))
        })?;

        Ok(Self::finish(module, module_id, wat.as_bytes(), start))
    }

    fn finish(module: Module, module_id: String, source: &[u8], start: Instant) -> Self {
        let content_hash = compute_hash(source);

        info!(
            module = %module_id,
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Self {
            inner: module,
            module_id,
            content_hash,
        }
    }

    /// Names of all exported functions, in declaration order.
    pub fn function_exports(&self) -> Vec<String> {
        self.inner
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Transforms this module would expose once instantiated.
    pub fn transforms(&self) -> Vec<TransformDescriptor> {
        let names = self.function_exports();
        discover_transforms(names.iter().map(String::as_str))
    }

    /// Get the module identifier.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Get the content hash of the original source.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(module_id: &str, bytes: &[u8]) -> Result<(), TransformError> {
        if bytes.len() < 8 {
            return Err(TransformError::compile_failed(
                module_id,
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(TransformError::compile_failed(
                module_id,
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("module_id", &self.module_id)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
