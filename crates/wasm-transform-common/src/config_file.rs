//! Configuration file structures for wasm-transform.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`TransformEntry`]: A named transform and the module that implements it

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// compilers = ["cranelift", "winch"]
/// allocation = ["pooling", "on-demand"]
///
/// [runtime.execution]
/// max_fuel = 10_000_000
/// timeout_ms = 250
///
/// [[transforms]]
/// name = "mask-emails"
/// path = "./transforms/mask_emails.wasm"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Transforms to load, applied in the listed order.
    #[serde(default)]
    pub transforms: Vec<TransformEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), "Configuration file read");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Validate every transform entry and reject duplicate names or paths.
    ///
    /// The path identifies the loaded module, so two entries sharing one
    /// would collide when the runtime initializes them.
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for entry in &self.transforms {
            entry.validate()?;
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigFileError::Invalid {
                    name: entry.name.clone(),
                    reason: "duplicate transform name".to_string(),
                });
            }
            if !paths.insert(entry.path.as_str()) {
                return Err(ConfigFileError::Invalid {
                    name: entry.name.clone(),
                    reason: format!("module '{}' is already used by another transform", entry.path),
                });
            }
        }
        Ok(())
    }

    /// Look up a transform entry by name.
    pub fn transform(&self, name: &str) -> Option<&TransformEntry> {
        self.transforms.iter().find(|t| t.name == name)
    }
}

/// A named transform backed by a compiled module.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformEntry {
    /// Human-readable transform name.
    pub name: String,

    /// Path to the WebAssembly module. Also used as the module identifier.
    #[serde(default)]
    pub path: String,
}

impl TransformEntry {
    /// Check that both fields are present.
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if self.name.is_empty() {
            return Err(ConfigFileError::Invalid {
                name: String::new(),
                reason: "name is required".to_string(),
            });
        }

        if self.path.is_empty() {
            return Err(ConfigFileError::Invalid {
                name: self.name.clone(),
                reason: "path to a wasm module is required".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// A transform entry failed validation.
    #[error("Invalid transform '{name}': {reason}")]
    Invalid { name: String, reason: String },
}
