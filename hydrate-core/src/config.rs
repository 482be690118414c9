//! Configuration for hydrators and storage backend selection
//!
//! `HydratorConfig` carries the per-record settings (key and schema version),
//! `StorageConfig` selects and parameterizes the backend that hydrators share.

use crate::envelope::DEFAULT_VERSION;
use crate::storage::{MemoryBackend, StorageCapability};
use crate::{HydrateError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Per-record hydrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydratorConfig {
    /// Storage key of the record
    pub key: String,
    /// Current schema version; stored documents are migrated up to it
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

impl HydratorConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: DEFAULT_VERSION,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(HydrateError::invalid_config("hydrator key must not be empty"));
        }
        if self.version == 0 {
            return Err(HydrateError::invalid_config(
                "hydrator version must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Enumeration of supported storage backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackendKind {
    /// In-process map, lost on exit
    Memory,
    /// One file per key in a local directory
    Local,
}

/// Configuration structure for storage backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// The storage backend to use
    pub backend: StorageBackendKind,
    /// Directory for local storage (required for the local backend)
    pub local_base_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Create a configuration for in-memory storage
    pub fn default_memory() -> Self {
        StorageConfig {
            backend: StorageBackendKind::Memory,
            local_base_path: None,
        }
    }

    /// Create a local storage configuration rooted at `path`
    pub fn local_with_base_path(path: impl Into<PathBuf>) -> Self {
        StorageConfig {
            backend: StorageBackendKind::Local,
            local_base_path: Some(path.into()),
        }
    }

    /// Parse a storage URI and create the matching configuration
    ///
    /// Supports formats:
    /// - `memory://` for in-memory storage
    /// - `file:///abs/dir` for local storage
    /// - `/local/dir` or `./relative/dir` for local storage
    pub fn from_uri(uri: &str) -> Result<StorageConfig> {
        if uri == "memory://" || uri == "memory" {
            return Ok(Self::default_memory());
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri);
        if path.is_empty() {
            return Err(HydrateError::invalid_config(
                "Invalid storage URI: missing directory",
            ));
        }
        if path.contains("://") {
            return Err(HydrateError::invalid_config(format!(
                "Unsupported storage URI scheme: {uri}"
            )));
        }
        Ok(Self::local_with_base_path(path))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            StorageBackendKind::Local => {
                let missing = self
                    .local_base_path
                    .as_ref()
                    .map_or(true, |p| p.as_os_str().is_empty());
                if missing {
                    return Err(HydrateError::invalid_config(
                        "Local backend requires a base path",
                    ));
                }
            }
            StorageBackendKind::Memory => {}
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::default_memory()
    }
}

/// Build a shareable storage capability from configuration
///
/// The backend is not opened here; hydrators start initialization when they
/// are built, or it happens on first use.
///
/// # Example
/// ```rust
/// use hydrate_core::{create_storage_from_config, StorageConfig};
///
/// let storage = create_storage_from_config(&StorageConfig::default_memory())?;
/// assert_eq!(storage.backend_name(), "memory");
/// # Ok::<(), hydrate_core::HydrateError>(())
/// ```
pub fn create_storage_from_config(config: &StorageConfig) -> Result<Arc<StorageCapability>> {
    config.validate()?;

    match config.backend {
        StorageBackendKind::Memory => Ok(StorageCapability::shared(MemoryBackend::new())),
        #[cfg(feature = "local")]
        StorageBackendKind::Local => {
            let base = config.local_base_path.clone().ok_or_else(|| {
                HydrateError::invalid_config("Local backend requires a base path")
            })?;
            Ok(StorageCapability::shared(
                crate::storage::LocalFileBackend::new(base),
            ))
        }
        #[cfg(not(feature = "local"))]
        StorageBackendKind::Local => Err(HydrateError::invalid_config(
            "Local storage support not enabled",
        )),
    }
}
