/*!
Storage capability for hydrated state.

This module defines the raw key-value backend abstraction (port) and the
`StorageCapability` wrapper that every hydrator talks to. The capability owns
the one-time initialization of its backend: the first caller starts it,
everybody else waits on the same cell and observes the same outcome, and no
read or write reaches the backend before it has completed successfully.
*/

pub mod memory;
#[cfg(feature = "local")]
pub mod local;

use crate::{HydrateError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Raw string key-value backend
///
/// Implementations only move strings; the capability takes care of
/// initialization ordering and the engine of encoding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Prepare the backend for use
    ///
    /// Called at most once per capability.
    async fn open(&self) -> Result<()>;

    /// Read the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key succeeds
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key held by the backend
    async fn clear(&self) -> Result<()>;
}

/// Lazily initialized handle to a storage backend
///
/// Share one capability between hydrators with `Arc`; hydrators are told
/// apart by their keys.
pub struct StorageCapability {
    backend: Box<dyn StorageBackend>,
    ready: OnceCell<std::result::Result<(), String>>,
}

impl StorageCapability {
    pub fn new<B: StorageBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
            ready: OnceCell::new(),
        }
    }

    /// Convenience constructor returning a shareable handle
    pub fn shared<B: StorageBackend + 'static>(backend: B) -> Arc<Self> {
        Arc::new(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// True once initialization has completed successfully
    pub fn is_initialized(&self) -> bool {
        matches!(self.ready.get(), Some(Ok(())))
    }

    /// Initialize the backend, or wait for the initialization in progress
    ///
    /// The backend is opened once. A failure is remembered and returned to
    /// every caller, including callers that arrive after it happened.
    /// If the future running `open` is dropped before it finishes, the next
    /// caller starts `open` again; only a completed attempt is remembered.
    ///
    /// # Errors
    /// * `HydrateError::Initialization` - If the backend could not be opened
    pub async fn initialize(&self) -> Result<()> {
        let outcome = self
            .ready
            .get_or_init(|| async {
                let backend = self.backend.name();
                match self.backend.open().await {
                    Ok(()) => {
                        info!(backend, "Storage backend initialized");
                        Ok(())
                    }
                    Err(e) => {
                        error!(backend, error = %e, "Storage backend initialization failed");
                        Err(e.to_string())
                    }
                }
            })
            .await;

        outcome.clone().map_err(HydrateError::Initialization)
    }

    /// Start initialization on the current Tokio runtime without waiting
    ///
    /// Outside a runtime this does nothing and initialization happens on
    /// first use instead.
    pub fn spawn_initialize(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let storage = Arc::clone(self);
                handle.spawn(async move {
                    // Outcome is cached in the cell and logged there.
                    let _ = storage.initialize().await;
                });
            }
            Err(_) => debug!(
                backend = self.backend.name(),
                "No async runtime, deferring storage initialization"
            ),
        }
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.initialize().await?;
        self.backend.get(key).await
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.initialize().await?;
        self.backend.set(key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.initialize().await?;
        self.backend.remove(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.initialize().await?;
        self.backend.clear().await
    }
}

impl fmt::Debug for StorageCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCapability")
            .field("backend", &self.backend.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// Re-export types for convenience
#[cfg(feature = "local")]
pub use local::LocalFileBackend;
pub use memory::MemoryBackend;
