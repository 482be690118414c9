/*!
The hydration engine.

A [`Hydrator`] owns one record in a shared [`StorageCapability`]: it restores
the record into a typed state (validating and migrating older documents on
the way) and persists new states inside a versioned envelope.
*/

use crate::codec::StateCodec;
use crate::config::HydratorConfig;
use crate::envelope::Envelope;
use crate::events::{
    dispatch, EventSink, HydrationEvent, HydrationEventKind, HydrationOperation, TracingEventSink,
};
use crate::migration::{MigrationChain, MigrationStep};
use crate::storage::StorageCapability;
use crate::{HydrateError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Predicate run against every decoded document before it is migrated
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Builder for [`Hydrator`]
///
/// # Example
/// ```rust
/// use hydrate_core::{Hydrator, MemoryBackend, StateCodec, StorageCapability};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Settings {
///     theme: String,
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), hydrate_core::HydrateError> {
/// let storage = StorageCapability::shared(MemoryBackend::new());
/// let hydrator = Hydrator::builder("settings", StateCodec::<Settings>::serde())
///     .version(2)
///     .migration(1, 2, |doc| {
///         Ok(Settings {
///             theme: doc["colour"].as_str().unwrap_or("light").to_string(),
///         })
///     })
///     .storage(storage)
///     .build()?;
///
/// assert!(hydrator.save(&Settings { theme: "dark".into() }).await);
/// let restored = hydrator.load().await;
/// assert_eq!(restored.map(|s| s.theme).as_deref(), Some("dark"));
/// # Ok(())
/// # }
/// ```
pub struct HydratorBuilder<S> {
    config: HydratorConfig,
    codec: StateCodec<S>,
    migrations: Vec<MigrationStep<S>>,
    validator: Option<Validator>,
    events: Arc<dyn EventSink>,
    storage: Option<Arc<StorageCapability>>,
}

impl<S> HydratorBuilder<S> {
    pub fn new(key: impl Into<String>, codec: StateCodec<S>) -> Self {
        Self::from_config(HydratorConfig::new(key), codec)
    }

    pub fn from_config(config: HydratorConfig, codec: StateCodec<S>) -> Self {
        Self {
            config,
            codec,
            migrations: Vec::new(),
            validator: None,
            events: Arc::new(TracingEventSink),
            storage: None,
        }
    }

    /// Current schema version (default 1)
    pub fn version(mut self, version: u32) -> Self {
        self.config.version = version;
        self
    }

    /// Add a migration from `from_version` to `to_version`
    ///
    /// Steps are searched in the order they are added.
    pub fn migration<F>(mut self, from_version: u32, to_version: u32, transform: F) -> Self
    where
        F: Fn(Value) -> Result<S> + Send + Sync + 'static,
    {
        self.migrations
            .push(MigrationStep::new(from_version, to_version, transform));
        self
    }

    pub fn migration_step(mut self, step: MigrationStep<S>) -> Self {
        self.migrations.push(step);
        self
    }

    /// Reject stored documents for which `validator` returns false
    ///
    /// The validator sees the decoded document as stored, envelope included.
    /// A panicking validator counts as a rejection.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn event_sink<E: EventSink + 'static>(mut self, sink: E) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub fn shared_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn storage(mut self, storage: Arc<StorageCapability>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the hydrator and start storage initialization in the background
    ///
    /// # Errors
    /// * `HydrateError::InvalidConfig` - If the key is empty, the version is 0,
    ///   a migration step does not move forward, or no storage was given
    pub fn build(self) -> Result<Hydrator<S>>
    where
        S: Send + Sync + 'static,
    {
        self.config.validate()?;
        let migrations = MigrationChain::new(self.migrations);
        migrations.validate()?;
        let storage = self
            .storage
            .ok_or_else(|| HydrateError::invalid_config("a storage capability is required"))?;

        storage.spawn_initialize();

        info!(
            key = %self.config.key,
            version = self.config.version,
            migrations = migrations.len(),
            backend = storage.backend_name(),
            "Hydrator created"
        );

        Ok(Hydrator {
            inner: Arc::new(HydratorInner {
                key: self.config.key,
                version: self.config.version,
                codec: self.codec,
                migrations,
                validator: self.validator,
                events: self.events,
                storage,
                debounce: Mutex::new(DebounceSlot::default()),
                disposed: AtomicBool::new(false),
            }),
        })
    }
}

impl<S> HydratorBuilder<S>
where
    S: Serialize + DeserializeOwned,
{
    /// Builder using the state type's serde implementations
    pub fn serde(key: impl Into<String>) -> Self {
        Self::new(key, StateCodec::serde())
    }
}

/// Restores and persists one versioned state record
///
/// Dropping the hydrator disposes it.
pub struct Hydrator<S> {
    inner: Arc<HydratorInner<S>>,
}

struct HydratorInner<S> {
    key: String,
    version: u32,
    codec: StateCodec<S>,
    migrations: MigrationChain<S>,
    validator: Option<Validator>,
    events: Arc<dyn EventSink>,
    storage: Arc<StorageCapability>,
    debounce: Mutex<DebounceSlot>,
    disposed: AtomicBool,
}

/// Debounce window state
///
/// Every call in one window shares `result`; each call replaces the timer
/// and bumps `generation`, so only the newest timer may claim the window.
#[derive(Default)]
struct DebounceSlot {
    generation: u64,
    pending: Option<PendingSave>,
}

struct PendingSave {
    generation: u64,
    timer: JoinHandle<()>,
    result: Arc<watch::Sender<Option<bool>>>,
}

impl<S> Hydrator<S>
where
    S: Send + Sync + 'static,
{
    pub fn builder(key: impl Into<String>, codec: StateCodec<S>) -> HydratorBuilder<S> {
        HydratorBuilder::new(key, codec)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }

    pub fn storage(&self) -> &Arc<StorageCapability> {
        &self.inner.storage
    }

    /// Restore the stored state
    ///
    /// Returns `None` when nothing is stored and also when the stored record
    /// cannot be used (storage unavailable, undecodable text, rejected by the
    /// validator, no migration path). The difference is reported through the
    /// event sink only: `completed` for an empty store, `failed` otherwise.
    pub async fn load(&self) -> Option<S> {
        self.inner.load().await
    }

    /// Restore the stored state, returning the reason on failure
    ///
    /// Runs the same pipeline as [`Hydrator::load`] without emitting events.
    pub async fn try_load(&self) -> Result<Option<S>> {
        self.inner.try_load().await
    }

    /// Restore the stored state or fall back to `default`
    pub async fn load_or_else<F>(&self, default: F) -> S
    where
        F: FnOnce() -> S,
    {
        match self.load().await {
            Some(state) => state,
            None => default(),
        }
    }

    /// Persist `state` at the current version
    pub async fn save(&self, state: &S) -> bool {
        self.inner.save(state).await
    }

    /// Persist `state` once `delay` passes without another debounced call
    ///
    /// A newer call within the window replaces the state and restarts the
    /// timer; every caller of the window gets the result of the one write
    /// that happens. Returns false if the window is cancelled by
    /// [`Hydrator::dispose`] or the hydrator was already disposed.
    pub async fn save_with_debounce(&self, state: S, delay: Duration) -> bool {
        let Some(mut result) = self.schedule_save(state, delay) else {
            debug!(key = %self.inner.key, "Hydrator disposed, debounced save dropped");
            return false;
        };

        let written = match result.wait_for(Option::is_some).await {
            Ok(written) => (*written).unwrap_or(false),
            Err(_) => false,
        };
        written
    }

    /// Persist every state concurrently
    ///
    /// True only if every save succeeded. Failed saves do not stop or undo
    /// the others.
    pub async fn save_all<'a, I>(&self, states: I) -> bool
    where
        I: IntoIterator<Item = &'a S>,
        S: 'a,
    {
        let saves = states.into_iter().map(|state| self.inner.save(state));
        let results = futures::future::join_all(saves).await;
        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!(
                key = %self.inner.key,
                failed,
                total = results.len(),
                "Batch save incomplete"
            );
        }
        failed == 0
    }

    /// Remove the stored record
    pub async fn clear(&self) -> bool {
        self.inner.clear().await
    }

    /// Cancel any pending debounced save and refuse new ones
    pub fn dispose(&self) {
        if self.inner.shut_down() {
            info!(key = %self.inner.key, "Cancelled pending debounced save");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Whether a debounced save is waiting for its timer
    pub fn has_pending_save(&self) -> bool {
        self.inner.lock_debounce().pending.is_some()
    }

    fn schedule_save(&self, state: S, delay: Duration) -> Option<watch::Receiver<Option<bool>>> {
        let mut slot = self.inner.lock_debounce();
        if self.inner.disposed.load(Ordering::SeqCst) {
            return None;
        }

        slot.generation += 1;
        let generation = slot.generation;
        let result = match slot.pending.take() {
            Some(previous) => {
                previous.timer.abort();
                debug!(key = %self.inner.key, generation, "Debounced save superseded");
                previous.result
            }
            None => Arc::new(watch::channel(None).0),
        };
        let receiver = result.subscribe();

        let inner = Arc::clone(&self.inner);
        let outcome = Arc::clone(&result);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.claim_pending(generation) {
                return;
            }
            let written = inner.save(&state).await;
            outcome.send_replace(Some(written));
        });

        slot.pending = Some(PendingSave {
            generation,
            timer,
            result,
        });
        Some(receiver)
    }
}

impl<S> HydratorInner<S> {
    fn lock_debounce(&self) -> MutexGuard<'_, DebounceSlot> {
        self.debounce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark disposed and abort the pending timer; true if one was pending
    fn shut_down(&self) -> bool {
        let pending = {
            let mut slot = self.lock_debounce();
            self.disposed.store(true, Ordering::SeqCst);
            slot.pending.take()
        };
        match pending {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Take the pending window if it still belongs to `generation`
    fn claim_pending(&self, generation: u64) -> bool {
        let mut slot = self.lock_debounce();
        match &slot.pending {
            Some(pending) if pending.generation == generation => {
                slot.pending = None;
                true
            }
            _ => false,
        }
    }

    fn emit(&self, operation: HydrationOperation, kind: HydrationEventKind) {
        dispatch(
            self.events.as_ref(),
            &HydrationEvent::new(&self.key, operation, kind),
        );
    }

    fn emit_failed(&self, operation: HydrationOperation, error: &HydrateError) {
        dispatch(
            self.events.as_ref(),
            &HydrationEvent::failed(&self.key, operation, error.to_string()),
        );
    }

    async fn load(&self) -> Option<S> {
        self.emit(HydrationOperation::Load, HydrationEventKind::Started);
        match self.try_load().await {
            Ok(state) => {
                self.emit(HydrationOperation::Load, HydrationEventKind::Completed);
                state
            }
            Err(e) => {
                if e.is_corrupt_record() {
                    warn!(key = %self.key, error = %e, "Stored state is unusable, ignoring it");
                } else {
                    debug!(key = %self.key, error = %e, "Load failed, no state restored");
                }
                self.emit_failed(HydrationOperation::Load, &e);
                None
            }
        }
    }

    async fn try_load(&self) -> Result<Option<S>> {
        self.storage.initialize().await?;

        let Some(raw) = self.storage.get_string(&self.key).await? else {
            debug!(key = %self.key, "No stored state");
            return Ok(None);
        };

        let document = Envelope::parse_document(&raw)?;
        self.check_schema(&document)?;

        let envelope = Envelope::from_document(document)?;
        let stored_version = envelope.version;
        let data =
            self.migrations
                .migrate(envelope.data, stored_version, self.version, &self.codec)?;
        let state = self.codec.deserialize(data).map_err(|e| match e {
            HydrateError::Serialization(msg) => HydrateError::decode(format!(
                "stored data does not match the state type: {msg}"
            )),
            other => other,
        })?;

        debug!(
            key = %self.key,
            stored_version,
            version = self.version,
            "Restored state"
        );
        Ok(Some(state))
    }

    fn check_schema(&self, document: &Value) -> Result<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        match catch_unwind(AssertUnwindSafe(|| validator(document))) {
            Ok(true) => Ok(()),
            Ok(false) => Err(HydrateError::validation(
                "stored document rejected by schema validator",
            )),
            Err(_) => Err(HydrateError::validation("schema validator panicked")),
        }
    }

    async fn save(&self, state: &S) -> bool {
        self.emit(HydrationOperation::Save, HydrationEventKind::Started);
        match self.try_save(state).await {
            Ok(()) => {
                self.emit(HydrationOperation::Save, HydrationEventKind::Completed);
                true
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "Save failed");
                self.emit_failed(HydrationOperation::Save, &e);
                false
            }
        }
    }

    async fn try_save(&self, state: &S) -> Result<()> {
        let data = self.codec.serialize(state)?;
        let raw = Envelope::new(self.version, data).encode()?;

        self.storage.initialize().await?;
        self.storage.set_string(&self.key, &raw).await?;

        debug!(
            key = %self.key,
            version = self.version,
            bytes = raw.len(),
            "Saved state"
        );
        Ok(())
    }

    async fn clear(&self) -> bool {
        match self.storage.remove(&self.key).await {
            Ok(()) => {
                info!(key = %self.key, "Cleared stored state");
                true
            }
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to clear stored state");
                false
            }
        }
    }
}

impl<S> Drop for Hydrator<S> {
    fn drop(&mut self) {
        self.inner.shut_down();
    }
}

impl<S> fmt::Debug for Hydrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hydrator")
            .field("key", &self.inner.key)
            .field("version", &self.inner.version)
            .field("migrations", &self.inner.migrations)
            .field("storage", &self.inner.storage)
            .finish_non_exhaustive()
    }
}
