/*!
Schema migrations between stored document versions.

A migration step turns a document written at `from_version` into a state value
valid at `to_version`. Steps produce typed state rather than raw documents, so
the chain re-serializes each intermediate result before handing it to the
next step.
*/

use crate::{codec::StateCodec, HydrateError, Result};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

type TransformFn<S> = dyn Fn(Value) -> Result<S> + Send + Sync;

/// A single version-to-version transformation.
pub struct MigrationStep<S> {
    from_version: u32,
    to_version: u32,
    transform: Arc<TransformFn<S>>,
}

impl<S> MigrationStep<S> {
    pub fn new<F>(from_version: u32, to_version: u32, transform: F) -> Self
    where
        F: Fn(Value) -> Result<S> + Send + Sync + 'static,
    {
        Self {
            from_version,
            to_version,
            transform: Arc::new(transform),
        }
    }

    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    pub fn to_version(&self) -> u32 {
        self.to_version
    }

    fn apply(&self, document: Value) -> Result<S> {
        match catch_unwind(AssertUnwindSafe(|| (self.transform)(document))) {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(e)) => Err(HydrateError::migration(format!(
                "step {} -> {} failed: {e}",
                self.from_version, self.to_version
            ))),
            Err(_) => Err(HydrateError::migration(format!(
                "step {} -> {} panicked",
                self.from_version, self.to_version
            ))),
        }
    }
}

impl<S> Clone for MigrationStep<S> {
    fn clone(&self) -> Self {
        Self {
            from_version: self.from_version,
            to_version: self.to_version,
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<S> fmt::Debug for MigrationStep<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .finish_non_exhaustive()
    }
}

/// Ordered set of migration steps.
///
/// When several steps share a `from_version`, the first one in configured
/// order is used.
pub struct MigrationChain<S> {
    steps: Vec<MigrationStep<S>>,
}

impl<S> MigrationChain<S> {
    pub fn new(steps: Vec<MigrationStep<S>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check that every step moves forward.
    pub fn validate(&self) -> Result<()> {
        for step in &self.steps {
            if step.to_version <= step.from_version {
                return Err(HydrateError::invalid_config(format!(
                    "migration step {} -> {} does not move to a newer version",
                    step.from_version, step.to_version
                )));
            }
        }
        Ok(())
    }

    fn step_from(&self, version: u32) -> Option<&MigrationStep<S>> {
        self.steps.iter().find(|step| step.from_version == version)
    }

    /// Bring `document` from `stored_version` up to `target_version`.
    ///
    /// Documents already at the target are returned untouched. Documents
    /// newer than the target are also returned untouched; there is no
    /// downgrade path.
    ///
    /// # Errors
    /// * `HydrateError::Migration` - If no step starts at a version on the way
    ///   to the target, or a step's transform fails
    pub fn migrate(
        &self,
        document: Value,
        stored_version: u32,
        target_version: u32,
        codec: &StateCodec<S>,
    ) -> Result<Value> {
        if stored_version > target_version {
            warn!(
                stored_version,
                target_version, "Stored document is newer than the configured version"
            );
            return Ok(document);
        }

        let mut current_version = stored_version;
        let mut current = document;

        while current_version < target_version {
            let step = self.step_from(current_version).ok_or_else(|| {
                HydrateError::migration(format!(
                    "no migration path from version {current_version} to {target_version}"
                ))
            })?;

            let state = step.apply(current)?;
            current = codec.serialize(&state).map_err(|e| {
                HydrateError::migration(format!(
                    "could not re-serialize state produced by step {} -> {}: {e}",
                    step.from_version, step.to_version
                ))
            })?;

            debug!(
                from = step.from_version,
                to = step.to_version,
                "Applied migration step"
            );
            current_version = step.to_version;
        }

        Ok(current)
    }
}

impl<S> Clone for MigrationChain<S> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<S> Default for MigrationChain<S> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<S> fmt::Debug for MigrationChain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter()).finish()
    }
}
