/*!
Conversion between caller state types and JSON documents.
*/

use crate::{HydrateError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type SerializeFn<S> = dyn Fn(&S) -> Result<Value> + Send + Sync;
type DeserializeFn<S> = dyn Fn(Value) -> Result<S> + Send + Sync;

/// Pair of functions converting a state type to and from a JSON document.
///
/// The engine never inspects the state itself; everything it knows about `S`
/// goes through these two functions.
pub struct StateCodec<S> {
    serialize: Arc<SerializeFn<S>>,
    deserialize: Arc<DeserializeFn<S>>,
}

impl<S> StateCodec<S> {
    pub fn new<F, G>(serialize: F, deserialize: G) -> Self
    where
        F: Fn(&S) -> Result<Value> + Send + Sync + 'static,
        G: Fn(Value) -> Result<S> + Send + Sync + 'static,
    {
        Self {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }

    /// Convert `state` to a document; a panicking serializer is reported as
    /// a serialization error.
    pub fn serialize(&self, state: &S) -> Result<Value> {
        catch_unwind(AssertUnwindSafe(|| (self.serialize)(state)))
            .unwrap_or_else(|_| Err(HydrateError::serialization("state serializer panicked")))
    }

    /// Convert a document back to state; a panicking deserializer is reported
    /// as a serialization error.
    pub fn deserialize(&self, document: Value) -> Result<S> {
        catch_unwind(AssertUnwindSafe(|| (self.deserialize)(document)))
            .unwrap_or_else(|_| Err(HydrateError::serialization("state deserializer panicked")))
    }
}

impl<S> StateCodec<S>
where
    S: Serialize + DeserializeOwned,
{
    /// Codec backed by the type's serde implementations.
    pub fn serde() -> Self {
        Self::new(
            |state: &S| {
                serde_json::to_value(state).map_err(|e| HydrateError::serialization(e.to_string()))
            },
            |document| {
                serde_json::from_value(document)
                    .map_err(|e| HydrateError::serialization(e.to_string()))
            },
        )
    }
}

impl<S> Clone for StateCodec<S> {
    fn clone(&self) -> Self {
        Self {
            serialize: Arc::clone(&self.serialize),
            deserialize: Arc::clone(&self.deserialize),
        }
    }
}

impl<S> fmt::Debug for StateCodec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCodec").finish_non_exhaustive()
    }
}
