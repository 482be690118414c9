/*!
# Hydrate Core Engine

Versioned state hydration: persist one serializable state value under a key,
restore it later, and upgrade documents written by older schema versions on
the way back in.

This crate provides:

- A storage capability with one-time, shared backend initialization
- Memory and local filesystem backends behind a pluggable async trait
- A versioned `{"version", "data"}` envelope with legacy document support
- Migration chains that turn old documents into current typed state
- Debounced and batched saves
- Lifecycle events for observability

## Architecture

The core follows hexagonal architecture principles:
- The hydrator only sees strings going in and out of a `StorageBackend`
- State types are opaque and converted through a `StateCodec`
- Backends and event sinks are adapters that can be swapped freely

## Usage

```rust
use hydrate_core::{HydratorBuilder, MemoryBackend, StorageCapability};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Counter {
    value: String,
    count: u32,
}

# #[tokio::main]
# async fn main() -> hydrate_core::Result<()> {
let storage = StorageCapability::shared(MemoryBackend::new());
let hydrator = HydratorBuilder::<Counter>::serde("test_key")
    .storage(storage)
    .build()?;

let state = Counter { value: "test".into(), count: 42 };
assert!(hydrator.save(&state).await);
assert_eq!(hydrator.load().await, Some(state));
# Ok(())
# }
```
*/

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod hydrator;
pub mod migration;
pub mod observability;
pub mod storage;


pub use codec::StateCodec;
pub use config::{create_storage_from_config, HydratorConfig, StorageBackendKind, StorageConfig};
pub use envelope::Envelope;
pub use error::{HydrateError, Result};
pub use events::{
    ChannelEventSink, EventSink, HydrationEvent, HydrationEventKind, HydrationOperation,
    RecordingEventSink, TracingEventSink,
};
pub use hydrator::{Hydrator, HydratorBuilder, Validator};
pub use migration::{MigrationChain, MigrationStep};
#[cfg(feature = "metrics")]
pub use observability::{HydrationMetrics, MetricsEventSink};
#[cfg(feature = "local")]
pub use storage::LocalFileBackend;
pub use storage::{MemoryBackend, StorageBackend, StorageCapability};
