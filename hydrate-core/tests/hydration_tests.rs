/*!
End-to-end tests for the hydrate engine.
These tests drive hydrators against real backends, from typed state down to
the stored text and back.
*/

use hydrate_core::{
    create_storage_from_config, ChannelEventSink, HydrateError, HydrationEventKind,
    HydrationOperation, Hydrator, HydratorBuilder, LocalFileBackend, MemoryBackend,
    RecordingEventSink, StateCodec, StorageCapability, StorageConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Counter {
    value: String,
    count: u32,
}

fn counter(value: &str, count: u32) -> Counter {
    Counter {
        value: value.to_string(),
        count,
    }
}

/// Version 3 of a user profile: `name` split into parts in v2, `theme` added in v3.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Profile {
    first_name: String,
    last_name: String,
    #[serde(default)]
    theme: Option<String>,
}

fn profile_hydrator(storage: Arc<StorageCapability>) -> Hydrator<Profile> {
    HydratorBuilder::<Profile>::serde("profile")
        .version(3)
        .migration(1, 2, |doc| {
            let full = doc["name"].as_str().unwrap_or_default();
            let (first, last) = full.split_once(' ').unwrap_or((full, ""));
            Ok(Profile {
                first_name: first.to_string(),
                last_name: last.to_string(),
                theme: None,
            })
        })
        .migration(2, 3, |doc| {
            let mut profile: Profile = serde_json::from_value(doc)?;
            profile.theme.get_or_insert_with(|| "light".to_string());
            Ok(profile)
        })
        .storage(storage)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_round_trip_through_local_files() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageCapability::shared(LocalFileBackend::new(temp_dir.path()));
    let hydrator = HydratorBuilder::<Counter>::serde("test_key")
        .storage(storage)
        .build()
        .unwrap();

    let state = counter("test", 42);
    assert!(hydrator.save(&state).await);

    let stored = std::fs::read_to_string(temp_dir.path().join("test_key.json")).unwrap();
    assert_eq!(stored, r#"{"version":1,"data":{"value":"test","count":42}}"#);

    assert_eq!(hydrator.load().await, Some(state));
}

#[tokio::test]
async fn test_state_survives_a_new_hydrator() {
    let temp_dir = TempDir::new().unwrap();
    {
        let storage = StorageCapability::shared(LocalFileBackend::new(temp_dir.path()));
        let hydrator = HydratorBuilder::<Counter>::serde("session")
            .storage(storage)
            .build()
            .unwrap();
        assert!(hydrator.save(&counter("persisted", 7)).await);
    }

    let storage = create_storage_from_config(&StorageConfig::local_with_base_path(
        temp_dir.path(),
    ))
    .unwrap();
    let hydrator = HydratorBuilder::<Counter>::serde("session")
        .storage(storage)
        .build()
        .unwrap();
    assert_eq!(hydrator.load().await, Some(counter("persisted", 7)));
}

#[tokio::test]
async fn test_version_less_document_loads_as_version_one() {
    let backend = MemoryBackend::new().with_entry("test_key", r#"{"data":{"value":"test","count":3}}"#);
    let hydrator = HydratorBuilder::<Counter>::serde("test_key")
        .storage(StorageCapability::shared(backend))
        .build()
        .unwrap();

    assert_eq!(hydrator.load().await, Some(counter("test", 3)));
}

#[tokio::test]
async fn test_pre_envelope_document_is_migrated() {
    let backend = MemoryBackend::new().with_entry("profile", r#"{"name":"Ada Lovelace"}"#);
    let hydrator = profile_hydrator(StorageCapability::shared(backend));

    assert_eq!(
        hydrator.load().await,
        Some(Profile {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            theme: Some("light".into()),
        })
    );
}

#[tokio::test]
async fn test_migration_chain_applies_every_step() {
    let backend = MemoryBackend::new()
        .with_entry("profile", r#"{"version":1,"data":{"name":"Grace Hopper"}}"#);
    let hydrator = profile_hydrator(StorageCapability::shared(backend.clone()));

    let profile = hydrator.load().await.unwrap();
    assert_eq!(profile.first_name, "Grace");
    assert_eq!(profile.last_name, "Hopper");
    assert_eq!(profile.theme.as_deref(), Some("light"));

    // Loading never rewrites the stored record.
    assert_eq!(
        backend.raw("profile").as_deref(),
        Some(r#"{"version":1,"data":{"name":"Grace Hopper"}}"#)
    );

    assert!(hydrator.save(&profile).await);
    let stored: serde_json::Value = serde_json::from_str(&backend.raw("profile").unwrap()).unwrap();
    assert_eq!(stored["version"], 3);
}

#[tokio::test]
async fn test_partial_chain_starts_midway() {
    let backend = MemoryBackend::new().with_entry(
        "profile",
        r#"{"version":2,"data":{"first_name":"Alan","last_name":"Turing","theme":"dark"}}"#,
    );
    let hydrator = profile_hydrator(StorageCapability::shared(backend));

    let profile = hydrator.load().await.unwrap();
    assert_eq!(profile.theme.as_deref(), Some("dark"));
}

#[tokio::test]
async fn test_current_version_document_skips_migrations() {
    let backend = MemoryBackend::new().with_entry(
        "profile",
        r#"{"version":3,"data":{"first_name":"Edsger","last_name":"Dijkstra"}}"#,
    );
    let hydrator = profile_hydrator(StorageCapability::shared(backend));

    // A migration would have filled in the theme.
    assert_eq!(hydrator.load().await.unwrap().theme, None);
}

#[tokio::test]
async fn test_missing_migration_path_reports_failure() {
    let events = RecordingEventSink::new();
    let backend = MemoryBackend::new().with_entry("profile", r#"{"version":1,"data":{}}"#);
    let hydrator = HydratorBuilder::<Profile>::serde("profile")
        .version(3)
        .migration(2, 3, |doc| serde_json::from_value(doc).map_err(Into::into))
        .event_sink(events.clone())
        .storage(StorageCapability::shared(backend))
        .build()
        .unwrap();

    assert_eq!(hydrator.load().await, None);
    let failure = events.last().unwrap();
    assert_eq!(failure.kind, HydrationEventKind::Failed);
    assert!(failure.error.unwrap().contains("no migration path"));
    assert!(matches!(
        hydrator.try_load().await,
        Err(HydrateError::Migration(_))
    ));
}

#[tokio::test]
async fn test_save_all_reports_partial_failure() {
    let codec = StateCodec::new(
        |state: &Counter| {
            if state.value == "poison" {
                return Err(HydrateError::serialization("refusing to encode poison"));
            }
            serde_json::to_value(state).map_err(Into::into)
        },
        |doc| serde_json::from_value(doc).map_err(Into::into),
    );
    let backend = MemoryBackend::new();
    let hydrator = Hydrator::builder("test_key", codec)
        .storage(StorageCapability::shared(backend.clone()))
        .build()
        .unwrap();

    let states = vec![counter("good", 1), counter("poison", 2)];
    assert!(!hydrator.save_all(&states).await);
    assert_eq!(backend.write_count(), 1);
    assert_eq!(hydrator.load().await, Some(counter("good", 1)));

    assert!(hydrator.save_all(&[counter("a", 1), counter("b", 2)]).await);
    assert!(hydrator.save_all(&Vec::<Counter>::new()).await);
}

#[tokio::test]
async fn test_hydrators_share_one_capability() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageCapability::shared(LocalFileBackend::new(temp_dir.path().join("state")));

    let counters = HydratorBuilder::<Counter>::serde("counters")
        .storage(Arc::clone(&storage))
        .build()
        .unwrap();
    let profiles = profile_hydrator(Arc::clone(&storage));

    let first = counter("x", 1);
    let second = Profile {
        first_name: "Barbara".into(),
        last_name: "Liskov".into(),
        theme: None,
    };
    let (a, b) = tokio::join!(counters.save(&first), profiles.save(&second));
    assert!(a && b);
    assert!(storage.is_initialized());

    assert!(counters.clear().await);
    assert_eq!(counters.load().await, None);
    assert!(profiles.load().await.is_some());
}

#[tokio::test]
async fn test_event_stream_reports_lifecycle() {
    let (sink, mut events) = ChannelEventSink::new();
    let backend = MemoryBackend::new();
    let hydrator = HydratorBuilder::<Counter>::serde("test_key")
        .event_sink(sink)
        .storage(StorageCapability::shared(backend.clone()))
        .build()
        .unwrap();

    assert!(hydrator.save(&counter("v", 1)).await);
    backend.set_raw("test_key", "{{{");
    assert_eq!(hydrator.load().await, None);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.operation, event.kind));
    }
    assert_eq!(
        seen,
        vec![
            (HydrationOperation::Save, HydrationEventKind::Started),
            (HydrationOperation::Save, HydrationEventKind::Completed),
            (HydrationOperation::Load, HydrationEventKind::Started),
            (HydrationOperation::Load, HydrationEventKind::Failed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_debounce_windows_are_independent() {
    let backend = MemoryBackend::new();
    let hydrator = Arc::new(
        HydratorBuilder::<Counter>::serde("test_key")
            .storage(StorageCapability::shared(backend.clone()))
            .build()
            .unwrap(),
    );
    let delay = Duration::from_millis(100);

    let first = {
        let hydrator = Arc::clone(&hydrator);
        tokio::spawn(async move { hydrator.save_with_debounce(counter("first", 1), delay).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = {
        let hydrator = Arc::clone(&hydrator);
        tokio::spawn(async move { hydrator.save_with_debounce(counter("second", 2), delay).await })
    };

    // The first timer would have fired at 100ms; the second call pushed it out.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.write_count(), 0);

    assert!(first.await.unwrap());
    assert!(second.await.unwrap());
    assert_eq!(backend.write_count(), 1);
    assert_eq!(hydrator.load().await, Some(counter("second", 2)));

    assert!(hydrator.save_with_debounce(counter("third", 3), delay).await);
    assert_eq!(backend.write_count(), 2);
    assert_eq!(hydrator.load().await, Some(counter("third", 3)));
}

#[tokio::test]
async fn test_unwritable_directory_fails_initialization() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let events = RecordingEventSink::new();
    let hydrator = HydratorBuilder::<Counter>::serde("test_key")
        .event_sink(events.clone())
        .storage(StorageCapability::shared(LocalFileBackend::new(blocker.join("state"))))
        .build()
        .unwrap();

    assert_eq!(hydrator.load().await, None);
    assert!(!hydrator.save(&counter("x", 1)).await);
    assert!(matches!(
        hydrator.try_load().await,
        Err(HydrateError::Initialization(_))
    ));
    assert!(events
        .events()
        .iter()
        .filter(|e| e.kind == HydrationEventKind::Failed)
        .all(|e| e.error.as_deref().unwrap_or_default().starts_with("Initialization error")));
}

#[tokio::test]
async fn test_validator_sees_envelope() {
    let backend = MemoryBackend::new();
    let storage = StorageCapability::shared(backend.clone());
    let hydrator = HydratorBuilder::<Counter>::serde("test_key")
        .validator(|doc| doc["data"]["count"].is_u64() && doc["version"] == json!(1))
        .storage(storage)
        .build()
        .unwrap();

    assert!(hydrator.save(&counter("ok", 5)).await);
    assert_eq!(hydrator.load().await, Some(counter("ok", 5)));

    backend.set_raw("test_key", r#"{"version":1,"data":{"value":"bad","count":"five"}}"#);
    assert_eq!(hydrator.load().await, None);
}
