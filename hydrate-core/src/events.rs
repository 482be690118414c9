/*!
Lifecycle notifications for load and save operations.

Sinks are observers only: whatever a sink does, including panicking, has no
effect on the result of the operation that emitted the event.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationOperation {
    Load,
    Save,
}

/// Lifecycle stage reported by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationEventKind {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for HydrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Save => "save",
        })
    }
}

impl fmt::Display for HydrationEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// A single lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationEvent {
    /// Storage key of the hydrator that emitted the event
    pub key: String,
    pub operation: HydrationOperation,
    pub kind: HydrationEventKind,
    /// Failure reason, only set on `Failed`
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HydrationEvent {
    pub fn new(key: impl Into<String>, operation: HydrationOperation, kind: HydrationEventKind) -> Self {
        Self {
            key: key.into(),
            operation,
            kind,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        key: impl Into<String>,
        operation: HydrationOperation,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(key, operation, HydrationEventKind::Failed)
        }
    }
}

/// Receiver of lifecycle events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &HydrationEvent);
}

impl<F> EventSink for F
where
    F: Fn(&HydrationEvent) + Send + Sync,
{
    fn emit(&self, event: &HydrationEvent) {
        self(event)
    }
}

/// Deliver `event` to `sink`, containing any panic raised by the sink.
pub(crate) fn dispatch(sink: &dyn EventSink, event: &HydrationEvent) {
    if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
        error!(
            key = %event.key,
            operation = %event.operation,
            kind = %event.kind,
            "Event sink panicked; event dropped"
        );
    }
}

/// Default sink: writes events to the `tracing` log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &HydrationEvent) {
        match (&event.kind, &event.error) {
            (HydrationEventKind::Failed, Some(reason)) => warn!(
                key = %event.key,
                operation = %event.operation,
                reason = %reason,
                "Hydration failed"
            ),
            _ => debug!(
                key = %event.key,
                operation = %event.operation,
                kind = %event.kind,
                "Hydration event"
            ),
        }
    }
}

/// Sink that keeps every event it receives
///
/// Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<HydrationEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HydrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds of the recorded events for one operation, in order
    pub fn kinds(&self, operation: HydrationOperation) -> Vec<HydrationEventKind> {
        self.events()
            .into_iter()
            .filter(|e| e.operation == operation)
            .map(|e| e.kind)
            .collect()
    }

    pub fn last(&self) -> Option<HydrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &HydrationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Sink that forwards events into an unbounded channel
///
/// Once the receiver is dropped, events are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<HydrationEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HydrationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &HydrationEvent) {
        let _ = self.sender.send(event.clone());
    }
}
