use serde::{Deserialize, Serialize};

use crate::{ActivityError, Event};

pub mod fs;
pub mod in_memory;

/// Work items moved between the runtime's dispatchers through provider queues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkItem {
    /// Run the first turn of a freshly created instance.
    StartOrchestration { instance: String },
    ActivityExecute {
        instance: String,
        id: u64,
        name: String,
        input: String,
    },
    ActivityCompleted { instance: String, id: u64, result: String },
    ActivityFailed {
        instance: String,
        id: u64,
        error: ActivityError,
    },
    TimerSchedule { instance: String, id: u64, fire_at_ms: u64 },
    TimerFired { instance: String, id: u64, fire_at_ms: u64 },
    SignalRaised {
        instance: String,
        signal_id: String,
        name: String,
        data: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Orchestrator,
    Worker,
    Timer,
}

/// Durable per-instance event log plus the runtime's work queues.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Full history of an instance; empty if the instance does not exist.
    async fn read(&self, instance: &str) -> Vec<Event>;
    /// Append events atomically. Completions already present are skipped.
    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String>;
    /// Drop every instance and queue.
    async fn reset(&self);
    async fn list_instances(&self) -> Vec<String>;
    async fn dump_all_pretty(&self) -> String;

    /// Create an empty history. Fails if the instance already exists.
    async fn create_instance(&self, instance: &str) -> Result<(), String>;
    async fn remove_instance(&self, instance: &str) -> Result<(), String>;

    /// Enqueue a work item. Enqueueing an item already waiting is a no-op.
    async fn enqueue_work(&self, kind: QueueKind, item: WorkItem) -> Result<(), String>;
    /// Take the head item and hide it behind a lock token until `ack` or `abandon`.
    async fn dequeue_peek_lock(&self, kind: QueueKind) -> Option<(WorkItem, String)>;
    async fn ack(&self, kind: QueueKind, token: &str) -> Result<(), String>;
    /// Return a locked item to the front of its queue.
    async fn abandon(&self, kind: QueueKind, token: &str) -> Result<(), String>;
    /// Return every locked item to its queue. Called once when a runtime
    /// starts, before any dispatcher runs.
    async fn recover_locked(&self) -> Result<usize, String>;
}

/// Identity used to dedupe completion-like events on append.
#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) enum CompletionKey<'a> {
    Activity(u64),
    Timer(u64),
    Signal(&'a str),
    Terminal,
}

pub(crate) fn completion_key(ev: &Event) -> Option<CompletionKey<'_>> {
    match ev {
        Event::ActivityCompleted { id, .. } | Event::ActivityFailed { id, .. } => Some(CompletionKey::Activity(*id)),
        Event::TimerFired { id, .. } => Some(CompletionKey::Timer(*id)),
        Event::SignalReceived { signal_id, .. } => Some(CompletionKey::Signal(signal_id)),
        Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. } => Some(CompletionKey::Terminal),
        _ => None,
    }
}

/// Drop events from `new_events` whose completion key is already in
/// `existing` (or earlier in `new_events`).
pub(crate) fn dedupe_completions(existing: &[Event], new_events: Vec<Event>) -> Vec<Event> {
    use std::collections::HashSet;
    let mut seen: HashSet<CompletionKey<'_>> = existing.iter().filter_map(completion_key).collect();
    let mut keep = Vec::with_capacity(new_events.len());
    for ev in &new_events {
        let dup = match completion_key(ev) {
            Some(key) => !seen.insert(key),
            None => false,
        };
        keep.push(!dup);
    }
    drop(seen);
    new_events
        .into_iter()
        .zip(keep)
        .filter_map(|(ev, keep)| keep.then_some(ev))
        .collect()
}
