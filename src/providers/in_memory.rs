use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use super::{HistoryStore, QueueKind, WorkItem, dedupe_completions};
use crate::Event;

#[derive(Default)]
struct State {
    histories: HashMap<String, Vec<Event>>,
    queues: HashMap<QueueKind, VecDeque<WorkItem>>,
    locked: HashMap<String, (QueueKind, WorkItem)>,
    next_token: u64,
}

/// Process-local store. Histories and queues live behind one lock, so every
/// read observes whole appends.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    state: Mutex<State>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read(&self, instance: &str) -> Vec<Event> {
        let state = self.state.lock().await;
        state.histories.get(instance).cloned().unwrap_or_default()
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String> {
        let mut state = self.state.lock().await;
        let history = state
            .histories
            .get_mut(instance)
            .ok_or_else(|| format!("instance not found: {instance}"))?;
        let fresh = dedupe_completions(history, new_events);
        history.extend(fresh);
        Ok(())
    }

    async fn reset(&self) {
        *self.state.lock().await = State::default();
    }

    async fn list_instances(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut out: Vec<String> = state.histories.keys().cloned().collect();
        out.sort();
        out
    }

    async fn dump_all_pretty(&self) -> String {
        let state = self.state.lock().await;
        let mut names: Vec<&String> = state.histories.keys().collect();
        names.sort();
        let mut out = String::new();
        for inst in names {
            out.push_str(&format!("instance={inst}\n"));
            for ev in &state.histories[inst] {
                out.push_str(&format!("  {ev:?}\n"));
            }
        }
        out
    }

    async fn create_instance(&self, instance: &str) -> Result<(), String> {
        let mut state = self.state.lock().await;
        if state.histories.contains_key(instance) {
            return Err(format!("instance already exists: {instance}"));
        }
        state.histories.insert(instance.to_string(), Vec::new());
        Ok(())
    }

    async fn remove_instance(&self, instance: &str) -> Result<(), String> {
        let mut state = self.state.lock().await;
        state
            .histories
            .remove(instance)
            .map(|_| ())
            .ok_or_else(|| format!("instance not found: {instance}"))
    }

    async fn enqueue_work(&self, kind: QueueKind, item: WorkItem) -> Result<(), String> {
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(kind).or_default();
        if !queue.contains(&item) {
            queue.push_back(item);
        }
        Ok(())
    }

    async fn dequeue_peek_lock(&self, kind: QueueKind) -> Option<(WorkItem, String)> {
        let mut state = self.state.lock().await;
        let item = state.queues.get_mut(&kind)?.pop_front()?;
        state.next_token += 1;
        let token = format!("mem-{}", state.next_token);
        state.locked.insert(token.clone(), (kind, item.clone()));
        Some((item, token))
    }

    async fn ack(&self, _kind: QueueKind, token: &str) -> Result<(), String> {
        self.state.lock().await.locked.remove(token);
        Ok(())
    }

    async fn abandon(&self, _kind: QueueKind, token: &str) -> Result<(), String> {
        let mut state = self.state.lock().await;
        if let Some((kind, item)) = state.locked.remove(token) {
            state.queues.entry(kind).or_default().push_front(item);
        }
        Ok(())
    }

    async fn recover_locked(&self) -> Result<usize, String> {
        let mut state = self.state.lock().await;
        let mut locked: Vec<(String, (QueueKind, WorkItem))> = state.locked.drain().collect();
        // Tokens are issued in increasing order; restore the original queue order
        locked.sort_by_key(|(token, _)| token.trim_start_matches("mem-").parse::<u64>().unwrap_or(0));
        let count = locked.len();
        for (_, (kind, item)) in locked.into_iter().rev() {
            state.queues.entry(kind).or_default().push_front(item);
        }
        Ok(count)
    }
}
