use std::collections::HashSet;

use tracing::{info, warn};

use super::Runtime;
use crate::Event;
use crate::providers::{QueueKind, WorkItem};

/// Convert an orchestrator-queue work item into the history event it records.
/// Returns `None` for items that do not belong on the orchestrator queue.
pub(crate) fn event_for(item: WorkItem) -> Option<(String, Option<Event>)> {
    match item {
        WorkItem::StartOrchestration { instance } => Some((instance, None)),
        WorkItem::ActivityCompleted { instance, id, result } => Some((instance, Some(Event::ActivityCompleted { id, result }))),
        WorkItem::ActivityFailed { instance, id, error } => Some((instance, Some(Event::ActivityFailed { id, error }))),
        WorkItem::TimerFired { instance, id, fire_at_ms } => Some((instance, Some(Event::TimerFired { id, fire_at_ms }))),
        WorkItem::SignalRaised {
            instance,
            signal_id,
            name,
            data,
        } => Some((instance, Some(Event::SignalReceived { signal_id, name, data }))),
        WorkItem::ActivityExecute { .. } | WorkItem::TimerSchedule { .. } => None,
    }
}

/// Whether a completion may be appended to `history`: it must answer a
/// recorded schedule event and must not already be present.
pub(crate) fn accepts(history: &[Event], ev: &Event) -> bool {
    match ev {
        Event::ActivityCompleted { id, .. } | Event::ActivityFailed { id, .. } => {
            let scheduled = history
                .iter()
                .any(|e| matches!(e, Event::ActivityScheduled { id: sid, .. } if sid == id));
            let done = history.iter().any(|e| {
                matches!(e, Event::ActivityCompleted { id: cid, .. } | Event::ActivityFailed { id: cid, .. } if cid == id)
            });
            scheduled && !done
        }
        Event::TimerFired { id, .. } => {
            let created = history
                .iter()
                .any(|e| matches!(e, Event::TimerCreated { id: tid, .. } if tid == id));
            let settled = history.iter().any(|e| {
                matches!(e, Event::TimerFired { id: fid, .. } | Event::TimerCancelled { id: fid } if fid == id)
            });
            created && !settled
        }
        Event::SignalReceived { signal_id, .. } => !history
            .iter()
            .any(|e| matches!(e, Event::SignalReceived { signal_id: sid, .. } if sid == signal_id)),
        _ => false,
    }
}

/// Work a non-terminal history still owes: timers neither fired nor
/// cancelled, activities without a completion, and the first turn if it never ran.
pub fn pending_work(instance: &str, history: &[Event]) -> Vec<(QueueKind, WorkItem)> {
    if history.is_empty() || history.iter().any(Event::is_terminal) {
        return Vec::new();
    }
    let mut out = Vec::new();
    if history.len() == 1 {
        out.push((
            QueueKind::Orchestrator,
            WorkItem::StartOrchestration {
                instance: instance.to_string(),
            },
        ));
        return out;
    }
    let completed_activities: HashSet<u64> = history
        .iter()
        .filter_map(|e| match e {
            Event::ActivityCompleted { id, .. } | Event::ActivityFailed { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let settled_timers: HashSet<u64> = history
        .iter()
        .filter_map(|e| match e {
            Event::TimerFired { id, .. } | Event::TimerCancelled { id } => Some(*id),
            _ => None,
        })
        .collect();
    for e in history {
        match e {
            Event::ActivityScheduled { id, name, input } if !completed_activities.contains(id) => out.push((
                QueueKind::Worker,
                WorkItem::ActivityExecute {
                    instance: instance.to_string(),
                    id: *id,
                    name: name.clone(),
                    input: input.clone(),
                },
            )),
            Event::TimerCreated { id, fire_at_ms } if !settled_timers.contains(id) => out.push((
                QueueKind::Timer,
                WorkItem::TimerSchedule {
                    instance: instance.to_string(),
                    id: *id,
                    fire_at_ms: *fire_at_ms,
                },
            )),
            _ => {}
        }
    }
    out
}

impl Runtime {
    /// Re-enqueue outstanding work for every non-terminal instance so timers
    /// and activities resume after a restart.
    pub(crate) async fn rehydrate_pending(&self) {
        let mut resumed = 0usize;
        for instance in self.history_store.list_instances().await {
            let history = self.history_store.read(&instance).await;
            let work = pending_work(&instance, &history);
            if work.is_empty() {
                continue;
            }
            resumed += 1;
            for (kind, item) in work {
                if let Err(e) = self.history_store.enqueue_work(kind, item).await {
                    warn!(instance, error = %e, "failed to re-enqueue pending work");
                }
            }
        }
        if resumed > 0 {
            info!(instances = resumed, "rehydrated pending work");
        }
    }
}
