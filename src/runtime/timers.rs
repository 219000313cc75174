use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::providers::{HistoryStore, QueueKind, WorkItem};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    fire_at_ms: u64,
    instance: String,
    id: u64,
}

/// In-process timer wheel. Schedules arrive over a channel; due timers are
/// turned into `TimerFired` work items on the orchestrator queue.
pub(crate) struct TimerService {
    store: Arc<dyn HistoryStore>,
    rx: mpsc::UnboundedReceiver<WorkItem>,
    heap: BinaryHeap<Reverse<Pending>>,
}

impl TimerService {
    pub(crate) fn start(store: Arc<dyn HistoryStore>) -> (JoinHandle<()>, mpsc::UnboundedSender<WorkItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let svc = Self {
            store,
            rx,
            heap: BinaryHeap::new(),
        };
        (tokio::spawn(svc.run()), tx)
    }

    async fn run(mut self) {
        loop {
            let wait = self
                .heap
                .peek()
                .map(|Reverse(next)| Duration::from_millis(next.fire_at_ms.saturating_sub(now_ms())));
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(WorkItem::TimerSchedule { instance, id, fire_at_ms }) => {
                        debug!(instance, id, fire_at_ms, "timer armed");
                        self.heap.push(Reverse(Pending { fire_at_ms, instance, id }));
                    }
                    Some(other) => error!(?other, "unexpected work item sent to timer service"),
                    None => break,
                },
                _ = tokio::time::sleep(wait.unwrap_or(Duration::ZERO)), if wait.is_some() => {
                    self.fire_due().await;
                }
            }
        }
    }

    async fn fire_due(&mut self) {
        let now = now_ms();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.fire_at_ms > now {
                break;
            }
            let Some(Reverse(due)) = self.heap.pop() else { break };
            let item = WorkItem::TimerFired {
                instance: due.instance.clone(),
                id: due.id,
                fire_at_ms: due.fire_at_ms,
            };
            if let Err(e) = self.store.enqueue_work(QueueKind::Orchestrator, item).await {
                warn!(instance = %due.instance, id = due.id, error = %e, "failed to enqueue fired timer; retrying shortly");
                self.heap.push(Reverse(Pending {
                    fire_at_ms: now + 50,
                    ..due
                }));
                break;
            }
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::in_memory::InMemoryHistoryStore;

    #[tokio::test]
    async fn fires_in_deadline_order() {
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let (_jh, tx) = TimerService::start(store.clone());
        let base = now_ms();
        tx.send(WorkItem::TimerSchedule { instance: "p1".into(), id: 2, fire_at_ms: base + 60 }).unwrap();
        tx.send(WorkItem::TimerSchedule { instance: "p1".into(), id: 1, fire_at_ms: base + 20 }).unwrap();

        let mut fired = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while fired.len() < 2 && std::time::Instant::now() < deadline {
            if let Some((item, token)) = store.dequeue_peek_lock(QueueKind::Orchestrator).await {
                store.ack(QueueKind::Orchestrator, &token).await.unwrap();
                if let WorkItem::TimerFired { id, .. } = item {
                    fired.push(id);
                }
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        assert_eq!(fired, vec![1, 2]);
        assert!(now_ms() >= base + 60);
    }

    #[tokio::test]
    async fn past_deadlines_fire_immediately() {
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let (_jh, tx) = TimerService::start(store.clone());
        tx.send(WorkItem::TimerSchedule { instance: "p1".into(), id: 7, fire_at_ms: 1 }).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (item, _) = store.dequeue_peek_lock(QueueKind::Orchestrator).await.unwrap();
        assert_eq!(item, WorkItem::TimerFired { instance: "p1".into(), id: 7, fire_at_ms: 1 });
    }
}
