use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tokio::{fs, io::AsyncWriteExt};

use super::{HistoryStore, QueueKind, WorkItem, dedupe_completions};
use crate::Event;

/// Filesystem-backed store: one JSONL file per instance, one JSONL file per
/// queue, and a sidecar file per peek-locked item.
///
/// ```text
/// <root>/instances/<instance>.jsonl
/// <root>/queues/{orch,work,timer}.jsonl
/// <root>/.locks/{orch,work,timer}/<token>.lock
/// ```
#[derive(Clone)]
pub struct FsHistoryStore {
    root: PathBuf,
    // Appends take the write half so readers never observe part of a turn
    history_lock: Arc<RwLock<()>>,
    queue_lock: Arc<Mutex<()>>,
    token_seq: Arc<AtomicU64>,
}

impl FsHistoryStore {
    /// Create a new store rooted at the given directory path.
    /// If `reset_on_create` is true, delete any existing data under the root first.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let path = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&path);
        }
        // best-effort create
        let _ = std::fs::create_dir_all(path.join("instances"));
        let _ = std::fs::create_dir_all(path.join("queues"));
        Self {
            root: path,
            history_lock: Arc::new(RwLock::new(())),
            queue_lock: Arc::new(Mutex::new(())),
            token_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn instance_path(&self, instance: &str) -> PathBuf {
        self.root.join("instances").join(format!("{instance}.jsonl"))
    }

    fn queue_file(&self, kind: QueueKind) -> PathBuf {
        self.root.join("queues").join(format!("{}.jsonl", queue_name(kind)))
    }

    fn lock_dir(&self, kind: QueueKind) -> PathBuf {
        self.root.join(".locks").join(queue_name(kind))
    }

    fn lock_path(&self, kind: QueueKind, token: &str) -> PathBuf {
        self.lock_dir(kind).join(format!("{token}.lock"))
    }

    async fn read_unlocked(&self, instance: &str) -> Vec<Event> {
        let data = fs::read_to_string(self.instance_path(instance)).await.unwrap_or_default();
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Event>(line).ok())
            .collect()
    }

    fn next_token(&self) -> String {
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.token_seq.fetch_add(1, Ordering::Relaxed);
        // Fixed width keeps lexical order equal to issue order
        format!("{now_ns:032x}-{seq:016x}")
    }
}

fn queue_name(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::Orchestrator => "orch",
        QueueKind::Worker => "work",
        QueueKind::Timer => "timer",
    }
}

fn read_queue(path: &Path) -> Vec<WorkItem> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .filter_map(|l| serde_json::from_str::<WorkItem>(l).ok())
        .collect()
}

// Rewrite through a temp file so a crash leaves either the old or new queue
fn write_queue(path: &Path, items: &[WorkItem]) -> Result<(), String> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut tf = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| e.to_string())?;
        for it in items {
            let line = serde_json::to_string(it).map_err(|e| e.to_string())?;
            tf.write_all(line.as_bytes()).map_err(|e| e.to_string())?;
            tf.write_all(b"\n").map_err(|e| e.to_string())?;
        }
        tf.sync_all().map_err(|e| e.to_string())?;
    }
    std::fs::rename(&tmp, path).map_err(|e| e.to_string())
}

#[async_trait::async_trait]
impl HistoryStore for FsHistoryStore {
    async fn read(&self, instance: &str) -> Vec<Event> {
        let _guard = self.history_lock.read().await;
        self.read_unlocked(instance).await
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String> {
        let _guard = self.history_lock.write().await;
        let path = self.instance_path(instance);
        if !fs::try_exists(&path).await.map_err(|e| e.to_string())? {
            return Err(format!("instance not found: {instance}"));
        }
        let existing = self.read_unlocked(instance).await;
        let fresh = dedupe_completions(&existing, new_events);
        if fresh.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for ev in &fresh {
            buf.push_str(&serde_json::to_string(ev).map_err(|e| e.to_string())?);
            buf.push('\n');
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| e.to_string())?;
        file.write_all(buf.as_bytes()).await.map_err(|e| e.to_string())?;
        file.sync_data().await.map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn reset(&self) {
        let _h = self.history_lock.write().await;
        let _q = self.queue_lock.lock().await;
        let _ = fs::remove_dir_all(&self.root).await;
        let _ = fs::create_dir_all(self.root.join("instances")).await;
        let _ = fs::create_dir_all(self.root.join("queues")).await;
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(mut rd) = fs::read_dir(self.root.join("instances")).await {
            while let Ok(Some(ent)) = rd.next_entry().await {
                if let Some(name) = ent.file_name().to_str()
                    && let Some(stem) = name.strip_suffix(".jsonl")
                {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        out
    }

    async fn dump_all_pretty(&self) -> String {
        let mut out = String::new();
        for inst in self.list_instances().await {
            out.push_str(&format!("instance={inst}\n"));
            for ev in self.read(&inst).await {
                out.push_str(&format!("  {ev:?}\n"));
            }
        }
        out
    }

    async fn create_instance(&self, instance: &str) -> Result<(), String> {
        let _guard = self.history_lock.write().await;
        fs::create_dir_all(self.root.join("instances"))
            .await
            .map_err(|e| e.to_string())?;
        // create_new makes the existence check and the creation one step
        fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(self.instance_path(instance))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => format!("instance already exists: {instance}"),
                _ => e.to_string(),
            })?;
        Ok(())
    }

    async fn remove_instance(&self, instance: &str) -> Result<(), String> {
        let _guard = self.history_lock.write().await;
        let path = self.instance_path(instance);
        if !fs::try_exists(&path).await.map_err(|e| e.to_string())? {
            return Err(format!("instance not found: {instance}"));
        }
        fs::remove_file(&path).await.map_err(|e| e.to_string())
    }

    async fn enqueue_work(&self, kind: QueueKind, item: WorkItem) -> Result<(), String> {
        let _guard = self.queue_lock.lock().await;
        let qf = self.queue_file(kind);
        let mut items = read_queue(&qf);
        if items.contains(&item) {
            return Ok(());
        }
        items.push(item);
        write_queue(&qf, &items)
    }

    async fn dequeue_peek_lock(&self, kind: QueueKind) -> Option<(WorkItem, String)> {
        let _guard = self.queue_lock.lock().await;
        let qf = self.queue_file(kind);
        let mut items = read_queue(&qf);
        if items.is_empty() {
            return None;
        }
        let first = items.remove(0);
        // Persist the lock before shrinking the queue so the item is never only in memory
        let token = self.next_token();
        std::fs::create_dir_all(self.lock_dir(kind)).ok()?;
        let line = serde_json::to_string(&first).ok()?;
        std::fs::write(self.lock_path(kind, &token), line).ok()?;
        if write_queue(&qf, &items).is_err() {
            let _ = std::fs::remove_file(self.lock_path(kind, &token));
            return None;
        }
        Some((first, token))
    }

    async fn ack(&self, kind: QueueKind, token: &str) -> Result<(), String> {
        let _guard = self.queue_lock.lock().await;
        let path = self.lock_path(kind, token);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn abandon(&self, kind: QueueKind, token: &str) -> Result<(), String> {
        let _guard = self.queue_lock.lock().await;
        let path = self.lock_path(kind, token);
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        let item: WorkItem = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        let qf = self.queue_file(kind);
        let mut items = read_queue(&qf);
        items.insert(0, item);
        write_queue(&qf, &items)?;
        std::fs::remove_file(&path).map_err(|e| e.to_string())
    }

    async fn recover_locked(&self) -> Result<usize, String> {
        let _guard = self.queue_lock.lock().await;
        let mut recovered = 0;
        for kind in [QueueKind::Orchestrator, QueueKind::Worker, QueueKind::Timer] {
            let dir = self.lock_dir(kind);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut locks: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "lock"))
                .collect();
            if locks.is_empty() {
                continue;
            }
            locks.sort();
            let mut restored = Vec::with_capacity(locks.len());
            for path in &locks {
                let data = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
                if let Ok(item) = serde_json::from_str::<WorkItem>(&data) {
                    restored.push(item);
                }
            }
            let qf = self.queue_file(kind);
            let queued = read_queue(&qf);
            recovered += restored.len();
            restored.extend(queued.into_iter());
            write_queue(&qf, &restored)?;
            for path in locks {
                std::fs::remove_file(&path).map_err(|e| e.to_string())?;
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_survives_reopen() {
        let td = tempfile::tempdir().unwrap();
        {
            let store = FsHistoryStore::new(td.path(), true);
            store.create_instance("p1").await.unwrap();
            store
                .append(
                    "p1",
                    vec![
                        Event::OrchestrationStarted { name: "O".into(), input: "{}".into() },
                        Event::TimerCreated { id: 1, fire_at_ms: 42 },
                    ],
                )
                .await
                .unwrap();
        }
        let store = FsHistoryStore::new(td.path(), false);
        assert_eq!(store.list_instances().await, vec!["p1".to_string()]);
        let hist = store.read("p1").await;
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[1], Event::TimerCreated { id: 1, fire_at_ms: 42 });
    }

    #[tokio::test]
    async fn append_dedupes_completions() {
        let td = tempfile::tempdir().unwrap();
        let store = FsHistoryStore::new(td.path(), true);
        store.create_instance("p1").await.unwrap();
        let fired = Event::TimerFired { id: 1, fire_at_ms: 5 };
        store.append("p1", vec![fired.clone()]).await.unwrap();
        store.append("p1", vec![fired]).await.unwrap();
        assert_eq!(store.read("p1").await.len(), 1);
    }

    #[tokio::test]
    async fn locked_items_are_recovered_after_reopen() {
        let td = tempfile::tempdir().unwrap();
        let item = WorkItem::TimerSchedule { instance: "p1".into(), id: 3, fire_at_ms: 99 };
        {
            let store = FsHistoryStore::new(td.path(), true);
            store.enqueue_work(QueueKind::Timer, item.clone()).await.unwrap();
            let (locked, _token) = store.dequeue_peek_lock(QueueKind::Timer).await.unwrap();
            assert_eq!(locked, item);
            assert!(store.dequeue_peek_lock(QueueKind::Timer).await.is_none());
        }
        let store = FsHistoryStore::new(td.path(), false);
        assert_eq!(store.recover_locked().await.unwrap(), 1);
        let (again, token) = store.dequeue_peek_lock(QueueKind::Timer).await.unwrap();
        assert_eq!(again, item);
        store.ack(QueueKind::Timer, &token).await.unwrap();
        assert_eq!(store.recover_locked().await.unwrap(), 0);
    }
}
