use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::_typed_codec::{Codec, Json};
use crate::config::RuntimeConfig;
use crate::providers::fs::FsHistoryStore;
use crate::providers::in_memory::InMemoryHistoryStore;
use crate::providers::{HistoryStore, QueueKind, WorkItem};
use crate::{Action, ActivityError, Event, OrchestrationContext, RuntimeError};

pub mod completions;
pub mod registry;
pub mod retry;
pub mod status;

mod replay;
mod timers;

pub use registry::{ActivityRegistry, ActivityRegistryBuilder, OrchestrationRegistry, OrchestrationRegistryBuilder};
pub use retry::{ActivityOptions, RetryPolicy};

/// Signal name reserved for operator cancellation.
pub const CANCEL_SIGNAL: &str = "__cancel";

/// High-level orchestration status derived from history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationStatus {
    NotFound,
    Running,
    Completed { output: String },
    Failed { error: String },
}

/// Trait implemented by orchestration handlers that can be invoked by the runtime.
#[async_trait]
pub trait OrchestrationHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `OrchestrationHandler`.
pub struct FnOrchestration<F, Fut>(pub F)
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> OrchestrationHandler for FnOrchestration<F, Fut>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

/// In-process runtime that executes activities and timers and persists
/// history via a `HistoryStore`.
///
/// One orchestrator dispatcher applies every delivery, so turns of the same
/// instance never overlap. Activities run on their own tasks.
pub struct Runtime {
    joins: Mutex<Vec<JoinHandle<()>>>,
    history_store: Arc<dyn HistoryStore>,
    orchestration_registry: OrchestrationRegistry,
    activity_registry: Arc<ActivityRegistry>,
    config: RuntimeConfig,
    signal_seq: AtomicU64,
}

impl Runtime {
    /// Start a new runtime with a custom `HistoryStore` implementation.
    pub async fn start_with_store(
        history_store: Arc<dyn HistoryStore>,
        activity_registry: Arc<ActivityRegistry>,
        orchestration_registry: OrchestrationRegistry,
    ) -> Arc<Self> {
        Self::start_with_config(history_store, activity_registry, orchestration_registry, RuntimeConfig::default()).await
    }

    /// Open the store named by the config: filesystem when `store_dir` is set,
    /// in-memory otherwise.
    pub fn store_from_config(config: &RuntimeConfig) -> Arc<dyn HistoryStore> {
        match &config.store_dir {
            Some(dir) => Arc::new(FsHistoryStore::new(dir, false)),
            None => Arc::new(InMemoryHistoryStore::default()),
        }
    }

    pub async fn start_with_config(
        history_store: Arc<dyn HistoryStore>,
        activity_registry: Arc<ActivityRegistry>,
        orchestration_registry: OrchestrationRegistry,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        crate::logging::init_tracing();

        let runtime = Arc::new(Self {
            joins: Mutex::new(Vec::new()),
            history_store,
            orchestration_registry,
            activity_registry,
            config,
            signal_seq: AtomicU64::new(0),
        });

        // Items locked by a previous process are owed to this one
        match runtime.history_store.recover_locked().await {
            Ok(0) => {}
            Ok(n) => info!(items = n, "recovered locked work items"),
            Err(e) => warn!(error = %e, "failed to recover locked work items"),
        }
        runtime.rehydrate_pending().await;

        let handles = vec![
            runtime.clone().start_orchestration_dispatcher(),
            runtime.clone().start_work_dispatcher(),
            runtime.clone().start_timer_dispatcher(),
        ];
        runtime.joins.lock().await.extend(handles);
        runtime
    }

    /// Abort background tasks. Durable state stays in the store for a later runtime.
    pub async fn shutdown(self: Arc<Self>) {
        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
    }

    // ---------------- client operations

    /// Start a new instance. Fails with `AlreadyExists` if the id is in use by
    /// an instance that has not finished; a finished instance is replaced.
    pub async fn start_orchestration(
        &self,
        instance: &str,
        orchestration_name: &str,
        input: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        if !valid_instance_id(instance) {
            return Err(RuntimeError::InvalidInstanceId(instance.to_string()));
        }
        if self.orchestration_registry.get(orchestration_name).is_none() {
            return Err(RuntimeError::UnknownOrchestration(orchestration_name.to_string()));
        }
        let existing = self.history_store.read(instance).await;
        if !existing.is_empty() {
            if !existing.iter().any(Event::is_terminal) {
                return Err(RuntimeError::AlreadyExists(instance.to_string()));
            }
            info!(instance, "replacing finished instance");
            self.history_store
                .remove_instance(instance)
                .await
                .map_err(RuntimeError::Store)?;
        }
        self.history_store.create_instance(instance).await.map_err(|e| {
            if e.contains("already exists") {
                RuntimeError::AlreadyExists(instance.to_string())
            } else {
                RuntimeError::Store(e)
            }
        })?;
        self.history_store
            .append(
                instance,
                vec![Event::OrchestrationStarted {
                    name: orchestration_name.to_string(),
                    input: input.into(),
                }],
            )
            .await
            .map_err(RuntimeError::Store)?;
        self.history_store
            .enqueue_work(
                QueueKind::Orchestrator,
                WorkItem::StartOrchestration {
                    instance: instance.to_string(),
                },
            )
            .await
            .map_err(RuntimeError::Store)?;
        info!(instance, orchestration = orchestration_name, "orchestration started");
        Ok(())
    }

    /// Enqueue a signal for an instance. Fire-and-forget: delivery happens on
    /// the orchestrator dispatcher in receipt order.
    pub async fn raise_event(
        &self,
        instance: &str,
        name: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        let name = name.into();
        let signal_id = self.next_signal_id();
        self.history_store
            .enqueue_work(
                QueueKind::Orchestrator,
                WorkItem::SignalRaised {
                    instance: instance.to_string(),
                    signal_id,
                    name: name.clone(),
                    data: data.into(),
                },
            )
            .await
            .map_err(RuntimeError::Store)?;
        debug!(instance, signal = %name, "signal enqueued");
        Ok(())
    }

    /// Start the instance if it does not exist (or has finished), then raise
    /// the signal.
    pub async fn signal_with_start(
        &self,
        instance: &str,
        orchestration_name: &str,
        input: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        match self.start_orchestration(instance, orchestration_name, input).await {
            Ok(()) | Err(RuntimeError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        self.raise_event(instance, name, data).await
    }

    /// Ask a running instance to stop. The logic observes the request at its
    /// next wait point.
    pub async fn cancel_instance(&self, instance: &str, reason: impl Into<String>) -> Result<(), RuntimeError> {
        info!(instance, "cancellation requested");
        self.raise_event(instance, CANCEL_SIGNAL, reason).await
    }

    /// Replay the instance over a snapshot of its history and return the last
    /// status the logic published. Nothing is appended or dispatched.
    pub async fn query_status(&self, instance: &str) -> Result<Option<String>, RuntimeError> {
        let history = self.history_store.read(instance).await;
        let (name, input) =
            replay::started_info(&history).ok_or_else(|| RuntimeError::NotFound(instance.to_string()))?;
        let handler = self
            .orchestration_registry
            .get(&name)
            .ok_or(RuntimeError::UnknownOrchestration(name))?;
        let turn = replay::replay_handler(history, usize::MAX, handler, input);
        Ok(turn.custom_status)
    }

    pub async fn query_status_typed<T: DeserializeOwned>(&self, instance: &str) -> Result<Option<T>, RuntimeError> {
        match self.query_status(instance).await? {
            Some(raw) => Json::decode(&raw).map(Some).map_err(RuntimeError::Codec),
            None => Ok(None),
        }
    }

    fn next_signal_id(&self) -> String {
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.signal_seq.fetch_add(1, Ordering::Relaxed);
        format!("{now_ns:x}-{seq:x}")
    }

    // ---------------- dispatchers

    fn start_orchestration_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some((item, token)) = self.history_store.dequeue_peek_lock(QueueKind::Orchestrator).await else {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                };
                match self.apply_delivery(item).await {
                    Ok(()) => {
                        let _ = self.history_store.ack(QueueKind::Orchestrator, &token).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "delivery failed; returning item to queue");
                        let _ = self.history_store.abandon(QueueKind::Orchestrator, &token).await;
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                }
            }
        })
    }

    /// Record one delivery in history and run the turn it triggers. The
    /// completion and every event the turn produced are appended together.
    async fn apply_delivery(&self, item: WorkItem) -> Result<(), String> {
        let Some((instance, incoming)) = completions::event_for(item.clone()) else {
            error!(?item, "unexpected work item on orchestrator queue; dropping");
            return Ok(());
        };
        let instance = instance.as_str();
        let mut history = self.history_store.read(instance).await;
        if history.is_empty() {
            warn!(instance, "delivery for unknown instance dropped");
            return Ok(());
        }
        if history.iter().any(Event::is_terminal) {
            debug!(instance, "delivery for finished instance dropped");
            return Ok(());
        }
        let Some((name, input)) = replay::started_info(&history) else {
            error!(instance, "history has no start event");
            return Ok(());
        };

        let prior_len = history.len();
        // The very first turn has nothing to replay
        let frontier = match &incoming {
            None if prior_len == 1 => 0,
            None => {
                debug!(instance, "duplicate start delivery dropped");
                return Ok(());
            }
            Some(ev) if !completions::accepts(&history, ev) => {
                debug!(instance, event = ?ev, "stale or duplicate completion dropped");
                return Ok(());
            }
            Some(_) => prior_len,
        };
        history.extend(incoming);

        let Some(handler) = self.orchestration_registry.get(&name) else {
            let error = format!("orchestration '{name}' is not registered");
            error!(instance, %error);
            let mut deltas = history.split_off(prior_len);
            deltas.push(Event::OrchestrationFailed { error });
            return self.history_store.append(instance, deltas).await;
        };

        let mut turn = replay::replay_handler(history, frontier, handler, input);
        crate::logging::flush(instance, std::mem::take(&mut turn.logs));

        let terminal = match (turn.failure.take(), turn.output.take()) {
            (Some(error), _) => {
                error!(instance, %error, "orchestration failed");
                Some(Event::OrchestrationFailed { error })
            }
            (None, Some(Ok(output))) => {
                info!(instance, "orchestration completed");
                Some(Event::OrchestrationCompleted { output })
            }
            (None, Some(Err(error))) => {
                warn!(instance, %error, "orchestration returned an error");
                Some(Event::OrchestrationFailed { error })
            }
            (None, None) => None,
        };

        let split_at = prior_len.min(turn.history.len());
        let mut deltas = turn.history.split_off(split_at);
        let finished = terminal.is_some();
        deltas.extend(terminal);
        self.history_store.append(instance, deltas).await?;

        if !finished {
            self.dispatch_actions(instance, turn.actions).await;
        }
        Ok(())
    }

    async fn dispatch_actions(&self, instance: &str, actions: Vec<Action>) {
        for action in actions {
            let (kind, item) = match action {
                Action::CallActivity { id, name, input } => (
                    QueueKind::Worker,
                    WorkItem::ActivityExecute {
                        instance: instance.to_string(),
                        id,
                        name,
                        input,
                    },
                ),
                Action::CreateTimer { id, fire_at_ms } => (
                    QueueKind::Timer,
                    WorkItem::TimerSchedule {
                        instance: instance.to_string(),
                        id,
                        fire_at_ms,
                    },
                ),
            };
            // The schedule event is already durable; a restart re-enqueues it if this fails
            if let Err(e) = self.history_store.enqueue_work(kind, item).await {
                warn!(instance, error = %e, "failed to dispatch action");
            }
        }
    }

    fn start_work_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(self.config.max_concurrent_activities));
            // Dropping the set on abort cancels in-flight activities
            let mut running: JoinSet<()> = JoinSet::new();
            loop {
                while running.try_join_next().is_some() {}
                let Some((item, token)) = self.history_store.dequeue_peek_lock(QueueKind::Worker).await else {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                };
                let (instance, id, name, input) = match item {
                    WorkItem::ActivityExecute { instance, id, name, input } => (instance, id, name, input),
                    other => {
                        error!(?other, "unexpected work item on worker queue; dropping");
                        let _ = self.history_store.ack(QueueKind::Worker, &token).await;
                        continue;
                    }
                };
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let rt = self.clone();
                running.spawn(async move {
                    rt.execute_activity(instance, id, name, input).await;
                    let _ = rt.history_store.ack(QueueKind::Worker, &token).await;
                    drop(permit);
                });
            }
        })
    }

    async fn execute_activity(&self, instance: String, id: u64, name: String, input: String) {
        let outcome = match self.activity_registry.get(&name) {
            Some(activity) => retry::execute_with_retry(&instance, &name, activity.handler, input, &activity.options).await,
            None => {
                error!(instance, activity = %name, "activity is not registered");
                Err(ActivityError::terminal(
                    "UNREGISTERED_ACTIVITY",
                    format!("activity '{name}' is not registered"),
                ))
            }
        };
        let item = match outcome {
            Ok(result) => WorkItem::ActivityCompleted {
                instance: instance.clone(),
                id,
                result,
            },
            Err(error) => WorkItem::ActivityFailed {
                instance: instance.clone(),
                id,
                error,
            },
        };
        if let Err(e) = self.history_store.enqueue_work(QueueKind::Orchestrator, item).await {
            error!(instance, activity = %name, error = %e, "failed to enqueue activity outcome");
        }
    }

    fn start_timer_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (svc_jh, svc_tx) = timers::TimerService::start(self.history_store.clone());
            // Abort the service together with this dispatcher
            struct AbortOnDrop(JoinHandle<()>);
            impl Drop for AbortOnDrop {
                fn drop(&mut self) {
                    self.0.abort();
                }
            }
            let _svc = AbortOnDrop(svc_jh);
            loop {
                let Some((item, token)) = self.history_store.dequeue_peek_lock(QueueKind::Timer).await else {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                };
                match item {
                    WorkItem::TimerSchedule { .. } => {
                        if svc_tx.send(item).is_err() {
                            let _ = self.history_store.abandon(QueueKind::Timer, &token).await;
                            break;
                        }
                    }
                    other => error!(?other, "unexpected work item on timer queue; dropping"),
                }
                let _ = self.history_store.ack(QueueKind::Timer, &token).await;
            }
        })
    }
}

fn valid_instance_id(instance: &str) -> bool {
    !instance.is_empty()
        && instance.len() <= 128
        && instance
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
