//! Durable, replay-driven lifecycle engine for room-redesign projects.
//!
//! The crate is split in two halves:
//!
//! - A deterministic orchestration core in the style of Durable Task. Every
//!   instance owns an append-only [`Event`] history. Logic runs against an
//!   [`OrchestrationContext`] that schedules activities, timers and signal
//!   waits by correlation id, and the [`runtime::Runtime`] replays that logic
//!   turn by turn against a [`providers::HistoryStore`].
//! - The [`project`] lifecycle built on top of it: phase sequencing, guard
//!   conditions, the bounded refinement loop, restart and cancellation.
//!
//! Public entry points:
//!
//! - Data model: [`Event`], [`Action`]
//! - Replay driver: [`run_turn`], [`run_turn_with`], [`TurnResult`]
//! - Composition: [`DurableFuture`], [`SelectFuture`], [`DurableOutput`]
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod futures;
pub mod logging;
pub mod project;
pub mod providers;
pub mod runtime;

pub use error::{ActivityError, ErrorCategory, RuntimeError};
pub use futures::{DurableFuture, DurableOutput, SelectFuture};
pub use logging::LogLevel;
pub use runtime::{OrchestrationRegistry, OrchestrationStatus, Runtime};

use crate::_typed_codec::{Codec, Json};
use crate::futures::Kind;

// Internal codec utilities for typed I/O (kept private; public API remains ergonomic)
pub(crate) mod _typed_codec {
    use serde::{Serialize, de::DeserializeOwned};
    use serde_json::Value;

    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, String>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    }

    pub struct Json;

    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, String> {
            // A bare JSON string is stored raw so string payloads stay readable in history
            match serde_json::to_value(v) {
                Ok(Value::String(s)) => Ok(s),
                Ok(val) => serde_json::to_string(&val).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }

        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(first) => {
                    // Fallback: treat raw string as JSON string value
                    serde_json::from_value(Value::String(s.to_string())).map_err(|_| first.to_string())
                }
            }
        }
    }
}

/// Append-only orchestration history entries persisted by a provider and
/// consumed during replay. Schedule events and their completions are paired
/// by a correlation `id` allocated deterministically by the context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// Instance was created for the named orchestration with the given input.
    OrchestrationStarted { name: String, input: String },
    /// Orchestration completed with a final result.
    OrchestrationCompleted { output: String },
    /// Orchestration failed; also used for replay defects and logic panics.
    OrchestrationFailed { error: String },

    /// Activity was scheduled with a unique ID and input.
    ActivityScheduled { id: u64, name: String, input: String },
    /// Activity completed successfully with a result.
    ActivityCompleted { id: u64, result: String },
    /// Activity failed after the runtime exhausted its retry policy.
    ActivityFailed { id: u64, error: ActivityError },

    /// Timer was created and will fire at `fire_at_ms` (wall clock, ms since epoch).
    TimerCreated { id: u64, fire_at_ms: u64 },
    /// Timer fired.
    TimerFired { id: u64, fire_at_ms: u64 },
    /// The logic stopped waiting on a timer before it fired, e.g. the timer
    /// lost a select. A later firing is dropped without a turn.
    TimerCancelled { id: u64 },

    /// An external signal was received. Signals are consumed in history order.
    SignalReceived { signal_id: String, name: String, data: String },
}

impl Event {
    /// True for events that end an instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. }
        )
    }
}

/// Declarative decisions produced by an orchestration turn. The runtime
/// materializes them into provider work items after the turn is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Schedule an activity invocation.
    CallActivity { id: u64, name: String, input: String },
    /// Arm a durable timer.
    CreateTimer { id: u64, fire_at_ms: u64 },
}

#[derive(Debug)]
struct CtxInner {
    history: Vec<Event>,
    actions: Vec<Action>,
    next_correlation_id: u64,
    // Number of signals the logic has consumed so far in this replay
    signal_cursor: usize,
    // History indices below the frontier were already observed by an earlier turn
    replay_frontier: usize,
    replaying: bool,
    log_buffer: Vec<(LogLevel, String)>,
    custom_status: Option<String>,
    nondeterminism: Option<String>,
    // Set once the poll returns; futures dropped afterwards are suspended, not abandoned
    turn_over: bool,
}

impl CtxInner {
    fn new(history: Vec<Event>, replay_frontier: usize) -> Self {
        Self {
            history,
            actions: Vec::new(),
            next_correlation_id: 1,
            signal_cursor: 0,
            replay_frontier,
            replaying: replay_frontier > 0,
            log_buffer: Vec::new(),
            custom_status: None,
            nondeterminism: None,
            turn_over: false,
        }
    }

    fn record_action(&mut self, a: Action) {
        // A new decision means the logic is past the replayed prefix
        self.replaying = false;
        self.actions.push(a);
    }

    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_correlation_id;
        self.next_correlation_id += 1;
        id
    }

    fn scheduled_at(&self, id: u64) -> Option<&Event> {
        self.history.iter().find(|e| match e {
            Event::ActivityScheduled { id: sid, .. } | Event::TimerCreated { id: sid, .. } => *sid == id,
            _ => false,
        })
    }

    fn retire_timer(&mut self, id: u64) {
        if self.turn_over {
            return;
        }
        let settled = self.history.iter().any(|e| {
            matches!(e, Event::TimerFired { id: tid, .. } | Event::TimerCancelled { id: tid } if *tid == id)
        });
        if !settled {
            self.history.push(Event::TimerCancelled { id });
        }
    }

    fn flag_nondeterminism(&mut self, msg: String) {
        if self.nondeterminism.is_none() {
            self.nondeterminism = Some(msg);
        }
    }

    /// History index of the completion for a scheduled item, if any.
    fn completion_index(&self, kind: &Kind) -> Option<usize> {
        match kind {
            Kind::Activity { id } => self.history.iter().position(|e| match e {
                Event::ActivityCompleted { id: cid, .. } | Event::ActivityFailed { id: cid, .. } => cid == id,
                _ => false,
            }),
            Kind::Timer { id } => self
                .history
                .iter()
                .position(|e| matches!(e, Event::TimerFired { id: cid, .. } if cid == id)),
            Kind::Signal => self
                .history
                .iter()
                .enumerate()
                .filter(|(_, e)| matches!(e, Event::SignalReceived { .. }))
                .nth(self.signal_cursor)
                .map(|(idx, _)| idx),
        }
    }

    fn consume(&mut self, kind: &Kind, idx: usize) -> DurableOutput {
        if idx >= self.replay_frontier {
            self.replaying = false;
        }
        match (kind, &self.history[idx]) {
            (Kind::Activity { .. }, Event::ActivityCompleted { result, .. }) => DurableOutput::Activity(Ok(result.clone())),
            (Kind::Activity { .. }, Event::ActivityFailed { error, .. }) => DurableOutput::Activity(Err(error.clone())),
            (Kind::Timer { .. }, Event::TimerFired { .. }) => DurableOutput::Timer,
            (Kind::Signal, Event::SignalReceived { name, data, .. }) => {
                self.signal_cursor += 1;
                DurableOutput::Signal {
                    name: name.clone(),
                    data: data.clone(),
                }
            }
            (kind, event) => unreachable!("completion index for {kind:?} points at {event:?}"),
        }
    }
}

/// User-facing orchestration context for scheduling and replay-safe helpers.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    /// Construct a new context from an existing history vector. Every event is
    /// treated as new, so logs are emitted from the start.
    pub fn new(history: Vec<Event>) -> Self {
        Self::with_frontier(history, 0)
    }

    /// Construct a context whose first `replay_frontier` history entries were
    /// already observed by an earlier turn.
    pub fn with_frontier(history: Vec<Event>, replay_frontier: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(history, replay_frontier))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut CtxInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub(crate) fn completion_index(&self, kind: &Kind) -> Option<usize> {
        self.with(|inner| inner.completion_index(kind))
    }

    pub(crate) fn consume(&self, kind: &Kind, idx: usize) -> DurableOutput {
        self.with(|inner| inner.consume(kind, idx))
    }

    pub(crate) fn retire_timer(&self, id: u64) {
        self.with(|inner| inner.retire_timer(id));
    }

    /// True while the logic is re-executing events an earlier turn already saw.
    pub fn is_replaying(&self) -> bool {
        self.with(|inner| inner.replaying)
    }

    /// Publish a status string readable through runtime queries.
    pub fn set_custom_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.with(|inner| inner.custom_status = Some(status));
    }

    /// Publish a serializable status snapshot.
    pub fn set_custom_status_typed<T: Serialize>(&self, status: &T) {
        let payload = Json::encode(status).expect("custom status must serialize");
        self.set_custom_status(payload);
    }

    /// Buffer a log line for this turn. Lines produced while replaying are
    /// dropped so every message reaches the subscriber once.
    pub fn trace(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.with(|inner| {
            if !inner.replaying {
                inner.log_buffer.push((level, message));
            }
        });
    }

    pub fn trace_info(&self, message: impl Into<String>) {
        self.trace(LogLevel::Info, message);
    }
    pub fn trace_warn(&self, message: impl Into<String>) {
        self.trace(LogLevel::Warn, message);
    }
    pub fn trace_error(&self, message: impl Into<String>) {
        self.trace(LogLevel::Error, message);
    }
    pub fn trace_debug(&self, message: impl Into<String>) {
        self.trace(LogLevel::Debug, message);
    }

    /// Schedule an activity and return a `DurableFuture` correlated to it.
    pub fn schedule_activity(&self, name: impl Into<String>, input: impl Into<String>) -> DurableFuture {
        let name: String = name.into();
        let input: String = input.into();
        let id = self.with(|inner| {
            let id = inner.next_id();
            match inner.scheduled_at(id) {
                Some(Event::ActivityScheduled { name: recorded, .. }) if *recorded == name => {}
                Some(other) => {
                    let msg = format!("nondeterministic replay: id {id} recorded as {other:?} but logic scheduled activity '{name}'");
                    inner.flag_nondeterminism(msg);
                }
                None => {
                    inner.history.push(Event::ActivityScheduled {
                        id,
                        name: name.clone(),
                        input: input.clone(),
                    });
                    inner.record_action(Action::CallActivity { id, name, input });
                }
            }
            id
        });
        DurableFuture::new(Kind::Activity { id }, self.clone())
    }

    /// Typed helper that serializes input; pair with `into_activity_typed`.
    pub fn schedule_activity_typed<In: Serialize>(&self, name: impl Into<String>, input: &In) -> DurableFuture {
        let payload = Json::encode(input).expect("activity input must serialize");
        self.schedule_activity(name, payload)
    }

    /// Schedule a durable timer. The deadline is fixed when the timer is first
    /// recorded; replays adopt the recorded deadline.
    pub fn schedule_timer(&self, delay_ms: u64) -> DurableFuture {
        let id = self.with(|inner| {
            let id = inner.next_id();
            match inner.scheduled_at(id) {
                Some(Event::TimerCreated { .. }) => {}
                Some(other) => {
                    let msg = format!("nondeterministic replay: id {id} recorded as {other:?} but logic scheduled a timer");
                    inner.flag_nondeterminism(msg);
                }
                None => {
                    let fire_at_ms = inner.now_ms().saturating_add(delay_ms);
                    inner.history.push(Event::TimerCreated { id, fire_at_ms });
                    inner.record_action(Action::CreateTimer { id, fire_at_ms });
                }
            }
            id
        });
        DurableFuture::new(Kind::Timer { id }, self.clone())
    }

    /// Wait for the next unconsumed signal, in receipt order.
    pub fn next_signal(&self) -> DurableFuture {
        DurableFuture::new(Kind::Signal, self.clone())
    }

    /// Deterministic select over two futures: returns (winner_index, DurableOutput).
    pub fn select2(&self, a: DurableFuture, b: DurableFuture) -> SelectFuture {
        SelectFuture::new(vec![a, b])
    }

    /// Deterministic select over N futures. The winner is the child whose
    /// completion appears earliest in history; losers are left untouched.
    pub fn select(&self, futures: Vec<DurableFuture>) -> SelectFuture {
        SelectFuture::new(futures)
    }
}

/// Outcome of polling an orchestration once against a history.
#[derive(Debug)]
pub struct TurnResult<O> {
    /// History after the turn, including schedule events recorded by it.
    pub history: Vec<Event>,
    /// New decisions to materialize.
    pub actions: Vec<Action>,
    /// Log lines produced past the replay frontier.
    pub logs: Vec<(LogLevel, String)>,
    /// Final output if the orchestration completed in this turn.
    pub output: Option<O>,
    /// Last status published via `set_custom_status`.
    pub custom_status: Option<String>,
    /// Nondeterminism or panic detected while polling.
    pub failure: Option<String>,
}

/// Poll the orchestrator once with the provided history, treating every
/// event as new.
pub fn run_turn<O, F>(history: Vec<Event>, orchestrator: impl Fn(OrchestrationContext) -> F) -> TurnResult<O>
where
    F: Future<Output = O>,
{
    run_turn_with(history, 0, orchestrator)
}

/// Same as `run_turn` but with an explicit replay frontier. Pass
/// `usize::MAX` for read-only replays (queries).
pub fn run_turn_with<O, F>(
    history: Vec<Event>,
    replay_frontier: usize,
    orchestrator: impl Fn(OrchestrationContext) -> F,
) -> TurnResult<O>
where
    F: Future<Output = O>,
{
    let ctx = OrchestrationContext::with_frontier(history, replay_frontier);
    let polled = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut fut = pin!(orchestrator(ctx.clone()));
        let mut cx = Context::from_waker(Waker::noop());
        let poll = fut.as_mut().poll(&mut cx);
        ctx.with(|inner| inner.turn_over = true);
        poll
    }));
    let (output, panicked) = match polled {
        Ok(Poll::Ready(out)) => (Some(out), None),
        Ok(Poll::Pending) => (None, None),
        Err(payload) => (None, Some(format!("orchestration panicked: {}", panic_message(&*payload)))),
    };
    ctx.with(|inner| TurnResult {
        history: std::mem::take(&mut inner.history),
        actions: std::mem::take(&mut inner.actions),
        logs: std::mem::take(&mut inner.log_buffer),
        output,
        custom_status: inner.custom_status.take(),
        failure: inner.nondeterminism.take().or(panicked),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
