use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;

use crate::_typed_codec::{Codec, Json};
use crate::{ActivityError, OrchestrationContext};

#[derive(Debug, Clone)]
pub(crate) enum Kind {
    Activity { id: u64 },
    Timer { id: u64 },
    Signal,
}

/// Output of a resolved `DurableFuture`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableOutput {
    Activity(Result<String, ActivityError>),
    Timer,
    Signal { name: String, data: String },
}

/// A future correlated to a history entry. It stays pending until the
/// matching completion is present in history, then resolves exactly once.
pub struct DurableFuture {
    kind: Kind,
    ctx: OrchestrationContext,
    done: bool,
}

impl DurableFuture {
    pub(crate) fn new(kind: Kind, ctx: OrchestrationContext) -> Self {
        Self { kind, ctx, done: false }
    }

    fn completion_index(&self) -> Option<usize> {
        if self.done {
            return None;
        }
        self.ctx.completion_index(&self.kind)
    }

    fn take(&mut self, idx: usize) -> DurableOutput {
        self.done = true;
        self.ctx.consume(&self.kind, idx)
    }

    /// Await an activity result.
    pub fn into_activity(self) -> impl Future<Output = Result<String, ActivityError>> + Send {
        async move {
            match self.await {
                DurableOutput::Activity(result) => result,
                other => panic!("activity future resolved to {other:?}"),
            }
        }
    }

    /// Await an activity result and decode its JSON output.
    pub fn into_activity_typed<Out: DeserializeOwned>(self) -> impl Future<Output = Result<Out, ActivityError>> + Send {
        async move {
            let raw = self.into_activity().await?;
            Json::decode::<Out>(&raw)
                .map_err(|e| ActivityError::terminal("MALFORMED_OUTPUT", format!("could not decode activity output: {e}")))
        }
    }

    /// Await a timer.
    pub fn into_timer(self) -> impl Future<Output = ()> + Send {
        async move {
            match self.await {
                DurableOutput::Timer => (),
                other => panic!("timer future resolved to {other:?}"),
            }
        }
    }

    /// Await a signal; yields `(name, data)`.
    pub fn into_signal(self) -> impl Future<Output = (String, String)> + Send {
        async move {
            match self.await {
                DurableOutput::Signal { name, data } => (name, data),
                other => panic!("signal future resolved to {other:?}"),
            }
        }
    }
}

impl Future for DurableFuture {
    type Output = DurableOutput;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<DurableOutput> {
        let this = self.get_mut();
        match this.completion_index() {
            Some(idx) => Poll::Ready(this.take(idx)),
            None => Poll::Pending,
        }
    }
}

impl Drop for DurableFuture {
    fn drop(&mut self) {
        if let (false, Kind::Timer { id }) = (self.done, &self.kind) {
            self.ctx.retire_timer(*id);
        }
    }
}

/// Resolves to `(winner_index, output)` for the child whose completion sits
/// at the smallest history index. Only the winner is consumed.
pub struct SelectFuture {
    children: Vec<DurableFuture>,
}

impl SelectFuture {
    pub(crate) fn new(children: Vec<DurableFuture>) -> Self {
        Self { children }
    }
}

impl Future for SelectFuture {
    type Output = (usize, DurableOutput);

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let winner = this
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.completion_index().map(|idx| (idx, i)))
            .min();
        match winner {
            Some((idx, i)) => Poll::Ready((i, this.children[i].take(idx))),
            None => Poll::Pending,
        }
    }
}
