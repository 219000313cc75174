use std::sync::Arc;

use crate::runtime::OrchestrationHandler;
use crate::{Event, TurnResult, run_turn_with};

/// Replay a registered handler over `history` and poll it once.
///
/// `replay_frontier` is the number of events an earlier turn already saw;
/// pass `usize::MAX` for read-only replays.
pub(crate) fn replay_handler(
    history: Vec<Event>,
    replay_frontier: usize,
    handler: Arc<dyn OrchestrationHandler>,
    input: String,
) -> TurnResult<Result<String, String>> {
    let orchestrator = |ctx: crate::OrchestrationContext| {
        let h = handler.clone();
        let inp = input.clone();
        async move { h.invoke(ctx, inp).await }
    };
    run_turn_with(history, replay_frontier, orchestrator)
}

/// Name and input recorded by `OrchestrationStarted`.
pub(crate) fn started_info(history: &[Event]) -> Option<(String, String)> {
    history.iter().find_map(|e| match e {
        Event::OrchestrationStarted { name, input } => Some((name.clone(), input.clone())),
        _ => None,
    })
}
