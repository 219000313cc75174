//! Pure replay tests: `run_turn` against hand-built histories, no runtime.
use roomflow::{Action, DurableOutput, Event, OrchestrationContext, run_turn, run_turn_with};

fn scheduled(id: u64, name: &str, input: &str) -> Event {
    Event::ActivityScheduled {
        id,
        name: name.into(),
        input: input.into(),
    }
}

fn completed(id: u64, result: &str) -> Event {
    Event::ActivityCompleted {
        id,
        result: result.into(),
    }
}

fn signal(n: u32, name: &str, data: &str) -> Event {
    Event::SignalReceived {
        signal_id: format!("sig-{n}"),
        name: name.into(),
        data: data.into(),
    }
}

#[test]
fn first_turn_records_actions_in_poll_order() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("A", "1");
        let t = ctx.schedule_timer(500);
        // Nothing has completed in the first turn
        let _ = ctx.select2(a, t).await;
    };

    let turn = run_turn::<(), _>(Vec::new(), orchestrator);
    let kinds: Vec<&'static str> = turn
        .actions
        .iter()
        .map(|a| match a {
            Action::CallActivity { .. } => "CallActivity",
            Action::CreateTimer { .. } => "CreateTimer",
        })
        .collect();
    assert_eq!(kinds, vec!["CallActivity", "CreateTimer"]);
    assert!(turn.output.is_none());
    assert!(turn.failure.is_none());
    // Schedule events are part of the returned history
    assert!(matches!(turn.history[0], Event::ActivityScheduled { id: 1, .. }));
    assert!(matches!(turn.history[1], Event::TimerCreated { id: 2, .. }));
}

#[test]
fn replay_of_completed_history_produces_no_new_actions() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("A", "1").into_activity().await.unwrap();
        let b = ctx.schedule_activity("B", a).into_activity().await.unwrap();
        format!("done:{b}")
    };
    let history = vec![scheduled(1, "A", "1"), completed(1, "2"), scheduled(2, "B", "2"), completed(2, "2b")];

    let turn = run_turn(history.clone(), orchestrator);
    assert_eq!(turn.output.as_deref(), Some("done:2b"));
    assert!(turn.actions.is_empty());
    assert_eq!(turn.history, history);
}

#[test]
fn changed_activity_name_is_flagged_as_nondeterminism() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        ctx.schedule_activity("Renamed", "1").into_activity().await.ok();
    };
    let turn = run_turn(vec![scheduled(1, "A", "1"), completed(1, "x")], orchestrator);
    let failure = turn.failure.expect("replay mismatch must be reported");
    assert!(failure.contains("nondeterministic"), "{failure}");
}

#[test]
fn timer_recorded_where_activity_is_expected_is_flagged() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        ctx.schedule_activity("A", "1").into_activity().await.ok();
    };
    let history = vec![Event::TimerCreated { id: 1, fire_at_ms: 10 }];
    let turn = run_turn(history, orchestrator);
    assert!(turn.failure.is_some());
}

#[test]
fn panic_in_logic_becomes_turn_failure() {
    let orchestrator = |_ctx: OrchestrationContext| async move {
        panic!("state invariant broken");
    };
    let turn = run_turn::<(), _>(Vec::new(), orchestrator);
    let failure = turn.failure.expect("panic must be reported");
    assert!(failure.contains("state invariant broken"), "{failure}");
    assert!(turn.output.is_none());
}

#[test]
fn select_prefers_earliest_completion_in_history() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("A", "");
        let t = ctx.schedule_timer(1_000);
        let (winner, _) = ctx.select2(a, t).await;
        winner
    };
    let base = vec![scheduled(1, "A", ""), Event::TimerCreated { id: 2, fire_at_ms: 1_000 }];

    let mut timer_first = base.clone();
    timer_first.push(Event::TimerFired { id: 2, fire_at_ms: 1_000 });
    timer_first.push(completed(1, "late"));
    assert_eq!(run_turn(timer_first, orchestrator).output, Some(1));

    let mut activity_first = base;
    activity_first.push(completed(1, "early"));
    activity_first.push(Event::TimerFired { id: 2, fire_at_ms: 1_000 });
    assert_eq!(run_turn(activity_first, orchestrator).output, Some(0));
}

#[test]
fn select_over_many_picks_earliest_and_leaves_the_rest() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("A", "");
        let b = ctx.schedule_activity("B", "");
        let t = ctx.schedule_timer(60_000);
        let (winner, output) = ctx.select(vec![a, b, t]).await;
        let _next = ctx.schedule_activity("Next", "");
        (winner, output)
    };
    let history = vec![
        scheduled(1, "A", ""),
        scheduled(2, "B", ""),
        Event::TimerCreated { id: 3, fire_at_ms: 60_000 },
        completed(2, "b"),
        completed(1, "a"),
    ];
    let turn = run_turn(history, orchestrator);
    let (winner, output) = turn.output.expect("select resolves");
    assert_eq!(winner, 1);
    assert_eq!(output, DurableOutput::Activity(Ok("b".to_string())));
    assert!(matches!(turn.actions.as_slice(), [Action::CallActivity { id: 4, .. }]));
}

#[test]
fn replaying_flag_clears_past_the_frontier() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let mut seen = vec![ctx.is_replaying()];
        ctx.next_signal().into_signal().await;
        seen.push(ctx.is_replaying());
        ctx.next_signal().into_signal().await;
        seen.push(ctx.is_replaying());
        seen
    };
    let history = vec![signal(1, "one", ""), signal(2, "two", "")];
    let turn = run_turn_with(history, 1, orchestrator);
    assert_eq!(turn.output, Some(vec![true, true, false]));
}

#[test]
fn select_loser_keeps_its_signal_for_the_next_wait() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let s = ctx.next_signal();
        let t = ctx.schedule_timer(5);
        let (winner, _) = ctx.select2(s, t).await;
        let (name, _) = ctx.next_signal().into_signal().await;
        (winner, name)
    };
    let history = vec![
        Event::TimerCreated { id: 1, fire_at_ms: 5 },
        Event::TimerFired { id: 1, fire_at_ms: 5 },
        signal(1, "approve", ""),
    ];
    let turn = run_turn(history, orchestrator);
    assert_eq!(turn.output, Some((1, "approve".to_string())));
}

fn cancelled_timers(history: &[Event]) -> Vec<u64> {
    history
        .iter()
        .filter_map(|e| match e {
            Event::TimerCancelled { id } => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn select_loser_timer_is_retired_but_a_suspended_timer_is_not() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let s = ctx.next_signal();
        let t = ctx.schedule_timer(60_000);
        let (winner, _) = ctx.select2(s, t).await;
        ctx.schedule_timer(60_000).into_timer().await;
        winner
    };
    let history = vec![Event::TimerCreated { id: 1, fire_at_ms: 60_000 }, signal(1, "go", "")];

    let turn = run_turn(history, orchestrator);
    assert!(turn.output.is_none());
    // The second timer is still awaited when the turn ends
    assert_eq!(cancelled_timers(&turn.history), vec![1]);
    assert!(matches!(turn.actions.as_slice(), [Action::CreateTimer { id: 2, .. }]));

    let replay = run_turn(turn.history.clone(), orchestrator);
    assert!(replay.actions.is_empty());
    assert!(replay.failure.is_none());
    assert_eq!(cancelled_timers(&replay.history), vec![1]);
}

#[test]
fn fired_loser_timer_is_not_cancelled() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let s = ctx.next_signal();
        let t = ctx.schedule_timer(5);
        let (winner, _) = ctx.select2(s, t).await;
        winner
    };
    let history = vec![
        Event::TimerCreated { id: 1, fire_at_ms: 5 },
        signal(1, "go", ""),
        Event::TimerFired { id: 1, fire_at_ms: 5 },
    ];
    let turn = run_turn(history, orchestrator);
    assert_eq!(turn.output, Some(0));
    assert!(cancelled_timers(&turn.history).is_empty());
}

#[test]
fn signals_are_consumed_in_receipt_order() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let mut seen = Vec::new();
        for _ in 0..3 {
            match ctx.next_signal().await {
                DurableOutput::Signal { name, data } => seen.push(format!("{name}={data}")),
                other => panic!("unexpected {other:?}"),
            }
        }
        seen
    };
    let history = vec![signal(1, "a", "1"), signal(2, "b", "2"), signal(3, "a", "3")];
    let turn = run_turn(history, orchestrator);
    assert_eq!(turn.output, Some(vec!["a=1".to_string(), "b=2".to_string(), "a=3".to_string()]));
}

#[test]
fn logs_are_suppressed_for_replayed_events() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        ctx.trace_info("before first");
        let (first, _) = ctx.next_signal().into_signal().await;
        ctx.trace_info(format!("got {first}"));
        let (second, _) = ctx.next_signal().into_signal().await;
        ctx.trace_info(format!("got {second}"));
        ctx.set_custom_status(second.clone());
        second
    };
    let history = vec![signal(1, "one", ""), signal(2, "two", "")];

    // Everything below index 1 was seen by an earlier turn
    let turn = run_turn_with(history.clone(), 1, orchestrator);
    let messages: Vec<&str> = turn.logs.iter().map(|(_, m)| m.as_str()).collect();
    assert_eq!(messages, vec!["got two"]);
    assert_eq!(turn.custom_status.as_deref(), Some("two"));

    let query = run_turn_with(history, usize::MAX, orchestrator);
    assert!(query.logs.is_empty());
    assert_eq!(query.output.as_deref(), Some("two"));
}
