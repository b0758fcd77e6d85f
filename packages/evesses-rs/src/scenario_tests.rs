//! End-to-end chain scenarios exercising the whole pipeline.
//!
//! These tests wire real triggers, floodgates, and effects through a live
//! engine and assert on the committed history - the closest thing the crate
//! has to integration tests.

use std::sync::Arc;

use crate::core::{ActionResult, Targets, TimingEvent};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::lifetime::HostLifetime;
use crate::testing::{emit_event, timestamps, timings, TestHost};

#[test]
fn test_lifo_chain_resolution() {
    let mut engine: Engine<()> = Engine::new();

    for name in ["e1", "e2", "e3"] {
        let effect = engine.direct_effect().action(emit_event(name, 2)).build();
        engine.activate_effect(effect, &mut ()).unwrap();
    }
    assert_eq!(engine.chain_len(), 3);

    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(timings(&history), vec!["e3", "e2", "e1"]);
    assert_eq!(timestamps(&history), vec![0, 1, 2]);
}

#[test]
fn test_trigger_cascade() {
    let mut engine: Engine<()> = Engine::new();

    engine
        .on_timing("destroyed")
        .layer(2)
        .action(emit_event("drawn", 2))
        .build();
    engine
        .on_timing("drawn")
        .layer(2)
        .action(emit_event("lp_gained", 2))
        .build();

    let effect = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(timings(&history), vec!["destroyed", "drawn", "lp_gained"]);
}

#[test]
fn test_forbid_floodgate_blocks_tagged_activation() {
    let mut engine: Engine<()> = Engine::new();

    let gate = engine
        .floodgate()
        .name("spell seal")
        .forbid(|_, effect| effect.has_tag("spell"))
        .build();

    let spell = engine
        .direct_effect()
        .tag("spell")
        .action(emit_event("drawn", 2))
        .build();

    let err = engine.activate_effect(spell, &mut ()).unwrap_err();
    match err {
        EngineError::ActionForbidden { reason, floodgate } => {
            assert_eq!(reason, "spell seal");
            assert_eq!(floodgate, gate);
        }
        other => panic!("expected ActionForbidden, got {other}"),
    }
    assert_eq!(engine.chain_len(), 0);

    // Untagged effects pass the same gate.
    let monster = engine
        .direct_effect()
        .tag("monster")
        .action(emit_event("summoned", 2))
        .build();
    engine.activate_effect(monster, &mut ()).unwrap();
    assert_eq!(engine.chain_len(), 1);
}

#[test]
fn test_effect_negation_commits_marker() {
    let mut engine: Engine<()> = Engine::new();

    let effect = engine
        .direct_effect()
        .action(|_: &mut (), _: &Targets| -> Result<ActionResult, EngineError> {
            Err(EngineError::effect_negated("countered"))
        })
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timing, "effect_negated");
    assert_eq!(history[0].layer, 2);
    assert_eq!(history[0].data_str("reason"), Some("countered"));
}

#[test]
fn test_activation_negation_is_silent_and_absorbed() {
    let mut engine: Engine<()> = Engine::new();

    let negated = engine
        .direct_effect()
        .action(|_: &mut (), _: &Targets| -> Result<ActionResult, EngineError> {
            Err(EngineError::activation_negated("solemn judgment"))
        })
        .build();
    let survivor = engine.direct_effect().action(emit_event("drawn", 2)).build();

    // Survivor is below the negated effect on the stack; the chain must
    // keep draining past the negation.
    engine.activate_effect(survivor, &mut ()).unwrap();
    engine.activate_effect(negated, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(timings(&history), vec!["drawn"]);
}

#[test]
fn test_if_you_do_skips_after_doing_nothing() {
    let mut engine: Engine<()> = Engine::new();

    let effect = engine
        .direct_effect()
        .action(|_, _| Ok(ActionResult::none()))
        .and_if_you_do(emit_event("drawn", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert!(engine.get_timing_history().is_empty());
}

#[test]
fn test_if_you_do_runs_after_success() {
    let mut engine: Engine<()> = Engine::new();

    let effect = engine
        .direct_effect()
        .action(|_, _| Ok(ActionResult::some()))
        .and_if_you_do(emit_event("drawn", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(timings(&history), vec!["drawn"]);
}

#[test]
fn test_infinite_loop_cap() {
    let mut engine: Engine<()> = Engine::new();
    engine.set_max_chain_iterations(10);

    engine.on_timing("x").action(emit_event("x", 1)).build();

    let effect = engine.direct_effect().action(emit_event("x", 1)).build();
    engine.activate_effect(effect, &mut ()).unwrap();

    let err = engine.resolve_chain(&mut ()).unwrap_err();
    match err {
        EngineError::InfiniteLoopDetected { iterations } => assert!(iterations > 10),
        other => panic!("expected InfiniteLoopDetected, got {other}"),
    }
}

#[test]
fn test_quiescence_after_ok() {
    let mut engine: Engine<()> = Engine::new();
    engine
        .on_timing("destroyed")
        .layer(2)
        .action(emit_event("drawn", 2))
        .build();

    let effect = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert_eq!(engine.chain_len(), 0);
    assert_eq!(engine.pending_len(), 0);
}

#[test]
fn test_cost_paid_exactly_once_even_when_negated() {
    let mut engine: Engine<TestHost> = Engine::new();
    let mut host = TestHost::new();

    let effect = engine
        .direct_effect()
        .cost(|host: &mut TestHost| {
            host.bump("cost");
            Ok(())
        })
        .action(|_: &mut TestHost, _: &Targets| -> Result<ActionResult, EngineError> {
            Err(EngineError::effect_negated("countered"))
        })
        .build();

    engine.activate_effect(effect, &mut host).unwrap();
    engine.resolve_chain(&mut host).unwrap();

    assert_eq!(host.count("cost"), 1);
    assert_eq!(timings(&engine.get_timing_history()), vec!["effect_negated"]);
}

#[test]
fn test_once_per_turn_counts_the_attempt() {
    let mut engine: Engine<()> = Engine::new();

    let effect = Arc::new(
        engine
            .direct_effect()
            .once_per_turn_keyed("opt:pot")
            .action(emit_event("drawn", 2))
            .build(),
    );

    engine.activate_effect(Arc::clone(&effect), &mut ()).unwrap();

    let err = engine
        .activate_effect(Arc::clone(&effect), &mut ())
        .unwrap_err();
    assert!(matches!(err, EngineError::ConstraintViolated { name } if name == "opt:pot"));

    // Turn rollover clears the slot.
    engine.clear_constraint_tracker();
    engine.activate_effect(effect, &mut ()).unwrap();
    assert_eq!(engine.chain_len(), 2);
}

#[test]
fn test_times_per_turn_allows_up_to_max() {
    let mut engine: Engine<()> = Engine::new();

    let effect = Arc::new(
        engine
            .direct_effect()
            .times_per_turn_keyed(2, "tpt:search")
            .action(emit_event("searched", 2))
            .build(),
    );

    engine.activate_effect(Arc::clone(&effect), &mut ()).unwrap();
    engine.activate_effect(Arc::clone(&effect), &mut ()).unwrap();
    let err = engine.activate_effect(effect, &mut ()).unwrap_err();
    assert!(matches!(err, EngineError::ConstraintViolated { .. }));
}

#[test]
fn test_trigger_lifetime_round_trip() {
    let mut engine: Engine<()> = Engine::new();
    let baseline = engine.active_trigger_count();

    let lifetime = HostLifetime::new();
    engine
        .on_timing("destroyed")
        .layer(2)
        .action(emit_event("drawn", 2))
        .bind_lifetime(&lifetime)
        .build();
    assert_eq!(engine.active_trigger_count(), baseline + 1);

    lifetime.expire();

    // The sweep runs at Request entry; afterwards the registry matches its
    // pre-registration state and the event goes unanswered.
    let effect = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    assert_eq!(engine.active_trigger_count(), baseline);

    engine.resolve_chain(&mut ()).unwrap();
    assert_eq!(timings(&engine.get_timing_history()), vec!["destroyed"]);
}

#[test]
fn test_expired_floodgate_stops_applying() {
    let mut engine: Engine<()> = Engine::new();
    let lifetime = HostLifetime::new();

    engine
        .floodgate()
        .forbid(|_, effect| effect.has_tag("spell"))
        .bind_lifetime(&lifetime)
        .build();

    let spell = Arc::new(
        engine
            .direct_effect()
            .tag("spell")
            .action(emit_event("drawn", 2))
            .build(),
    );

    assert!(engine.activate_effect(Arc::clone(&spell), &mut ()).is_err());

    lifetime.expire();
    engine.activate_effect(spell, &mut ()).unwrap();
    assert_eq!(engine.active_floodgate_count(), 0);
}

#[test]
fn test_segoc_sorter_reorders_batch() {
    fn run(reverse: bool) -> Vec<String> {
        let mut engine: Engine<()> = Engine::new();
        if reverse {
            engine.set_segoc_sorter(|mut batch| {
                batch.reverse();
                batch
            });
        }

        engine
            .on_timing("hit")
            .layer(2)
            .action(emit_event("a", 2))
            .build();
        engine
            .on_timing("hit")
            .layer(2)
            .action(emit_event("b", 2))
            .build();

        let effect = engine.direct_effect().action(emit_event("hit", 2)).build();
        engine.activate_effect(effect, &mut ()).unwrap();
        engine.resolve_chain(&mut ()).unwrap();

        engine
            .get_timing_history()
            .iter()
            .map(|e| e.timing.clone())
            .collect()
    }

    // Responses Request in batch order and resolve LIFO, so the *last*
    // Requested response resolves first.
    assert_eq!(run(false), vec!["hit", "b", "a"]);
    assert_eq!(run(true), vec!["hit", "a", "b"]);
}

#[test]
fn test_optional_trigger_declined_by_prompt() {
    let mut engine: Engine<()> = Engine::new();
    engine.set_optional_trigger_prompt(|_| false);

    engine
        .on_timing("destroyed")
        .layer(2)
        .optional()
        .action(emit_event("drawn", 2))
        .build();

    let effect = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert_eq!(timings(&engine.get_timing_history()), vec!["destroyed"]);
}

#[test]
fn test_optional_trigger_auto_accepted_by_default() {
    let mut engine: Engine<()> = Engine::new();

    engine
        .on_timing("destroyed")
        .layer(2)
        .optional()
        .action(emit_event("drawn", 2))
        .build();

    let effect = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert_eq!(
        timings(&engine.get_timing_history()),
        vec!["destroyed", "drawn"]
    );
}

#[test]
fn test_modify_floodgates_apply_in_layer_order() {
    let mut engine: Engine<()> = Engine::new();

    // Registered high layer first; the low layer must still run first.
    engine
        .floodgate()
        .layer(2)
        .modify(|_, event| {
            let path = event.data_str("path").unwrap_or("").to_string();
            Some(event.clone().with_data("path", path + "b"))
        })
        .build();
    engine
        .floodgate()
        .layer(1)
        .modify(|_, event| {
            let path = event.data_str("path").unwrap_or("").to_string();
            Some(event.clone().with_data("path", path + "a"))
        })
        .build();

    let effect = engine.direct_effect().action(emit_event("hit", 2)).build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(history[0].data_str("path"), Some("ab"));
}

#[test]
fn test_replace_floodgate_substitutes_action() {
    let mut engine: Engine<()> = Engine::new();

    engine
        .floodgate()
        .replace(|_, _pending| {
            Some(crate::floodgate::Replacement::new().with_action(emit_event("fizzle", 2)))
        })
        .build();

    let effect = engine
        .direct_effect()
        .action(emit_event("fireball", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert_eq!(timings(&engine.get_timing_history()), vec!["fizzle"]);
}

#[test]
fn test_replace_floodgates_chain_target_substitutions() {
    let mut engine: Engine<()> = Engine::new();

    engine
        .floodgate()
        .layer(1)
        .replace(|_, _| {
            Some(crate::floodgate::Replacement::new().with_targets(Targets::from("first")))
        })
        .build();
    engine
        .floodgate()
        .layer(2)
        .replace(|_, pending| {
            // Sees the earlier substitution.
            let seen = pending.targets.as_str().unwrap_or("?");
            Some(
                crate::floodgate::Replacement::new()
                    .with_targets(Targets::from(format!("{seen}+second"))),
            )
        })
        .build();

    let effect = engine
        .direct_effect()
        .target(|_| Ok(Targets::from("original")))
        .action(|_, targets: &Targets| {
            Ok(TimingEvent::new("resolved", 2)
                .with_data("targets", targets.as_str().unwrap_or("?")))
        })
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(history[0].data_str("targets"), Some("first+second"));
}

#[test]
fn test_compound_step_error_skips_and_then_but_not_and() {
    let mut engine: Engine<TestHost> = Engine::new();
    let mut host = TestHost::new();

    let effect = engine
        .direct_effect()
        .action(emit_event("main", 2))
        .and_then(|_: &mut TestHost, _: &Targets| -> Result<ActionResult, EngineError> {
            Err(EngineError::Host(anyhow::anyhow!("step exploded")))
        })
        .and_then(emit_event("skipped", 2))
        .and_also(emit_event("cleanup", 2))
        .build();

    engine.activate_effect(effect, &mut host).unwrap();
    engine.resolve_chain(&mut host).unwrap();

    assert_eq!(
        timings(&engine.get_timing_history()),
        vec!["main", "cleanup"]
    );
}

#[test]
fn test_compound_step_negation_marks_and_blocks_if_you_do() {
    let mut engine: Engine<()> = Engine::new();

    let effect = engine
        .direct_effect()
        .action(emit_event("main", 2))
        .and_then(|_: &mut (), _: &Targets| -> Result<ActionResult, EngineError> {
            Err(EngineError::effect_negated("sealed"))
        })
        .and_if_you_do(emit_event("bonus", 2))
        .build();

    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let history = engine.get_timing_history();
    assert_eq!(timings(&history), vec!["main", "effect_negated"]);
    assert_eq!(
        history[1].data.get("compound_index"),
        Some(&serde_json::Value::from(0u64))
    );
    assert_eq!(history[1].data_str("reason"), Some("sealed"));
}

#[test]
fn test_compound_success_chain_reports_each_step() {
    let mut engine: Engine<()> = Engine::new();

    let effect = engine
        .direct_effect()
        .action(emit_event("one", 2))
        .and_then(emit_event("two", 2))
        .and_then_if_you_do(emit_event("three", 2))
        .build();

    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert_eq!(
        timings(&engine.get_timing_history()),
        vec!["one", "two", "three"]
    );
}

#[test]
fn test_failing_trigger_request_is_skipped() {
    let mut engine: Engine<()> = Engine::new();

    engine
        .on_timing("destroyed")
        .layer(2)
        .once_per_turn_keyed("opt:response")
        .action(emit_event("drawn", 2))
        .build();

    // Two destruction events; the trigger answers the first, then its
    // once-per-turn constraint rejects the second Request.
    let effect = engine
        .direct_effect()
        .action(|_: &mut (), _: &Targets| {
            Ok(vec![
                TimingEvent::new("destroyed", 2),
                TimingEvent::new("destroyed", 2),
            ])
        })
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    // Dedup already limits the first batch to one response; a second
    // direct activation shows the constraint now rejects outright.
    assert_eq!(
        timings(&engine.get_timing_history()),
        vec!["destroyed", "destroyed", "drawn"]
    );

    let again = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(again, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    assert_eq!(
        timings(&engine.get_timing_history()),
        vec!["destroyed", "destroyed", "drawn", "destroyed"]
    );
}

#[test]
fn test_scopes_snapshot_into_cascade() {
    let mut engine: Engine<()> = Engine::new();

    engine
        .on_timing("destroyed")
        .layer(2)
        .action(emit_event("drawn", 2))
        .build();

    engine.timing("turn", 1);
    engine.timing("battle_phase", 2);

    let effect = engine
        .direct_effect()
        .action(emit_event("destroyed", 2))
        .build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    engine.end_timing("battle_phase");
    engine.end_timing("turn");

    let history = engine.get_timing_history();
    assert_eq!(history.len(), 2);
    for event in &history {
        let names: Vec<_> = event.scopes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["turn", "battle_phase"]);
    }
}

#[cfg(debug_assertions)]
#[test]
fn test_audit_records_each_resolution() {
    let mut engine: Engine<()> = Engine::new();

    let effect = engine.direct_effect().action(emit_event("e", 1)).build();
    engine.activate_effect(effect, &mut ()).unwrap();
    engine.resolve_chain(&mut ()).unwrap();

    let recent = engine.audit_log().recent(1);
    assert_eq!(recent.len(), 1);
    assert!(recent[0].completed);
    assert_eq!(recent[0].entries_resolved, 1);
    assert_eq!(recent[0].events_committed, 1);
}
