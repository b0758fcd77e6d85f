//! Testing utilities (feature-gated).
//!
//! Enable with the `testing` feature; the crate's own tests use this module
//! too. Nothing here is part of the stable surface.

use std::collections::HashMap;

use crate::core::{Targets, TimingEvent};
use crate::error::EngineError;

/// A minimal host context that counts named operations.
///
/// Useful as the `C` parameter in tests that need to observe how often
/// costs, actions, or constraints ran.
#[derive(Debug, Default)]
pub struct TestHost {
    counters: HashMap<String, i64>,
}

impl TestHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the named counter.
    pub fn bump(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Current value of the named counter (0 when never bumped).
    pub fn count(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// An action that emits a single event with the given timing and layer.
pub fn emit_event<C>(
    timing: impl Into<String>,
    layer: i32,
) -> impl Fn(&mut C, &Targets) -> Result<TimingEvent, EngineError> {
    let timing = timing.into();
    move |_ctx, _targets| Ok(TimingEvent::new(timing.clone(), layer))
}

/// The timing names of a history slice, in order.
pub fn timings(history: &[TimingEvent]) -> Vec<&str> {
    history.iter().map(|event| event.timing.as_str()).collect()
}

/// The timestamps of a history slice, in order. Panics on uncommitted
/// events.
pub fn timestamps(history: &[TimingEvent]) -> Vec<u64> {
    history
        .iter()
        .map(|event| event.timestamp.expect("uncommitted event in history"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    #[test]
    fn test_host_counters() {
        let mut host = TestHost::new();
        assert_eq!(host.count("draw"), 0);
        assert_eq!(host.bump("draw"), 1);
        assert_eq!(host.bump("draw"), 2);
        assert_eq!(host.count("draw"), 2);
    }

    #[test]
    fn test_emit_event_helper() {
        let mut engine: Engine<TestHost> = Engine::new();
        let effect = engine
            .direct_effect()
            .action(emit_event("drawn", 2))
            .build();

        let mut host = TestHost::new();
        engine.activate_effect(effect, &mut host).unwrap();
        engine.resolve_chain(&mut host).unwrap();

        let history = engine.get_timing_history();
        assert_eq!(timings(&history), vec!["drawn"]);
        assert_eq!(timestamps(&history), vec![0]);
    }
}
