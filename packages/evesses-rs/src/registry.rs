//! Engine-owned registries: constraint tracker, scope stack, and the active
//! trigger/floodgate lists.
//!
//! All four are internal mutable state of the engine, touched only by engine
//! operations and the explicit public helpers. None of them is shared across
//! threads; the engine is strictly single-threaded.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::core::{FloodgateId, Scope, TriggerId};
use crate::error::EngineError;
use crate::floodgate::Floodgate;
use crate::trigger::Trigger;

// =============================================================================
// Constraint tracker
// =============================================================================

/// Per-turn usage bookkeeping behind `once_per_turn` / `times_per_turn`.
///
/// Keys are opaque strings; presence marks once-per-turn use, the counter
/// backs times-per-turn. The host clears the tracker explicitly (typically
/// at turn end) via
/// [`Engine::clear_constraint_tracker`](crate::Engine::clear_constraint_tracker).
///
/// Because constraint evaluation both checks and marks during Request, a
/// negated or failed effect still consumes its slot: the tracker counts
/// *attempts*, not successful resolutions.
#[derive(Debug, Default)]
pub struct ConstraintTracker {
    counters: HashMap<String, u32>,
}

impl ConstraintTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails iff `key` is already present.
    pub fn check_once_per_turn(&self, key: &str) -> Result<(), EngineError> {
        if self.counters.contains_key(key) {
            Err(EngineError::constraint_violated(key))
        } else {
            Ok(())
        }
    }

    /// Mark `key` as used this turn.
    pub fn mark_used(&mut self, key: impl Into<String>) {
        self.counters.entry(key.into()).or_insert(1);
    }

    /// Fails iff `key` has already been counted `max` or more times.
    pub fn check_times_per_turn(&self, key: &str, max: u32) -> Result<(), EngineError> {
        if self.usage(key) >= max {
            Err(EngineError::constraint_violated(key))
        } else {
            Ok(())
        }
    }

    /// Count one more use of `key`.
    pub fn increment_usage(&mut self, key: impl Into<String>) {
        *self.counters.entry(key.into()).or_insert(0) += 1;
    }

    /// Current use count for `key` (0 when absent).
    pub fn usage(&self, key: &str) -> u32 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Forget all usage. Idempotent.
    pub fn clear(&mut self) {
        self.counters.clear();
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether anything is tracked.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

// =============================================================================
// Scope stack
// =============================================================================

/// The live stack of temporal scopes (turn → phase → step).
///
/// Snapshots of this stack are deep-copied into every committed timing
/// event. The engine imposes no nesting discipline beyond "pop removes the
/// topmost entry with that name".
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: SmallVec<[Scope; 8]>,
}

impl ScopeStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a scope.
    pub fn push(&mut self, name: impl Into<String>, layer: i32) {
        self.scopes.push(Scope::new(name, layer));
    }

    /// Remove and return the topmost scope with the given name.
    pub fn pop(&mut self, name: &str) -> Option<Scope> {
        let index = self.scopes.iter().rposition(|s| s.name == name)?;
        Some(self.scopes.remove(index))
    }

    /// Deep copy of the current stack, bottom-up.
    pub fn snapshot(&self) -> Vec<Scope> {
        self.scopes.to_vec()
    }

    /// The innermost scope, if any.
    pub fn current(&self) -> Option<&Scope> {
        self.scopes.last()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

// =============================================================================
// Trigger registry
// =============================================================================

/// Active triggers in registration order.
pub(crate) struct TriggerRegistry<C> {
    entries: Vec<Arc<Trigger<C>>>,
}

impl<C> TriggerRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a trigger, keeping registration order.
    pub(crate) fn register(&mut self, trigger: Trigger<C>) -> TriggerId {
        let id = trigger.id;
        debug!(trigger = %id, timing = %trigger.timing, layer = trigger.layer, "registering trigger");
        self.entries.push(Arc::new(trigger));
        id
    }

    /// Drop every entry whose lifetime has expired.
    pub(crate) fn sweep(&mut self) {
        self.entries.retain(|trigger| {
            if trigger.is_expired() {
                debug!(trigger = %trigger.id, "unregistering expired trigger");
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Trigger<C>>> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<C> Default for TriggerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Floodgate registry
// =============================================================================

/// Active floodgates, sorted by `(layer asc, insertion asc)` at all times.
pub(crate) struct FloodgateRegistry<C> {
    entries: Vec<Arc<Floodgate<C>>>,
    next_insertion: u64,
}

impl<C> FloodgateRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_insertion: 0,
        }
    }

    /// Register a floodgate: assigns its insertion index and re-sorts.
    pub(crate) fn register(&mut self, mut floodgate: Floodgate<C>) -> FloodgateId {
        floodgate.insertion_index = self.next_insertion;
        self.next_insertion += 1;
        let id = floodgate.id;
        debug!(
            floodgate = %id,
            phase = %floodgate.phase,
            layer = floodgate.layer,
            kind = floodgate.kind.as_str(),
            "registering floodgate"
        );
        self.entries.push(Arc::new(floodgate));
        self.entries
            .sort_by_key(|f| (f.layer, f.insertion_index));
        id
    }

    /// Drop every entry whose lifetime has expired. Relative order of the
    /// survivors is unchanged, so the sort invariant holds.
    pub(crate) fn sweep(&mut self) {
        self.entries.retain(|floodgate| {
            if floodgate.is_expired() {
                debug!(floodgate = %floodgate.id, "unregistering expired floodgate");
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Floodgate<C>>> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| (w[0].layer, w[0].insertion_index) < (w[1].layer, w[1].insertion_index))
    }
}

impl<C> Default for FloodgateRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floodgate::{FloodgateKind, Phase};
    use crate::lifetime::{HostLifetime, LifetimeWatch};

    #[test]
    fn test_once_per_turn_checks_presence() {
        let mut tracker = ConstraintTracker::new();
        assert!(tracker.check_once_per_turn("opt:a").is_ok());

        tracker.mark_used("opt:a");
        let err = tracker.check_once_per_turn("opt:a").unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolated { name } if name == "opt:a"));

        // Other keys unaffected
        assert!(tracker.check_once_per_turn("opt:b").is_ok());
    }

    #[test]
    fn test_times_per_turn_counts() {
        let mut tracker = ConstraintTracker::new();
        for _ in 0..3 {
            assert!(tracker.check_times_per_turn("tpt", 3).is_ok());
            tracker.increment_usage("tpt");
        }
        assert!(tracker.check_times_per_turn("tpt", 3).is_err());
        assert_eq!(tracker.usage("tpt"), 3);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut tracker = ConstraintTracker::new();
        tracker.mark_used("k");
        tracker.clear();
        assert!(tracker.is_empty());
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.check_once_per_turn("k").is_ok());
    }

    #[test]
    fn test_scope_stack_pops_topmost_matching() {
        let mut scopes = ScopeStack::new();
        scopes.push("turn", 1);
        scopes.push("phase", 2);
        scopes.push("turn", 3);

        let popped = scopes.pop("turn").unwrap();
        assert_eq!(popped.layer, 3);
        assert_eq!(scopes.depth(), 2);
        assert_eq!(scopes.current().unwrap().name, "phase");

        // The earlier "turn" is still there underneath
        assert_eq!(scopes.pop("turn").unwrap().layer, 1);
    }

    #[test]
    fn test_scope_stack_pop_missing() {
        let mut scopes = ScopeStack::new();
        assert!(scopes.pop("nope").is_none());
    }

    #[test]
    fn test_scope_snapshot_is_deep_copy() {
        let mut scopes = ScopeStack::new();
        scopes.push("turn", 1);
        let snapshot = scopes.snapshot();

        scopes.push("phase", 2);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "turn");
    }

    fn forbid_gate(layer: i32) -> Floodgate<()> {
        Floodgate {
            id: FloodgateId::new(),
            phase: Phase::Request,
            layer,
            kind: FloodgateKind::Forbid(Arc::new(|_, _| false)),
            name: None,
            insertion_index: 0,
            lifetime: None,
        }
    }

    #[test]
    fn test_floodgate_registry_sorts_by_layer_then_insertion() {
        let mut registry: FloodgateRegistry<()> = FloodgateRegistry::new();
        let high = registry.register(forbid_gate(5));
        let low = registry.register(forbid_gate(1));
        let low_again = registry.register(forbid_gate(1));

        assert!(registry.is_sorted());
        let order: Vec<_> = registry.iter().map(|f| f.id).collect();
        assert_eq!(order, vec![low, low_again, high]);
    }

    #[test]
    fn test_floodgate_sweep_preserves_sort() {
        let lifetime = HostLifetime::new();
        let mut registry: FloodgateRegistry<()> = FloodgateRegistry::new();
        registry.register(forbid_gate(2));

        let mut doomed = forbid_gate(1);
        doomed.lifetime = Some(LifetimeWatch::bind(&lifetime));
        registry.register(doomed);
        registry.register(forbid_gate(3));
        assert_eq!(registry.len(), 3);

        lifetime.expire();
        registry.sweep();
        assert_eq!(registry.len(), 2);
        assert!(registry.is_sorted());
    }

    #[test]
    fn test_trigger_registry_sweep() {
        let lifetime = HostLifetime::new();
        let mut registry: TriggerRegistry<()> = TriggerRegistry::new();

        let trigger = Trigger {
            id: crate::core::TriggerId::new(),
            timing: "destroyed".into(),
            layer: 2,
            filter: None,
            optional: false,
            effect: Arc::new(crate::effect::Effect::builder().build()),
            lifetime: Some(LifetimeWatch::bind(&lifetime)),
        };
        registry.register(trigger);
        assert_eq!(registry.len(), 1);

        registry.sweep();
        assert_eq!(registry.len(), 1);

        lifetime.expire();
        registry.sweep();
        assert_eq!(registry.len(), 0);
    }
}
