//! The evesses engine - chain stack, pending responses, and the resolution
//! loop.
//!
//! The engine is the central coordinator:
//!
//! ```text
//! activate_effect()                 resolve_chain()
//!     │                                 │
//!     ▼ Request                         ▼
//! constraints → forbid gates      ┌─ pop chain (LIFO) ──► Resolution
//! → cost probe → cost → targets   │        │                  │
//!     │                           │        ▼ Commit           │
//!     ▼ push                      │   history + trigger match │
//! ┌──────────────┐                │        │                  │
//! │ chain stack  │◄───────────────┤        ▼                  │
//! └──────────────┘   Request      │  pending responses        │
//!                      ▲          │        │                  │
//!                      │          └─ SEGOC sort ◄─────────────┘
//!                      └─────────────── each response
//! ```
//!
//! The loop drains the stack, commits events, matches triggers, sorts the
//! pending batch, Requests each response back onto the stack, and repeats
//! until both the stack and the queue are empty (or the iteration cap
//! trips).
//!
//! # Reentrancy
//!
//! Callbacks receive only the host context, never the engine, and every
//! engine operation takes `&mut self` - so a callback cannot re-enter
//! `activate_effect` or `resolve_chain` mid-phase by construction.
//!
//! # Example
//!
//! ```ignore
//! let mut engine: Engine<Duel> = Engine::new();
//!
//! engine
//!     .on_timing("destroyed")
//!     .layer(2)
//!     .action(|duel: &mut Duel, _| Ok(TimingEvent::new("drawn", 2)))
//!     .build();
//!
//! let attack = engine
//!     .direct_effect()
//!     .tag("battle")
//!     .action(|duel: &mut Duel, _| Ok(TimingEvent::new("destroyed", 2)))
//!     .build();
//!
//! engine.activate_effect(attack, &mut duel)?;
//! engine.resolve_chain(&mut duel)?;
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::core::{Targets, TimingEvent};
use crate::effect::{Effect, EffectBuilder};
use crate::error::EngineError;
use crate::floodgate::{Floodgate, FloodgateBuilder};
use crate::registry::{ConstraintTracker, FloodgateRegistry, ScopeStack, TriggerRegistry};
use crate::trigger::{Trigger, TriggerBuilder};

#[cfg(debug_assertions)]
use crate::audit::{ChainAuditEntry, ChainAuditLog};

/// Default cap on outer chain-loop iterations.
pub const DEFAULT_MAX_CHAIN_ITERATIONS: u32 = 1000;

/// Caller-supplied ordering of a simultaneously-queued response batch.
///
/// The sorter sees each batch exactly once per loop iteration; it only
/// affects Request order within that batch.
pub type SegocSorter<C> = Box<dyn Fn(Vec<Arc<Trigger<C>>>) -> Vec<Arc<Trigger<C>>>>;

/// Host decision for an optional trigger: `true` activates the response.
pub type OptionalTriggerPrompt<C> = Box<dyn Fn(&Trigger<C>) -> bool>;

/// One Requested-but-unresolved activation on the chain stack.
pub(crate) struct ChainEntry<C> {
    pub(crate) effect: Arc<Effect<C>>,
    pub(crate) targets: Targets,
}

impl<C> fmt::Debug for ChainEntry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("effect", &self.effect.id())
            .field("targets", &self.targets)
            .finish()
    }
}

/// The effect-resolution engine, generic over the host context `C`.
///
/// Owns the registries (triggers, floodgates, constraint tracker, scope
/// stack) and the timing history. All operations are synchronous and run on
/// the calling thread.
pub struct Engine<C> {
    pub(crate) triggers: TriggerRegistry<C>,
    pub(crate) floodgates: FloodgateRegistry<C>,
    pub(crate) tracker: ConstraintTracker,
    pub(crate) scopes: ScopeStack,
    pub(crate) history: Vec<TimingEvent>,
    pub(crate) next_timestamp: u64,
    pub(crate) chain: Vec<ChainEntry<C>>,
    pub(crate) pending: Vec<Arc<Trigger<C>>>,
    pub(crate) segoc: SegocSorter<C>,
    pub(crate) max_iterations: u32,
    pub(crate) on_optional: OptionalTriggerPrompt<C>,
    #[cfg(debug_assertions)]
    pub(crate) audit: ChainAuditLog,
}

impl<C> Engine<C> {
    /// Create an engine with default settings: identity SEGOC sort,
    /// auto-accepted optional triggers, iteration cap of
    /// [`DEFAULT_MAX_CHAIN_ITERATIONS`].
    pub fn new() -> Self {
        Self {
            triggers: TriggerRegistry::new(),
            floodgates: FloodgateRegistry::new(),
            tracker: ConstraintTracker::new(),
            scopes: ScopeStack::new(),
            history: Vec::new(),
            next_timestamp: 0,
            chain: Vec::new(),
            pending: Vec::new(),
            segoc: Box::new(|batch| batch),
            max_iterations: DEFAULT_MAX_CHAIN_ITERATIONS,
            on_optional: Box::new(|_| true),
            #[cfg(debug_assertions)]
            audit: ChainAuditLog::new(),
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Start building a direct (player-proposed) effect.
    ///
    /// Building has no side effect; hand the result to
    /// [`activate_effect`](Self::activate_effect).
    pub fn direct_effect(&self) -> EffectBuilder<C> {
        EffectBuilder::new()
    }

    /// Start building a trigger on the given timing name (layer defaults to
    /// 1; override with the builder's `layer`). Registers on `build`.
    pub fn on_timing(&mut self, timing: impl Into<String>) -> TriggerBuilder<'_, C> {
        TriggerBuilder::new(self, timing)
    }

    /// Start building a floodgate. Registers on `build`.
    pub fn floodgate(&mut self) -> FloodgateBuilder<'_, C> {
        FloodgateBuilder::new(self)
    }

    // =========================================================================
    // Temporal scopes
    // =========================================================================

    /// Open a temporal scope; it will be snapshotted into every event
    /// committed while it is open.
    pub fn timing(&mut self, scope: impl Into<String>, layer: i32) {
        self.scopes.push(scope, layer);
    }

    /// Close the topmost open scope with the given name.
    pub fn end_timing(&mut self, scope: &str) {
        if self.scopes.pop(scope).is_none() {
            warn!(scope, "end_timing with no matching open scope");
        }
    }

    /// The live scope stack.
    pub fn scope_stack(&self) -> &ScopeStack {
        &self.scopes
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Install the SEGOC sorter applied to each pending-response batch.
    /// Default is identity.
    pub fn set_segoc_sorter<F>(&mut self, sorter: F)
    where
        F: Fn(Vec<Arc<Trigger<C>>>) -> Vec<Arc<Trigger<C>>> + 'static,
    {
        self.segoc = Box::new(sorter);
    }

    /// Set the outer chain-loop iteration cap (default
    /// [`DEFAULT_MAX_CHAIN_ITERATIONS`]).
    pub fn set_max_chain_iterations(&mut self, max: u32) {
        self.max_iterations = max;
    }

    /// Install the host prompt consulted for optional triggers. Default
    /// auto-accepts.
    pub fn set_optional_trigger_prompt<F>(&mut self, prompt: F)
    where
        F: Fn(&Trigger<C>) -> bool + 'static,
    {
        self.on_optional = Box::new(prompt);
    }

    // =========================================================================
    // Activation & resolution
    // =========================================================================

    /// Run the Request phase for an effect: constraints, forbid floodgates,
    /// cost probe, cost, target selection, then push onto the chain stack.
    ///
    /// A Request error leaves no chain-stack residue, but constraint-tracker
    /// writes and partially-paid costs are *not* undone.
    pub fn activate_effect(
        &mut self,
        effect: impl Into<Arc<Effect<C>>>,
        ctx: &mut C,
    ) -> Result<(), EngineError> {
        self.request_phase(effect.into(), ctx)
    }

    /// Drain the chain stack and pending responses to quiescence.
    ///
    /// Per entry: `ActivationNegated` is absorbed (the chain continues),
    /// `EffectNegated` commits its marker and is absorbed inside the
    /// Resolution phase, any other error stops the drain and is returned.
    /// Triggers whose Request fails are skipped with a log.
    ///
    /// Returns [`EngineError::InfiniteLoopDetected`] once the outer loop
    /// exceeds the configured cap; engine state is unspecified afterwards.
    pub fn resolve_chain(&mut self, ctx: &mut C) -> Result<(), EngineError> {
        let mut iterations: u32 = 0;

        #[cfg(debug_assertions)]
        let mut audit_entry = ChainAuditEntry::default();
        #[cfg(debug_assertions)]
        let history_start = self.history.len();

        while !self.chain.is_empty() || !self.pending.is_empty() {
            iterations += 1;
            if iterations > self.max_iterations {
                error!(
                    iterations,
                    max_iterations = self.max_iterations,
                    "chain loop exceeded iteration cap"
                );
                #[cfg(debug_assertions)]
                self.record_audit(audit_entry, iterations, history_start, false);
                return Err(EngineError::InfiniteLoopDetected { iterations });
            }

            while let Some(entry) = self.chain.pop() {
                #[cfg(debug_assertions)]
                {
                    audit_entry.entries_resolved += 1;
                }
                match self.resolution_phase(entry, ctx) {
                    Ok(()) => {}
                    Err(EngineError::ActivationNegated { reason }) => {
                        debug!(%reason, "activation negated; chain continues");
                    }
                    Err(other) => {
                        #[cfg(debug_assertions)]
                        self.record_audit(audit_entry, iterations, history_start, false);
                        return Err(other);
                    }
                }
            }

            if !self.pending.is_empty() {
                let drained = std::mem::take(&mut self.pending);
                let batch = (self.segoc)(drained);
                for trigger in batch {
                    if trigger.is_expired() {
                        debug!(trigger = %trigger.id, "skipping expired pending trigger");
                        continue;
                    }
                    if trigger.optional && !(self.on_optional)(&trigger) {
                        debug!(trigger = %trigger.id, "optional trigger declined");
                        continue;
                    }
                    #[cfg(debug_assertions)]
                    {
                        audit_entry.responses_requested += 1;
                    }
                    match self.request_phase(Arc::clone(&trigger.effect), ctx) {
                        Ok(()) => {}
                        Err(err) => {
                            debug!(trigger = %trigger.id, error = %err, "trigger request failed; skipping");
                        }
                    }
                }
            }
        }

        #[cfg(debug_assertions)]
        self.record_audit(audit_entry, iterations, history_start, true);
        Ok(())
    }

    #[cfg(debug_assertions)]
    fn record_audit(
        &mut self,
        mut entry: ChainAuditEntry,
        iterations: u32,
        history_start: usize,
        completed: bool,
    ) {
        entry.iterations = iterations;
        entry.events_committed = self.history.len() - history_start;
        entry.completed = completed;
        self.audit.record(entry);
    }

    // =========================================================================
    // State access
    // =========================================================================

    /// Snapshot copy of the timing history, oldest first.
    pub fn get_timing_history(&self) -> Vec<TimingEvent> {
        self.history.clone()
    }

    /// Forget all per-turn constraint usage. Idempotent; typically called by
    /// the host at turn end.
    pub fn clear_constraint_tracker(&mut self) {
        self.tracker.clear();
    }

    /// The constraint tracker (read access).
    pub fn constraint_tracker(&self) -> &ConstraintTracker {
        &self.tracker
    }

    /// The constraint tracker (write access, for host-managed keys).
    pub fn constraint_tracker_mut(&mut self) -> &mut ConstraintTracker {
        &mut self.tracker
    }

    /// Number of Requested-but-unresolved effects on the chain stack.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Number of matched-but-not-yet-Requested trigger responses.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of registered (not yet swept) triggers.
    pub fn active_trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Number of registered (not yet swept) floodgates.
    pub fn active_floodgate_count(&self) -> usize {
        self.floodgates.len()
    }

    /// The debug-only chain audit log.
    #[cfg(debug_assertions)]
    pub fn audit_log(&self) -> &ChainAuditLog {
        &self.audit
    }

    // =========================================================================
    // Registration internals
    // =========================================================================

    pub(crate) fn register_trigger(&mut self, trigger: Trigger<C>) -> crate::core::TriggerId {
        self.triggers.register(trigger)
    }

    pub(crate) fn register_floodgate(
        &mut self,
        floodgate: Floodgate<C>,
    ) -> crate::core::FloodgateId {
        self.floodgates.register(floodgate)
    }

    /// Drop expired registrations. Runs at the start of every Request phase,
    /// which is the lifetime contract's deadline.
    pub(crate) fn sweep_expired(&mut self) {
        self.triggers.sweep();
        self.floodgates.sweep();
    }
}

impl<C> Default for Engine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("triggers", &self.triggers.len())
            .field("floodgates", &self.floodgates.len())
            .field("chain", &self.chain.len())
            .field("pending", &self.pending.len())
            .field("history", &self.history.len())
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}
