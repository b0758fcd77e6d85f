//! The three-phase execution pipeline: Request, Resolution, Commit.
//!
//! Each activation walks the same path:
//!
//! 1. **Request** validates (constraints, forbid floodgates), pays the cost,
//!    selects targets, and pushes the entry onto the chain stack. A Request
//!    error leaves no residue on the stack - but tracker writes and
//!    partially-paid costs stand.
//! 2. **Resolution** executes the entry through the floodgate pipeline
//!    (Replace pass → execute → normalize → Modify pass), branches on
//!    negation, then runs the compound steps.
//! 3. **Commit** stamps each produced event (scope snapshot, monotonic
//!    timestamp, wall clock), appends it to history, and queues matching
//!    triggers as pending responses. Commit is infallible.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::core::{ActionResult, Targets, TimingEvent, EFFECT_NEGATED_TIMING, NEGATION_LAYER};
use crate::effect::{ActionFn, Constraint, Effect};
use crate::engine::{ChainEntry, Engine};
use crate::error::EngineError;
use crate::floodgate::{FloodgateKind, PendingAction, Phase};

/// Build the synthetic marker committed when an effect is negated.
fn negation_marker<C>(
    effect: &Effect<C>,
    compound_index: Option<usize>,
    reason: &str,
) -> TimingEvent {
    let mut event = TimingEvent::new(EFFECT_NEGATED_TIMING, NEGATION_LAYER)
        .with_data("effect", effect.id().to_string())
        .with_data("reason", reason);
    if let Some(index) = compound_index {
        event = event.with_data("compound_index", index as u64);
    }
    event
}

impl<C> Engine<C> {
    // =========================================================================
    // Request phase
    // =========================================================================

    pub(crate) fn request_phase(
        &mut self,
        effect: Arc<Effect<C>>,
        ctx: &mut C,
    ) -> Result<(), EngineError> {
        // Lifetime contract: expired registrations are gone before any
        // Request work begins.
        self.sweep_expired();

        // 1. Constraints, in declaration order; first failure wins. Tracker
        //    writes happen here, so a later failure still consumed the slot.
        for constraint in effect.constraints.iter() {
            match constraint {
                Constraint::Host(check) => check(ctx)?,
                Constraint::OncePerTurn { key } => {
                    self.tracker.check_once_per_turn(key)?;
                    self.tracker.mark_used(key.clone());
                }
                Constraint::TimesPerTurn { key, max } => {
                    self.tracker.check_times_per_turn(key, *max)?;
                    self.tracker.increment_usage(key.clone());
                }
            }
        }

        // 2. Request-phase forbid floodgates, in (layer, insertion) order.
        for floodgate in self.floodgates.iter() {
            if floodgate.phase != Phase::Request {
                continue;
            }
            if let FloodgateKind::Forbid(forbids) = &floodgate.kind {
                if forbids(ctx, &effect) {
                    debug!(
                        effect = %effect.id(),
                        floodgate = %floodgate.id,
                        "activation forbidden"
                    );
                    return Err(EngineError::ActionForbidden {
                        reason: floodgate.forbid_reason(),
                        floodgate: floodgate.id,
                    });
                }
            }
        }

        // 3. Cost probe (non-mutating; no-op when unset).
        if let Some(probe) = &effect.cost_checker {
            probe(ctx)?;
        }

        // 4. Cost payment. Not refundable from here on.
        if let Some(cost) = &effect.cost {
            cost(ctx)?;
        }

        // 5. Target selection.
        let targets = match &effect.target {
            Some(select) => select(ctx)?,
            None => Targets::Null,
        };

        // 6. Push.
        debug!(effect = %effect.id(), "requested onto chain");
        self.chain.push(ChainEntry { effect, targets });
        Ok(())
    }

    // =========================================================================
    // Resolution phase
    // =========================================================================

    pub(crate) fn resolution_phase(
        &mut self,
        entry: ChainEntry<C>,
        ctx: &mut C,
    ) -> Result<(), EngineError> {
        let ChainEntry { effect, targets } = entry;

        let mut events;
        let mut prev_succeeded;
        let mut prev_errored = false;

        match self.execute_with_floodgates(Arc::clone(&effect.action), targets.clone(), ctx) {
            Ok(result) => {
                prev_succeeded = result.succeeded;
                events = result.events;
            }
            Err(EngineError::EffectNegated { reason }) => {
                // The activation stood but resolves to nothing; commit the
                // marker so triggers can respond to the negation itself.
                debug!(effect = %effect.id(), %reason, "effect negated");
                self.commit(vec![negation_marker(&effect, None, &reason)]);
                return Ok(());
            }
            // ActivationNegated and everything else propagate uncommitted.
            Err(other) => return Err(other),
        }

        for (index, step) in effect.compound.iter().enumerate() {
            if !step.kind.should_execute(prev_errored, prev_succeeded) {
                debug!(
                    effect = %effect.id(),
                    step = index,
                    kind = step.kind.as_str(),
                    "compound step skipped"
                );
                continue;
            }
            match self.execute_with_floodgates(Arc::clone(&step.action), targets.clone(), ctx) {
                Ok(result) => {
                    events.extend(result.events);
                    prev_succeeded = result.succeeded;
                    prev_errored = false;
                }
                Err(EngineError::EffectNegated { reason }) => {
                    debug!(effect = %effect.id(), step = index, %reason, "compound step negated");
                    events.push(negation_marker(&effect, Some(index), &reason));
                    prev_succeeded = false;
                    prev_errored = true;
                }
                // Step errors never abort the enclosing effect; this arm
                // also absorbs ActivationNegated from a step.
                Err(other) => {
                    warn!(
                        effect = %effect.id(),
                        step = index,
                        kind = step.kind.as_str(),
                        error = %other,
                        "compound step failed"
                    );
                    prev_succeeded = false;
                    prev_errored = true;
                }
            }
        }

        self.commit(events);
        Ok(())
    }

    // =========================================================================
    // Floodgate application
    // =========================================================================

    /// Run one action through the Resolution-phase floodgate pipeline.
    fn execute_with_floodgates(
        &self,
        action: ActionFn<C>,
        targets: Targets,
        ctx: &mut C,
    ) -> Result<ActionResult, EngineError> {
        let mut action = action;
        let mut targets = targets;

        // Replace pass: later floodgates see earlier substitutions.
        for floodgate in self.floodgates.iter() {
            if floodgate.phase != Phase::Resolution {
                continue;
            }
            if let FloodgateKind::Replace(replace) = &floodgate.kind {
                let pending = PendingAction {
                    action: Arc::clone(&action),
                    targets: targets.clone(),
                };
                if let Some(replacement) = replace(ctx, &pending) {
                    debug!(floodgate = %floodgate.id, "replace floodgate applied");
                    if let Some(substitute) = replacement.action {
                        action = substitute;
                    }
                    if let Some(substitute) = replacement.targets {
                        targets = substitute;
                    }
                }
            }
        }

        // Execute; errors surface before any Modify floodgate runs.
        let raw = action(ctx, &targets)?;
        let mut result = raw.normalize();

        // Modify pass: per event, a non-None return replaces in place.
        for floodgate in self.floodgates.iter() {
            if floodgate.phase != Phase::Resolution {
                continue;
            }
            if let FloodgateKind::Modify(modify) = &floodgate.kind {
                for event in result.events.iter_mut() {
                    if let Some(modified) = modify(ctx, event) {
                        *event = modified;
                    }
                }
            }
        }

        Ok(result)
    }

    // =========================================================================
    // Commit phase
    // =========================================================================

    /// Commit events: stamp, append to history, queue matching triggers.
    /// Infallible.
    pub(crate) fn commit(&mut self, events: Vec<TimingEvent>) {
        for mut event in events {
            event.scopes = self.scopes.snapshot();
            event.timestamp = Some(self.next_timestamp);
            self.next_timestamp += 1;
            event.recorded_at = Some(Utc::now());

            for trigger in self.triggers.iter() {
                if trigger.is_expired() || !trigger.matches(&event) {
                    continue;
                }
                // At most one queue entry per trigger per matching batch.
                if self.pending.iter().any(|queued| queued.id == trigger.id) {
                    continue;
                }
                debug!(
                    trigger = %trigger.id,
                    timing = %event.timing,
                    layer = event.layer,
                    "trigger matched"
                );
                self.pending.push(Arc::clone(trigger));
            }

            self.history.push(event);
        }
    }
}
