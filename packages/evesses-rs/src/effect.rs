//! Effects and their builder.
//!
//! An [`Effect`] is a bundle of host callbacks plus bookkeeping: tags,
//! constraints, a cost pair, a target selector, a primary action, and any
//! number of conditional compound steps. Effects are inert data until they
//! are Requested through [`Engine::activate_effect`](crate::Engine).
//!
//! # Callback shape
//!
//! Callbacks are plain `Arc<dyn Fn>` trait objects over the host's context
//! type `C`. They carry no `Send + Sync` bounds - the engine is strictly
//! single-threaded and every callback runs inline on the calling thread.
//!
//! # Example
//!
//! ```ignore
//! let pot = engine
//!     .direct_effect()
//!     .tag("spell")
//!     .once_per_turn_keyed("opt:pot_of_greed")
//!     .cost(|ctx: &mut Duel| ctx.pay_lp(500))
//!     .action(|ctx: &mut Duel, _targets| {
//!         ctx.draw(2)?;
//!         Ok(TimingEvent::new("drawn", 2).with_data("count", 2))
//!     })
//!     .and_if_you_do(|ctx: &mut Duel, _targets| {
//!         Ok(TimingEvent::new("lp_gained", 2))
//!     })
//!     .build();
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::core::{ActionValue, CompoundKind, EffectId, Targets};
use crate::error::EngineError;
use crate::lifetime::{LifetimeSignal, LifetimeWatch};

/// Host constraint callback evaluated during Request.
pub type ConstraintFn<C> = Arc<dyn Fn(&mut C) -> Result<(), EngineError>>;

/// Cost (mutating) or cost-checker (probe) callback.
pub type CostFn<C> = Arc<dyn Fn(&mut C) -> Result<(), EngineError>>;

/// Target selector callback; the returned value is stored with the chain
/// entry and handed to actions opaquely.
pub type TargetFn<C> = Arc<dyn Fn(&mut C) -> Result<Targets, EngineError>>;

/// Action callback. Returns a raw [`ActionValue`] which the engine
/// normalizes; the builder wraps any `R: Into<ActionValue>` return.
pub type ActionFn<C> = Arc<dyn Fn(&mut C, &Targets) -> Result<ActionValue, EngineError>>;

/// One entry in an effect's constraint list.
///
/// Tracker-backed constraints are data, not closures: the engine owns the
/// constraint tracker, and evaluating these during Request both checks and
/// marks (so a later failure still consumes the slot).
pub(crate) enum Constraint<C> {
    /// Arbitrary host predicate over the context.
    Host(ConstraintFn<C>),
    /// Fails if `key` was already marked this turn; marks it otherwise.
    OncePerTurn { key: String },
    /// Fails once `key` has been counted `max` times; counts otherwise.
    TimesPerTurn { key: String, max: u32 },
}

impl<C> fmt::Debug for Constraint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Host(_) => f.write_str("Host(..)"),
            Constraint::OncePerTurn { key } => write!(f, "OncePerTurn({key})"),
            Constraint::TimesPerTurn { key, max } => write!(f, "TimesPerTurn({key}, {max})"),
        }
    }
}

/// A secondary action attached to an effect, conditional on prior success.
pub struct CompoundStep<C> {
    pub(crate) kind: CompoundKind,
    pub(crate) action: ActionFn<C>,
}

impl<C> CompoundStep<C> {
    /// The conditionality tag of this step.
    pub fn kind(&self) -> CompoundKind {
        self.kind
    }
}

impl<C> fmt::Debug for CompoundStep<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundStep")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A proposed activation: callbacks plus bookkeeping, inert until Requested.
pub struct Effect<C> {
    pub(crate) id: EffectId,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) constraints: Vec<Constraint<C>>,
    pub(crate) cost: Option<CostFn<C>>,
    pub(crate) cost_checker: Option<CostFn<C>>,
    pub(crate) target: Option<TargetFn<C>>,
    pub(crate) action: ActionFn<C>,
    pub(crate) compound: Vec<CompoundStep<C>>,
    pub(crate) lifetime: Option<LifetimeWatch>,
}

impl<C> Effect<C> {
    /// Start building an effect. Equivalent to
    /// [`Engine::direct_effect`](crate::Engine::direct_effect).
    pub fn builder() -> EffectBuilder<C> {
        EffectBuilder::new()
    }

    /// This effect's id.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// The effect's tag set.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Whether the effect carries the given tag.
    ///
    /// Forbid floodgates typically key off tags.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// The attached compound steps, in declaration order.
    pub fn compound_steps(&self) -> &[CompoundStep<C>] {
        &self.compound
    }

    /// Whether a bound lifetime has ended.
    ///
    /// The engine carries this as data; it does not gate Request. Forbid
    /// floodgates or host constraints may consult it.
    pub fn is_expired(&self) -> bool {
        self.lifetime
            .as_ref()
            .map(LifetimeWatch::is_expired)
            .unwrap_or(false)
    }
}

impl<C> fmt::Debug for Effect<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("constraints", &self.constraints.len())
            .field("compound", &self.compound.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for [`Effect`].
///
/// Unlike trigger and floodgate builders, building an effect has no
/// registration side effect: the result is handed to
/// [`Engine::activate_effect`](crate::Engine::activate_effect) explicitly.
pub struct EffectBuilder<C> {
    id: EffectId,
    tags: BTreeSet<String>,
    constraints: Vec<Constraint<C>>,
    cost: Option<CostFn<C>>,
    cost_checker: Option<CostFn<C>>,
    target: Option<TargetFn<C>>,
    action: Option<ActionFn<C>>,
    compound: Vec<CompoundStep<C>>,
    lifetime: Option<LifetimeWatch>,
}

impl<C> EffectBuilder<C> {
    /// Start a new effect.
    pub fn new() -> Self {
        Self {
            id: EffectId::new(),
            tags: BTreeSet::new(),
            constraints: Vec::new(),
            cost: None,
            cost_checker: None,
            target: None,
            action: None,
            compound: Vec::new(),
            lifetime: None,
        }
    }

    /// Attach a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add a host constraint; evaluated in declaration order during Request,
    /// first failure wins.
    pub fn constraint<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), EngineError> + 'static,
    {
        self.constraints.push(Constraint::Host(Arc::new(f)));
        self
    }

    /// Restrict to one activation attempt per turn, keyed by this effect's
    /// id.
    ///
    /// The slot is consumed during Request, so a later negation or failure
    /// still counts as the turn's attempt.
    pub fn once_per_turn(self) -> Self {
        let key = self.id.to_string();
        self.once_per_turn_keyed(key)
    }

    /// Restrict to one activation attempt per turn under an explicit key
    /// (shared keys make *name*-wide restrictions).
    pub fn once_per_turn_keyed(mut self, key: impl Into<String>) -> Self {
        self.constraints.push(Constraint::OncePerTurn {
            key: key.into(),
        });
        self
    }

    /// Restrict to `max` activation attempts per turn, keyed by this
    /// effect's id.
    pub fn times_per_turn(self, max: u32) -> Self {
        let key = self.id.to_string();
        self.times_per_turn_keyed(max, key)
    }

    /// Restrict to `max` activation attempts per turn under an explicit key.
    pub fn times_per_turn_keyed(mut self, max: u32, key: impl Into<String>) -> Self {
        self.constraints.push(Constraint::TimesPerTurn {
            key: key.into(),
            max,
        });
        self
    }

    /// Set the mutating cost.
    ///
    /// Costs are not refundable: once paid, later negation or failure does
    /// not undo them. Hosts must fail before mutating, or mutate atomically.
    pub fn cost<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), EngineError> + 'static,
    {
        self.cost = Some(Arc::new(f));
        self
    }

    /// Set the non-mutating cost probe, run before the cost itself.
    ///
    /// Defaults to a no-op when unset.
    pub fn cost_checker<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), EngineError> + 'static,
    {
        self.cost_checker = Some(Arc::new(f));
        self
    }

    /// Set the target selector; its value is stored with the chain entry.
    pub fn target<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut C) -> Result<Targets, EngineError> + 'static,
    {
        self.target = Some(Arc::new(f));
        self
    }

    /// Set the primary action.
    ///
    /// The action may return anything convertible into [`ActionValue`]:
    /// an [`ActionResult`](crate::ActionResult), a
    /// [`TimingEvent`](crate::TimingEvent), a `Vec<TimingEvent>`, a `bool`,
    /// an `i64`, or `()`.
    pub fn action<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.action = Some(Arc::new(move |ctx, targets| f(ctx, targets).map(Into::into)));
        self
    }

    fn step<F, R>(mut self, kind: CompoundKind, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.compound.push(CompoundStep {
            kind,
            action: Arc::new(move |ctx, targets| f(ctx, targets).map(Into::into)),
        });
        self
    }

    /// Add a step that always executes.
    pub fn and_also<F, R>(self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.step(CompoundKind::And, f)
    }

    /// Add a step that executes unless the prior step errored.
    pub fn and_then<F, R>(self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.step(CompoundKind::AndThen, f)
    }

    /// Add a step that executes only if the prior step did something
    /// observable.
    pub fn and_if_you_do<F, R>(self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.step(CompoundKind::AndIfYouDo, f)
    }

    /// Same execution rule as [`and_if_you_do`](Self::and_if_you_do);
    /// distinct reporting tag.
    pub fn and_then_if_you_do<F, R>(self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.step(CompoundKind::AndThenIfYouDo, f)
    }

    /// Bind the effect to a lifetime signal; exposed through
    /// [`Effect::is_expired`].
    pub fn bind_lifetime(mut self, signal: &dyn LifetimeSignal) -> Self {
        self.lifetime = Some(LifetimeWatch::bind(signal));
        self
    }

    /// Finalize the effect.
    ///
    /// An unset action defaults to the null outcome (`succeeded = false`,
    /// no events), which is what cost-only effects want.
    pub fn build(self) -> Effect<C> {
        Effect {
            id: self.id,
            tags: self.tags,
            constraints: self.constraints,
            cost: self.cost,
            cost_checker: self.cost_checker,
            target: self.target,
            action: self
                .action
                .unwrap_or_else(|| Arc::new(|_, _| Ok(ActionValue::Null))),
            compound: self.compound,
            lifetime: self.lifetime,
        }
    }
}

impl<C> Default for EffectBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
