//! Floodgates - continuous interceptors over activation and resolution.
//!
//! A floodgate is a standing rule applied to *other* effects. The three
//! kinds map onto the two phases they can intercept:
//!
//! | Kind    | Phase      | Contract                                           |
//! |---------|------------|----------------------------------------------------|
//! | Forbid  | Request    | `(ctx, effect) -> bool`; true fails the activation |
//! | Modify  | Resolution | `(ctx, event) -> Option<event>`; rewrites events   |
//! | Replace | Resolution | `(ctx, pending) -> Option<replacement>`            |
//!
//! The active list is kept sorted by `(layer asc, insertion asc)` at all
//! times; both the Replace and Modify passes walk it in that order, and
//! chained Replace floodgates each see the previous substitution.

use std::fmt;
use std::sync::Arc;

use crate::core::{ActionValue, FloodgateId, Targets, TimingEvent};
use crate::effect::{ActionFn, Effect};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::lifetime::{LifetimeSignal, LifetimeWatch};

/// Which phase a floodgate intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Intercepts activation (Forbid).
    Request,
    /// Intercepts execution (Modify, Replace).
    Resolution,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Request => f.write_str("request"),
            Phase::Resolution => f.write_str("resolution"),
        }
    }
}

/// Forbid predicate: true means the activation fails.
pub type ForbidFn<C> = Arc<dyn Fn(&C, &Effect<C>) -> bool>;

/// Modify function: a non-`None` return replaces the event.
pub type ModifyFn<C> = Arc<dyn Fn(&C, &TimingEvent) -> Option<TimingEvent>>;

/// Replace function: a non-`None` return substitutes the action and/or the
/// target set before execution.
pub type ReplaceFn<C> = Arc<dyn Fn(&C, &PendingAction<C>) -> Option<Replacement<C>>>;

/// The action/target pair about to execute, as shown to Replace floodgates.
pub struct PendingAction<C> {
    /// The action that would run (possibly already substituted by an
    /// earlier Replace floodgate).
    pub action: ActionFn<C>,
    /// The targets it would run against.
    pub targets: Targets,
}

impl<C> fmt::Debug for PendingAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAction")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

/// Substitution returned by a Replace floodgate.
///
/// Unset fields leave the corresponding half of the pending pair unchanged.
pub struct Replacement<C> {
    /// Substitute action, if any.
    pub action: Option<ActionFn<C>>,
    /// Substitute targets, if any.
    pub targets: Option<Targets>,
}

impl<C> Replacement<C> {
    /// An empty substitution (changes nothing; equivalent to returning
    /// `None` from the Replace function).
    pub fn new() -> Self {
        Self {
            action: None,
            targets: None,
        }
    }

    /// Substitute the action.
    pub fn with_action<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.action = Some(Arc::new(move |ctx, targets| f(ctx, targets).map(Into::into)));
        self
    }

    /// Substitute the targets.
    pub fn with_targets(mut self, targets: Targets) -> Self {
        self.targets = Some(targets);
        self
    }
}

impl<C> Default for Replacement<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The variant kind of a floodgate; exactly one function contract.
pub enum FloodgateKind<C> {
    /// Request-phase activation veto.
    Forbid(ForbidFn<C>),
    /// Resolution-phase event rewrite.
    Modify(ModifyFn<C>),
    /// Resolution-phase action/target substitution.
    Replace(ReplaceFn<C>),
}

impl<C> FloodgateKind<C> {
    /// Stable reporting tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            FloodgateKind::Forbid(_) => "forbid",
            FloodgateKind::Modify(_) => "modify",
            FloodgateKind::Replace(_) => "replace",
        }
    }

    /// The phase this kind intercepts by default.
    fn default_phase(&self) -> Phase {
        match self {
            FloodgateKind::Forbid(_) => Phase::Request,
            FloodgateKind::Modify(_) | FloodgateKind::Replace(_) => Phase::Resolution,
        }
    }
}

impl<C> fmt::Debug for FloodgateKind<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered continuous interceptor.
pub struct Floodgate<C> {
    pub(crate) id: FloodgateId,
    pub(crate) phase: Phase,
    pub(crate) layer: i32,
    pub(crate) kind: FloodgateKind<C>,
    pub(crate) name: Option<String>,
    /// Assigned by the registry; ties within a layer resolve by insertion.
    pub(crate) insertion_index: u64,
    pub(crate) lifetime: Option<LifetimeWatch>,
}

impl<C> Floodgate<C> {
    /// This floodgate's id.
    pub fn id(&self) -> FloodgateId {
        self.id
    }

    /// The phase this floodgate intercepts.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Ordering layer.
    pub fn layer(&self) -> i32 {
        self.layer
    }

    /// The variant kind.
    pub fn kind(&self) -> &FloodgateKind<C> {
        &self.kind
    }

    /// Optional host-facing name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Position in the insertion order (assigned at registration).
    pub fn insertion_index(&self) -> u64 {
        self.insertion_index
    }

    /// Whether a bound lifetime has ended.
    pub fn is_expired(&self) -> bool {
        self.lifetime
            .as_ref()
            .map(LifetimeWatch::is_expired)
            .unwrap_or(false)
    }

    /// Reason string used in `ActionForbidden` errors.
    pub(crate) fn forbid_reason(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| "activation forbidden".to_string())
    }
}

impl<C> fmt::Debug for Floodgate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Floodgate")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("layer", &self.layer)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("insertion_index", &self.insertion_index)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Floodgate`]; registers into the engine on `build`.
///
/// Created by [`Engine::floodgate`]. Exactly one of
/// [`forbid`](Self::forbid) / [`modify`](Self::modify) /
/// [`replace`](Self::replace) must be set; the kind implies the phase unless
/// [`phase`](Self::phase) overrides it.
pub struct FloodgateBuilder<'e, C> {
    engine: &'e mut Engine<C>,
    id: FloodgateId,
    kind: Option<FloodgateKind<C>>,
    phase: Option<Phase>,
    layer: i32,
    name: Option<String>,
    lifetime: Option<LifetimeWatch>,
}

impl<'e, C> FloodgateBuilder<'e, C> {
    pub(crate) fn new(engine: &'e mut Engine<C>) -> Self {
        Self {
            engine,
            id: FloodgateId::new(),
            kind: None,
            phase: None,
            layer: 1,
            name: None,
            lifetime: None,
        }
    }

    fn set_kind(mut self, kind: FloodgateKind<C>) -> Self {
        if let Some(existing) = &self.kind {
            panic!(
                "floodgate already has a {} kind; exactly one of forbid/modify/replace is allowed",
                existing.as_str()
            );
        }
        self.kind = Some(kind);
        self
    }

    /// Make this a Forbid floodgate (Request phase).
    ///
    /// # Panics
    ///
    /// Panics if a kind was already set.
    pub fn forbid<F>(self, f: F) -> Self
    where
        F: Fn(&C, &Effect<C>) -> bool + 'static,
    {
        self.set_kind(FloodgateKind::Forbid(Arc::new(f)))
    }

    /// Make this a Modify floodgate (Resolution phase).
    ///
    /// # Panics
    ///
    /// Panics if a kind was already set.
    pub fn modify<F>(self, f: F) -> Self
    where
        F: Fn(&C, &TimingEvent) -> Option<TimingEvent> + 'static,
    {
        self.set_kind(FloodgateKind::Modify(Arc::new(f)))
    }

    /// Make this a Replace floodgate (Resolution phase).
    ///
    /// # Panics
    ///
    /// Panics if a kind was already set.
    pub fn replace<F>(self, f: F) -> Self
    where
        F: Fn(&C, &PendingAction<C>) -> Option<Replacement<C>> + 'static,
    {
        self.set_kind(FloodgateKind::Replace(Arc::new(f)))
    }

    /// Override the phase implied by the kind.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Set the ordering layer (default 1).
    pub fn layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    /// Name the floodgate; used in `ActionForbidden` reasons and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind the registration to a lifetime signal; the floodgate is
    /// unregistered by the start of the Request phase following expiry.
    pub fn bind_lifetime(mut self, signal: &dyn LifetimeSignal) -> Self {
        self.lifetime = Some(LifetimeWatch::bind(signal));
        self
    }

    /// Register the floodgate and return its id.
    ///
    /// # Panics
    ///
    /// Panics if no kind was set. Use [`try_build`](Self::try_build) for the
    /// non-panicking version.
    pub fn build(self) -> FloodgateId {
        self.try_build().unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register the floodgate, or fail if no kind was set.
    pub fn try_build(self) -> Result<FloodgateId, EngineError> {
        let kind = self.kind.ok_or_else(|| {
            EngineError::Host(anyhow::anyhow!(
                "floodgate requires exactly one of forbid/modify/replace"
            ))
        })?;
        let phase = self.phase.unwrap_or_else(|| kind.default_phase());
        let floodgate = Floodgate {
            id: self.id,
            phase,
            layer: self.layer,
            kind,
            name: self.name,
            insertion_index: 0, // assigned by the registry
            lifetime: self.lifetime,
        };
        Ok(self.engine.register_floodgate(floodgate))
    }
}
