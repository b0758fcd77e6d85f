//! Triggers - passive rules that answer committed timing events.
//!
//! A trigger names a `(timing, layer)` pair, optionally narrows it with a
//! filter predicate, and embeds the [`Effect`] to Request when it matches.
//! Matching happens during the Commit phase; matched triggers queue as
//! pending responses and re-enter the chain in SEGOC order.
//!
//! # Optional vs mandatory
//!
//! A mandatory trigger always Requests its effect. An optional trigger is
//! player-gated: the engine consults the pluggable optional-trigger prompt
//! (default: auto-accept) before Requesting.

use std::fmt;
use std::sync::Arc;

use crate::core::{ActionValue, Targets, TimingEvent, TriggerId};
use crate::effect::EffectBuilder;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::lifetime::{LifetimeSignal, LifetimeWatch};

/// Trigger filter predicate over a (committed-in-progress) timing event.
pub type FilterFn = Arc<dyn Fn(&TimingEvent) -> bool>;

/// A registered passive rule: matches timing events, responds with its
/// embedded effect.
pub struct Trigger<C> {
    pub(crate) id: TriggerId,
    pub(crate) timing: String,
    pub(crate) layer: i32,
    pub(crate) filter: Option<FilterFn>,
    pub(crate) optional: bool,
    pub(crate) effect: Arc<crate::effect::Effect<C>>,
    pub(crate) lifetime: Option<LifetimeWatch>,
}

impl<C> Trigger<C> {
    /// This trigger's id.
    pub fn id(&self) -> TriggerId {
        self.id
    }

    /// The timing name this trigger listens for.
    pub fn timing(&self) -> &str {
        &self.timing
    }

    /// The layer this trigger listens on.
    pub fn layer(&self) -> i32 {
        self.layer
    }

    /// Whether activation is player-gated.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The embedded response effect.
    pub fn effect(&self) -> &Arc<crate::effect::Effect<C>> {
        &self.effect
    }

    /// Whether a bound lifetime has ended.
    pub fn is_expired(&self) -> bool {
        self.lifetime
            .as_ref()
            .map(LifetimeWatch::is_expired)
            .unwrap_or(false)
    }

    /// Full match test: timing, layer, and filter.
    pub(crate) fn matches(&self, event: &TimingEvent) -> bool {
        self.timing == event.timing
            && self.layer == event.layer
            && self.filter.as_ref().map(|f| f(event)).unwrap_or(true)
    }
}

impl<C> fmt::Debug for Trigger<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("timing", &self.timing)
            .field("layer", &self.layer)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Trigger`]; registers into the engine on `build`.
///
/// Created by [`Engine::on_timing`]. The layer defaults to 1.
pub struct TriggerBuilder<'e, C> {
    engine: &'e mut Engine<C>,
    id: TriggerId,
    timing: String,
    layer: i32,
    filter: Option<FilterFn>,
    optional: bool,
    effect: EffectBuilder<C>,
    lifetime: Option<LifetimeWatch>,
}

impl<'e, C> TriggerBuilder<'e, C> {
    pub(crate) fn new(engine: &'e mut Engine<C>, timing: impl Into<String>) -> Self {
        Self {
            engine,
            id: TriggerId::new(),
            timing: timing.into(),
            layer: 1,
            filter: None,
            optional: false,
            effect: EffectBuilder::new(),
            lifetime: None,
        }
    }

    /// Set the layer to listen on (default 1).
    pub fn layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    /// Narrow matching with a predicate over the event.
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&TimingEvent) -> bool + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Make activation player-gated.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Make activation mandatory (the default).
    pub fn mandatory(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Restrict the response to one activation attempt per turn, keyed by
    /// this trigger's id.
    pub fn once_per_turn(mut self) -> Self {
        let key = self.id.to_string();
        self.effect = self.effect.once_per_turn_keyed(key);
        self
    }

    /// Restrict the response to one activation attempt per turn under an
    /// explicit key.
    pub fn once_per_turn_keyed(mut self, key: impl Into<String>) -> Self {
        self.effect = self.effect.once_per_turn_keyed(key);
        self
    }

    /// Set the response's primary action.
    pub fn action<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.effect = self.effect.action(f);
        self
    }

    /// Add a response step that executes unless the prior step errored.
    pub fn and_then<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut C, &Targets) -> Result<R, EngineError> + 'static,
        R: Into<ActionValue>,
    {
        self.effect = self.effect.and_then(f);
        self
    }

    /// Bind the registration to a lifetime signal; the trigger is
    /// unregistered by the start of the Request phase following expiry.
    pub fn bind_lifetime(mut self, signal: &dyn LifetimeSignal) -> Self {
        self.lifetime = Some(LifetimeWatch::bind(signal));
        self
    }

    /// Register the trigger and return its id.
    pub fn build(self) -> TriggerId {
        let trigger = Trigger {
            id: self.id,
            timing: self.timing,
            layer: self.layer,
            filter: self.filter,
            optional: self.optional,
            effect: Arc::new(self.effect.build()),
            lifetime: self.lifetime,
        };
        self.engine.register_trigger(trigger)
    }
}
