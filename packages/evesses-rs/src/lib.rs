//! # Evesses
//!
//! A synchronous effect-resolution engine for turn-based games whose rules
//! resemble Yu-Gi-Oh!-style chains: effects are proposed, queued onto a
//! last-in-first-out stack, and resolved atomically while standing
//! interceptors ("floodgates") forbid, modify, or replace what happens.
//!
//! ## Core Concepts
//!
//! Evesses separates **proposals** from **facts**:
//! - [`Effect`] = Proposals (an activation that wants to happen)
//! - [`TimingEvent`] = Facts (what actually happened, stamped and scoped)
//!
//! Between the two sit three phases and two standing registries:
//!
//! ```text
//! activate_effect(effect)
//!     │
//!     ▼ Request ── constraints → forbid floodgates → cost → targets
//! ┌──────────────┐
//! │ chain stack  │  (LIFO)
//! └──────┬───────┘
//!        ▼ resolve_chain()
//!    Resolution ── replace floodgates → action → modify floodgates
//!        │
//!        ▼ Commit ── timestamp + scope snapshot → history
//!        │                                          │
//!        │                 ┌────────────────────────┘
//!        │                 ▼ trigger match
//!        │          pending responses ── SEGOC sort ── Request each
//!        └─────────────────────────────────────────────────┐
//!                     loop until stack and queue are empty ┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **The chain is LIFO** - responses resolve before what they answered
//! 2. **Floodgates are ordered** - `(layer asc, insertion asc)`, always
//! 3. **History is monotonic** - strictly increasing engine timestamps
//! 4. **Costs are never refunded** - pay before you know the outcome
//! 5. **One queue entry per trigger per matching batch**
//!
//! ## What This Is Not
//!
//! Evesses is **not**:
//! - A game-state store (the host context is opaque to it)
//! - A rules database (effects are host callbacks, not data)
//! - An async runtime (strictly single-threaded, every callback inline)
//! - A replay system (no engine-state serialization)
//!
//! Evesses **is**:
//! > The arbiter of *when* and *whether* effects happen, never of *what*
//! > they do.
//!
//! ## Example
//!
//! ```ignore
//! use evesses::{Engine, EngineError, TimingEvent};
//!
//! struct Duel { lp: i32 }
//!
//! let mut engine: Engine<Duel> = Engine::new();
//! let mut duel = Duel { lp: 8000 };
//!
//! // A passive rule: whenever something is destroyed, draw.
//! engine
//!     .on_timing("destroyed")
//!     .layer(2)
//!     .action(|duel: &mut Duel, _| Ok(TimingEvent::new("drawn", 2)))
//!     .build();
//!
//! // A standing rule: spell activations are sealed outright.
//! engine
//!     .floodgate()
//!     .name("spell seal")
//!     .forbid(|_duel, effect| effect.has_tag("spell"))
//!     .build();
//!
//! // Propose an effect and let the chain play out.
//! let attack = engine
//!     .direct_effect()
//!     .tag("battle")
//!     .action(|duel: &mut Duel, _| Ok(TimingEvent::new("destroyed", 2)))
//!     .build();
//!
//! engine.activate_effect(attack, &mut duel)?;
//! engine.resolve_chain(&mut duel)?;
//! # Ok::<(), EngineError>(())
//! ```

// Core modules
mod core;
mod effect;
mod engine;
mod error;
mod floodgate;
mod lifetime;
mod pipeline;
mod registry;
mod trigger;

// Debug auditing for chain visibility
#[cfg(debug_assertions)]
pub mod audit;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// End-to-end scenario tests (test-only)
#[cfg(test)]
mod scenario_tests;


// Re-export core vocabulary
pub use crate::core::{
    ActionResult, ActionValue, CompoundKind, EffectId, FloodgateId, Scope, Targets, TimingEvent,
    TriggerId, EFFECT_NEGATED_TIMING, NEGATION_LAYER,
};

// Re-export error types
pub use crate::error::EngineError;

// Re-export effect types
pub use crate::effect::{
    ActionFn, CompoundStep, ConstraintFn, CostFn, Effect, EffectBuilder, TargetFn,
};

// Re-export trigger types
pub use crate::trigger::{FilterFn, Trigger, TriggerBuilder};

// Re-export floodgate types
pub use crate::floodgate::{
    Floodgate, FloodgateBuilder, FloodgateKind, ForbidFn, ModifyFn, PendingAction, Phase,
    Replacement, ReplaceFn,
};

// Re-export lifetime capability
pub use crate::lifetime::{
    ExpiryCallback, HostLifetime, LifetimeSignal, LifetimeWatch, Unsubscribe,
};

// Re-export registries exposed through the public surface
pub use crate::registry::{ConstraintTracker, ScopeStack};

// Re-export engine types (primary entry point)
pub use crate::engine::{
    Engine, OptionalTriggerPrompt, SegocSorter, DEFAULT_MAX_CHAIN_ITERATIONS,
};
