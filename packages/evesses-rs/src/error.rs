//! Structured error taxonomy for engine operations.
//!
//! `EngineError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`. The taxonomy is closed: every way an activation or a
//! chain resolution can fail is one of these variants.
//!
//! # The Error Boundary Rule
//!
//! > Host callbacks may fail with anything; the engine surface speaks
//! > `EngineError` only.
//!
//! - `anyhow` is internal transport (ergonomic for host callbacks via the
//!   `Host` variant's `#[from]`)
//! - the named variants are the only failures the engine itself produces
//!
//! # Negation is not failure
//!
//! Two variants describe in-game outcomes rather than engine faults:
//!
//! - [`EngineError::ActivationNegated`] - the effect *never happened*; no
//!   timing event is committed and the chain loop absorbs it.
//! - [`EngineError::EffectNegated`] - the effect resolved to nothing; the
//!   engine commits a synthetic `effect_negated` marker and carries on.
//!
//! Actions signal negation by returning these variants.
//!
//! # Example
//!
//! ```ignore
//! match engine.activate_effect(effect, &mut ctx) {
//!     Ok(()) => {}
//!     Err(EngineError::ActionForbidden { floodgate, reason }) => {
//!         println!("sealed by {floodgate}: {reason}");
//!     }
//!     Err(EngineError::ConstraintViolated { name }) => {
//!         println!("already used: {name}");
//!     }
//!     Err(other) => return Err(other.into()),
//! }
//! ```

use thiserror::Error;

use crate::core::FloodgateId;

/// Closed error taxonomy for effect activation and chain resolution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The activation itself was negated during Resolution: the effect never
    /// happened and no timing event is committed for it.
    #[error("activation negated: {reason}")]
    ActivationNegated {
        /// Host-supplied explanation (e.g. the negating card).
        reason: String,
    },

    /// The effect was negated during Resolution: it resolves to nothing but
    /// a synthetic `effect_negated` marker event is committed.
    #[error("effect negated: {reason}")]
    EffectNegated {
        /// Host-supplied explanation.
        reason: String,
    },

    /// A Request-phase Forbid floodgate refused the activation.
    #[error("action forbidden by floodgate {floodgate}: {reason}")]
    ActionForbidden {
        /// The floodgate's name, or a generic message when unnamed.
        reason: String,
        /// Which floodgate refused.
        floodgate: FloodgateId,
    },

    /// The cost probe or the cost payment failed.
    ///
    /// The engine never refunds: if the cost callback mutated the host
    /// before failing, that mutation stands.
    #[error("cost cannot be paid: {reason}")]
    CostCannotBePaid {
        /// Host-supplied explanation.
        reason: String,
    },

    /// A constraint rejected the activation (e.g. once-per-turn exhausted).
    #[error("constraint violated: {name}")]
    ConstraintViolated {
        /// The constraint key or host-chosen constraint name.
        name: String,
    },

    /// The chain loop exceeded its iteration cap without quiescing.
    ///
    /// This is an engine-level fatal error, distinct from any game error.
    /// Engine state is unspecified afterwards.
    #[error("chain did not quiesce after {iterations} iterations")]
    InfiniteLoopDetected {
        /// How many outer-loop iterations ran before giving up.
        iterations: u32,
    },

    /// Any other host-callback failure, carried verbatim.
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl EngineError {
    /// Shorthand for [`EngineError::ActivationNegated`].
    pub fn activation_negated(reason: impl Into<String>) -> Self {
        Self::ActivationNegated {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`EngineError::EffectNegated`].
    pub fn effect_negated(reason: impl Into<String>) -> Self {
        Self::EffectNegated {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`EngineError::CostCannotBePaid`].
    pub fn cost_cannot_be_paid(reason: impl Into<String>) -> Self {
        Self::CostCannotBePaid {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`EngineError::ConstraintViolated`].
    pub fn constraint_violated(name: impl Into<String>) -> Self {
        Self::ConstraintViolated { name: name.into() }
    }

    /// True for either negation variant.
    pub fn is_negation(&self) -> bool {
        matches!(
            self,
            EngineError::ActivationNegated { .. } | EngineError::EffectNegated { .. }
        )
    }
}
