//! Core vocabulary for the evesses effect-resolution engine.
//!
//! # Overview
//!
//! Evesses separates **proposals** from **facts**:
//! - [`Effect`](crate::Effect) = Proposals (an activation that wants to happen)
//! - [`TimingEvent`] = Facts (what actually happened, stamped and scoped)
//!
//! Everything an action hands back to the engine is funneled through
//! [`ActionResult`]: a success flag ("did something observable") plus the
//! timing events the action produced. Actions written against a dynamic host
//! binding may instead return any [`ActionValue`] variant; the engine
//! normalizes those into an `ActionResult` before floodgates see them.
//!
//! # Identity
//!
//! Effects, triggers, and floodgates each carry a random id newtype
//! ([`EffectId`], [`TriggerId`], [`FloodgateId`]). Ids are transport-level
//! metadata: they show up in negation markers, forbid errors, and logs, and
//! never affect resolution order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque target payload selected during the Request phase.
///
/// The engine never inspects targets; it stores them with the chain entry,
/// offers them to Replace floodgates, and hands them to actions.
pub type Targets = Value;

/// Timing name of the synthetic marker committed when an effect is negated.
pub const EFFECT_NEGATED_TIMING: &str = "effect_negated";

/// Layer of the synthetic `effect_negated` marker event.
pub const NEGATION_LAYER: i32 = 2;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier of an [`Effect`](crate::Effect).
///
/// Assigned when the builder is created, so constraint keys derived from the
/// id are stable before `build()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EffectId(Uuid);

impl EffectId {
    /// Create a new random effect id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a registered [`Trigger`](crate::Trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TriggerId(Uuid);

impl TriggerId {
    /// Create a new random trigger id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a registered [`Floodgate`](crate::Floodgate).
///
/// Carried inside [`EngineError::ActionForbidden`](crate::EngineError) so
/// callers can tell *which* floodgate refused an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FloodgateId(Uuid);

impl FloodgateId {
    /// Create a new random floodgate id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FloodgateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FloodgateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Temporal scopes
// =============================================================================

/// One level of temporal nesting (e.g. turn → phase → step).
///
/// Layers are purely informational to the host; the engine never orders or
/// validates scope nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    /// Host-chosen scope name (e.g. `"turn"`, `"battle_phase"`).
    pub name: String,
    /// Informational nesting layer.
    pub layer: i32,
}

impl Scope {
    /// Create a new scope label.
    pub fn new(name: impl Into<String>, layer: i32) -> Self {
        Self {
            name: name.into(),
            layer,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.layer)
    }
}

// =============================================================================
// Timing events
// =============================================================================

/// An immutable record of something that happened during resolution.
///
/// Events are created by actions (un-stamped) and become facts at commit
/// time, when the engine assigns the monotonic `timestamp`, deep-copies the
/// current scope stack into `scopes`, and stamps the wall clock.
///
/// # Example
///
/// ```ignore
/// let event = TimingEvent::new("destroyed", 2)
///     .with_data("card", card_id.to_string())
///     .with_data("by_battle", true);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingEvent {
    /// Timing name matched against trigger registrations.
    pub timing: String,
    /// Layer matched against trigger registrations.
    pub layer: i32,
    /// Opaque host data attached to the event.
    pub data: Map<String, Value>,
    /// Monotonic engine timestamp. `None` until the event is committed.
    pub timestamp: Option<u64>,
    /// Snapshot of the scope stack at commit time.
    pub scopes: Vec<Scope>,
    /// Wall-clock commit time. `None` until the event is committed.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl TimingEvent {
    /// Create a new un-committed timing event.
    pub fn new(timing: impl Into<String>, layer: i32) -> Self {
        Self {
            timing: timing.into(),
            layer,
            data: Map::new(),
            timestamp: None,
            scopes: Vec::new(),
            recorded_at: None,
        }
    }

    /// Attach a data entry, consuming and returning the event.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Look up a string data entry by key.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// True once the event has been committed to history.
    pub fn is_committed(&self) -> bool {
        self.timestamp.is_some()
    }
}

impl fmt::Display for TimingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "[{}] {}@{}", ts, self.timing, self.layer),
            None => write!(f, "[-] {}@{}", self.timing, self.layer),
        }
    }
}

// =============================================================================
// Action results
// =============================================================================

/// Canonical return payload of an action.
///
/// `succeeded` means "did something observable" - it is what the
/// `and_if_you_do` family of compound steps branches on. An action that runs
/// without error but changes nothing returns [`ActionResult::none`].
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    /// Whether the action did something observable.
    pub succeeded: bool,
    /// Timing events the action produced, in emission order.
    pub events: Vec<TimingEvent>,
}

impl ActionResult {
    /// The action ran but did nothing observable.
    pub fn none() -> Self {
        Self {
            succeeded: false,
            events: Vec::new(),
        }
    }

    /// The action did something but has no events to report.
    pub fn some() -> Self {
        Self {
            succeeded: true,
            events: Vec::new(),
        }
    }

    /// The action did something and produced one event.
    pub fn with_event(event: TimingEvent) -> Self {
        Self {
            succeeded: true,
            events: vec![event],
        }
    }

    /// The action did something and produced several events.
    pub fn with_events(events: Vec<TimingEvent>) -> Self {
        Self {
            succeeded: true,
            events,
        }
    }
}

/// Raw value handed back by an action before normalization.
///
/// This is the dynamic-binding accommodation: hosts that bridge a scripting
/// layer can return whatever shape the script produced and let the engine
/// normalize it. Statically written actions should return [`ActionResult`]
/// (or a [`TimingEvent`] / `Vec<TimingEvent>` / `bool`) and rely on the
/// `From` impls.
#[derive(Debug, Clone)]
pub enum ActionValue {
    /// Already-normalized payload; kept as-is.
    Result(ActionResult),
    /// A single event; normalizes to `succeeded = true`.
    Event(TimingEvent),
    /// An event list; normalizes to `succeeded = true`.
    Events(Vec<TimingEvent>),
    /// A bare success flag with no events.
    Bool(bool),
    /// An integer; zero normalizes to "did nothing".
    Int(i64),
    /// The null value; normalizes to "did nothing".
    Null,
    /// Any other opaque value; treated as a positive signal.
    Opaque,
}

impl ActionValue {
    /// Normalize the raw value into an [`ActionResult`].
    pub fn normalize(self) -> ActionResult {
        match self {
            ActionValue::Result(result) => result,
            ActionValue::Event(event) => ActionResult::with_event(event),
            ActionValue::Events(events) => ActionResult::with_events(events),
            ActionValue::Bool(succeeded) => ActionResult {
                succeeded,
                events: Vec::new(),
            },
            ActionValue::Int(0) => ActionResult::none(),
            ActionValue::Int(_) => ActionResult::some(),
            ActionValue::Null => ActionResult::none(),
            ActionValue::Opaque => ActionResult::some(),
        }
    }
}

impl From<ActionResult> for ActionValue {
    fn from(result: ActionResult) -> Self {
        ActionValue::Result(result)
    }
}

impl From<TimingEvent> for ActionValue {
    fn from(event: TimingEvent) -> Self {
        ActionValue::Event(event)
    }
}

impl From<Vec<TimingEvent>> for ActionValue {
    fn from(events: Vec<TimingEvent>) -> Self {
        ActionValue::Events(events)
    }
}

impl From<bool> for ActionValue {
    fn from(b: bool) -> Self {
        ActionValue::Bool(b)
    }
}

impl From<i64> for ActionValue {
    fn from(n: i64) -> Self {
        ActionValue::Int(n)
    }
}

impl From<()> for ActionValue {
    fn from(_: ()) -> Self {
        ActionValue::Null
    }
}

// =============================================================================
// Compound steps
// =============================================================================

/// Conditionality of a secondary action attached to an effect.
///
/// `AndThenIfYouDo` resolves identically to `AndIfYouDo`; the tag is kept
/// distinct for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompoundKind {
    /// Always executes, irrespective of the prior step.
    And,
    /// Executes iff the prior step did not error.
    AndThen,
    /// Executes iff the prior step did something observable.
    AndIfYouDo,
    /// Same execution rule as [`CompoundKind::AndIfYouDo`]; distinct tag.
    AndThenIfYouDo,
}

impl CompoundKind {
    /// Decide whether a step of this kind runs, given the prior step's fate.
    pub fn should_execute(&self, prev_errored: bool, prev_succeeded: bool) -> bool {
        match self {
            CompoundKind::And => true,
            CompoundKind::AndThen => !prev_errored,
            CompoundKind::AndIfYouDo | CompoundKind::AndThenIfYouDo => prev_succeeded,
        }
    }

    /// Stable reporting tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompoundKind::And => "and",
            CompoundKind::AndThen => "and_then",
            CompoundKind::AndIfYouDo => "and_if_you_do",
            CompoundKind::AndThenIfYouDo => "and_then_if_you_do",
        }
    }
}

impl fmt::Display for CompoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
