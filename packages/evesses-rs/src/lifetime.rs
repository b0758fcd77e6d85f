//! Lifetime signals - how registrations learn their source is gone.
//!
//! Triggers and floodgates usually belong to some game-world object (a card
//! on the field, a persistent rule). When that object leaves play the
//! registration must die with it. The engine does not know what a "card" is,
//! so it consumes a single capability instead: anything that can deliver a
//! one-shot expiry notification.
//!
//! # The capability
//!
//! [`LifetimeSignal::subscribe_expiry`] registers a `FnOnce` callback and
//! returns an [`Unsubscribe`] guard. The engine's subscription just sets a
//! shared flag ([`LifetimeWatch`]); registries drop flagged entries before
//! the next Request phase begins.
//!
//! Hosts with separate "expired" and "destroyed" signals adapt both onto the
//! one capability - [`HostLifetime`] shows the pattern: `expire()` and
//! `destroy()` both fire the same subscriber list, exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// One-shot expiry callback.
pub type ExpiryCallback = Box<dyn FnOnce()>;

/// Capability consumed by `bind_lifetime`: a source of a one-shot expiry
/// notification.
///
/// Implementations must fire each subscribed callback at most once, and must
/// fire immediately (inside `subscribe_expiry`) if the lifetime has already
/// ended.
pub trait LifetimeSignal {
    /// Subscribe a one-shot callback; the returned guard cancels the
    /// subscription when dropped.
    fn subscribe_expiry(&self, callback: ExpiryCallback) -> Unsubscribe;
}

/// RAII guard for a lifetime subscription.
///
/// Dropping the guard cancels the subscription (if it has not fired yet).
pub struct Unsubscribe {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Unsubscribe {
    /// Create a guard that runs `cancel` on drop.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A guard with nothing to cancel (the callback already fired).
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancel the subscription now instead of at drop time.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Engine-side view of a bound lifetime: an expired flag fed by the
/// subscription.
///
/// Registries poll `is_expired` during the Request-entry sweep; they never
/// call back into the host.
pub struct LifetimeWatch {
    expired: Arc<AtomicBool>,
    _subscription: Unsubscribe,
}

impl LifetimeWatch {
    /// Bind to a signal: subscribes a one-shot callback that flips the flag.
    pub fn bind(signal: &dyn LifetimeSignal) -> Self {
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);
        let subscription =
            signal.subscribe_expiry(Box::new(move || flag.store(true, Ordering::Release)));
        Self {
            expired,
            _subscription: subscription,
        }
    }

    /// Whether the bound lifetime has ended.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for LifetimeWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeWatch")
            .field("expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// HostLifetime - concrete signal source
// =============================================================================

#[derive(Default)]
struct HostLifetimeInner {
    expired: bool,
    next_key: u64,
    subscribers: Vec<(u64, ExpiryCallback)>,
}

/// A concrete [`LifetimeSignal`] source for hosts (and tests).
///
/// Clone it freely; all clones share the same state. Both [`expire`] and
/// [`destroy`] end the lifetime - hosts with distinct "left play" and
/// "object freed" signals wire both to the same `HostLifetime`, which is how
/// the destroyed-fallback contract is met with a single capability.
///
/// [`expire`]: HostLifetime::expire
/// [`destroy`]: HostLifetime::destroy
///
/// # Example
///
/// ```ignore
/// let card_lifetime = HostLifetime::new();
///
/// engine
///     .on_timing("standby")
///     .action(|ctx, _| Ok(TimingEvent::new("upkeep_paid", 2)))
///     .bind_lifetime(&card_lifetime)
///     .build();
///
/// // Later, when the card leaves the field:
/// card_lifetime.expire();
/// ```
#[derive(Clone, Default)]
pub struct HostLifetime {
    inner: Arc<Mutex<HostLifetimeInner>>,
}

impl HostLifetime {
    /// Create a new live lifetime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the inner lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, HostLifetimeInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// End the lifetime, firing all subscribers exactly once.
    ///
    /// Subsequent calls (and `destroy`) are no-ops.
    pub fn expire(&self) {
        let subscribers = {
            let mut inner = self.lock_inner();
            if inner.expired {
                return;
            }
            inner.expired = true;
            std::mem::take(&mut inner.subscribers)
        };
        // Fire outside the lock so callbacks may re-enter subscribe_expiry.
        for (_, callback) in subscribers {
            callback();
        }
    }

    /// Host-destroyed fallback; equivalent to [`expire`](HostLifetime::expire).
    pub fn destroy(&self) {
        self.expire();
    }

    /// Whether the lifetime has ended.
    pub fn is_expired(&self) -> bool {
        self.lock_inner().expired
    }

    /// Number of live subscriptions (for diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.lock_inner().subscribers.len()
    }
}

impl LifetimeSignal for HostLifetime {
    fn subscribe_expiry(&self, callback: ExpiryCallback) -> Unsubscribe {
        let mut inner = self.lock_inner();
        if inner.expired {
            drop(inner);
            callback();
            return Unsubscribe::noop();
        }
        let key = inner.next_key;
        inner.next_key += 1;
        inner.subscribers.push((key, callback));
        drop(inner);

        let weak: Weak<Mutex<HostLifetimeInner>> = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut guard = inner
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.subscribers.retain(|(k, _)| *k != key);
            }
        })
    }
}

impl fmt::Debug for HostLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("HostLifetime")
            .field("expired", &inner.expired)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}
