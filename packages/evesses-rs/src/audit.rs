//! Debug-only chain auditing for development visibility.
//!
//! Records one entry per `resolve_chain` call: how many outer-loop
//! iterations ran, how many chain entries resolved, how many events were
//! committed, and how many trigger responses were Requested. Only active in
//! debug builds; zero production cost.
//!
//! # Purpose
//!
//! Auditing catches:
//! - Runaway cascades (iteration counts creeping toward the cap)
//! - Dead wiring (resolutions that commit events but never match a trigger)
//! - Chains that consistently abort partway
//!
//! # Usage
//!
//! ```ignore
//! #[cfg(debug_assertions)]
//! {
//!     for entry in engine.audit_log().recent(10) {
//!         if !entry.completed {
//!             tracing::warn!(?entry, "chain resolution did not complete");
//!         }
//!     }
//! }
//! ```

use std::collections::VecDeque;

/// Maximum number of audit entries to retain.
const MAX_AUDIT_ENTRIES: usize = 1000;

/// Accounting for a single `resolve_chain` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainAuditEntry {
    /// Outer-loop iterations that ran.
    pub iterations: u32,
    /// Chain entries popped and resolved.
    pub entries_resolved: usize,
    /// Timing events committed to history.
    pub events_committed: usize,
    /// Trigger responses Requested back onto the chain.
    pub responses_requested: usize,
    /// Whether the call reached quiescence (false: error or iteration cap).
    pub completed: bool,
}

impl ChainAuditEntry {
    /// True if the call resolved nothing at all.
    pub fn was_empty(&self) -> bool {
        self.entries_resolved == 0
    }

    /// True if resolutions committed events but no trigger ever responded.
    pub fn was_silent(&self) -> bool {
        self.events_committed > 0 && self.responses_requested == 0
    }
}

/// Bounded log of recent chain resolutions.
#[derive(Debug, Default)]
pub struct ChainAuditLog {
    entries: VecDeque<ChainAuditEntry>,
}

impl ChainAuditLog {
    /// Create a new empty audit log.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_AUDIT_ENTRIES),
        }
    }

    /// Record an audit entry, evicting the oldest past the cap.
    pub fn record(&mut self, entry: ChainAuditEntry) {
        if self.entries.len() >= MAX_AUDIT_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ChainAuditEntry> {
        self.entries.iter()
    }

    /// The most recent `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<ChainAuditEntry> {
        self.entries.iter().rev().take(n).copied().collect()
    }

    /// Entries that committed events without any trigger responding.
    pub fn silent_runs(&self) -> Vec<ChainAuditEntry> {
        self.entries.iter().filter(|e| e.was_silent()).copied().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
