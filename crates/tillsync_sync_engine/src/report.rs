//! Drain pass results.

use std::fmt;
use std::time::Duration;
use tillsync_core::EntryId;

/// What started a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// Connectivity came back.
    Reconnected,
    /// A caller asked for a sync.
    Manual,
    /// Backoff timer after a pass with failures.
    Retry,
    /// An entry was enqueued while online.
    Enqueued,
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reconnected => "reconnected",
            Self::Manual => "manual",
            Self::Retry => "retry",
            Self::Enqueued => "enqueued",
        };
        f.write_str(name)
    }
}

/// Result of dispatching one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The remote store acknowledged the mutation.
    Synced,
    /// The mutation failed; the entry stays queued.
    Failed(String),
}

impl EntryOutcome {
    /// Whether the entry was acknowledged.
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// Aggregated result of one drain pass.
#[derive(Debug, Clone)]
pub struct DrainReport {
    /// What started the pass.
    pub trigger: DrainTrigger,
    /// Per-entry results in dispatch order.
    pub outcomes: Vec<(EntryId, EntryOutcome)>,
    /// Entries cleared from the queue after the pass.
    pub removed: usize,
    /// Unsynced entries left afterwards.
    pub pending_after: usize,
    /// Wall time of the pass.
    pub elapsed: Duration,
    /// Further triggers folded into this pass.
    pub coalesced: usize,
    /// Another pass was already running, so this call dispatched nothing.
    pub deferred: bool,
}

impl DrainReport {
    pub(crate) fn empty(trigger: DrainTrigger, pending_after: usize) -> Self {
        Self {
            trigger,
            outcomes: Vec::new(),
            removed: 0,
            pending_after,
            elapsed: Duration::ZERO,
            coalesced: 0,
            deferred: false,
        }
    }

    /// Number of acknowledged entries.
    pub fn synced_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_synced()).count()
    }

    /// Number of failed entries.
    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.synced_count()
    }

    /// Whether every dispatched entry was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }

    /// Looks up the outcome for one entry.
    pub fn outcome(&self, id: EntryId) -> Option<&EntryOutcome> {
        self.outcomes
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, outcome)| outcome)
    }
}
