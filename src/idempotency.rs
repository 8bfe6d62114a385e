//! Admission-time duplicate rejection.
//!
//! Tracks the IDs of messages admitted into the local pipeline. In the
//! default release-on-success mode the consumer removes an ID once the
//! message is processed, so the dedup window is effectively "time in flight"
//! and the same ID can be re-admitted after a replay or reset. Permanent mode
//! keeps IDs for the life of the process.

use dashmap::DashSet;

/// Retention policy for admitted message IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdempotencyMode {
    /// IDs are released when the consumer finishes the message.
    #[default]
    ReleaseOnSuccess,
    /// IDs are kept forever; [`IdempotencyStore::remove_processed`] is a no-op.
    Permanent,
}

/// Concurrent set of in-flight message IDs.
#[derive(Debug)]
pub struct IdempotencyStore {
    processed_ids: DashSet<String>,
    mode: IdempotencyMode,
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(IdempotencyMode::ReleaseOnSuccess)
    }
}

impl IdempotencyStore {
    pub fn new(mode: IdempotencyMode) -> Self {
        Self {
            processed_ids: DashSet::new(),
            mode,
        }
    }

    /// Check-and-insert: returns `true` when the ID was already present
    /// (duplicate), inserting it atomically on first sight.
    pub fn already_processed(&self, id: &str) -> bool {
        !self.processed_ids.insert(id.to_string())
    }

    /// Release an ID so it may be admitted again later. Ignored in
    /// [`IdempotencyMode::Permanent`]. Returns whether the ID was present.
    pub fn remove_processed(&self, id: &str) -> bool {
        if self.mode == IdempotencyMode::Permanent {
            return false;
        }
        self.processed_ids.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.processed_ids.clear();
    }

    pub fn len(&self) -> usize {
        self.processed_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_ids.is_empty()
    }
}
