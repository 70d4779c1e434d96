//! Concurrency slots: how many records may be active at once.
//!
//! Lives inside the scheduler's locked state, so plain counters suffice.
//! The limit can change at runtime; lowering it never takes slots back from
//! records already holding one, it only blocks new acquisitions until enough
//! have been released.

#[derive(Debug)]
pub(super) struct ActiveSlots {
    limit: usize,
    in_use: usize,
}

impl ActiveSlots {
    /// Create with the given limit (clamped to at least 1).
    pub(super) fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_use: 0,
        }
    }

    pub(super) fn limit(&self) -> usize {
        self.limit
    }

    pub(super) fn in_use(&self) -> usize {
        self.in_use
    }

    /// Free slots; 0 while over the limit after a decrease.
    pub(super) fn available(&self) -> usize {
        self.limit.saturating_sub(self.in_use)
    }

    /// Take one slot. Returns false (and takes nothing) if none is free.
    pub(super) fn acquire(&mut self) -> bool {
        if self.available() == 0 {
            return false;
        }
        self.in_use += 1;
        true
    }

    pub(super) fn release(&mut self) {
        if self.in_use == 0 {
            tracing::warn!("slot release with no slot in use");
            return;
        }
        self.in_use -= 1;
    }

    pub(super) fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }
}
