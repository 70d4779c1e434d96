//! Host lifecycle hook: a completion the host hands over after a cold restart,
//! to be run once when the transport has reconciled every transfer that was
//! in flight before the restart.

use std::sync::{Mutex, PoisonError};

type Completion = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub(super) struct BackgroundCompletion {
    handler: Mutex<Option<Completion>>,
}

impl BackgroundCompletion {
    /// Stores `handler`, replacing (and dropping) any earlier one.
    pub(super) fn store(&self, handler: Completion) {
        let replaced = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler);
        if replaced.is_some() {
            tracing::debug!("replaced pending background completion");
        }
    }

    /// Runs the stored handler, if any, and discards it. Returns whether one ran.
    pub(super) fn fire(&self) -> bool {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handler {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }
}
