//! In-memory transport driven by the test: starts and cancels are logged,
//! and the test delivers outcomes through `Scheduler::handle_event`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use dlq_core::error::TransportError;
use dlq_core::transport::{
    ContinuationToken, TransferFailure, TransferHandle, TransferId, TransferRef, Transport,
    TransportEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fresh(String),
    FromToken(String, ContinuationToken),
    Cancel { address: String, want_token: bool },
}

#[derive(Default)]
pub struct ScriptedTransport {
    next_id: AtomicU64,
    calls: Mutex<Vec<Call>>,
    refuse: Mutex<HashSet<String>>,
    live: Mutex<HashMap<TransferId, TransferHandle>>,
    max_live: AtomicUsize,
}

/// The token this transport hands out when `address` is paused.
pub fn token_for(address: &str) -> ContinuationToken {
    ContinuationToken::new(format!("resume:{}", address).into_bytes())
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn starts(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Cancel { .. }))
            .collect()
    }

    pub fn refuse(&self, address: &str) {
        self.refuse.lock().unwrap().insert(address.to_string());
    }

    pub fn allow(&self, address: &str) {
        self.refuse.lock().unwrap().remove(address);
    }

    /// Most recent live transfer for `address`.
    pub fn live_handle(&self, address: &str) -> Option<TransferHandle> {
        self.live
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.address == address)
            .max_by_key(|h| h.id)
            .cloned()
    }

    pub fn live_handles(&self) -> Vec<TransferHandle> {
        let mut all: Vec<_> = self.live.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|h| h.id);
        all
    }

    /// Highest number of simultaneously live transfers ever observed.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Ends the live transfer for `address`, if there is one, and returns the
    /// completion event to deliver.
    pub fn try_finish(&self, address: &str, outcome: Result<(), TransferFailure>) -> Option<TransportEvent> {
        let mut live = self.live.lock().unwrap();
        let id = live
            .values()
            .filter(|h| h.address == address)
            .map(|h| h.id)
            .max()?;
        let handle = live.remove(&id)?;
        Some(TransportEvent::Completed {
            transfer: TransferRef::for_handle(&handle),
            outcome,
        })
    }

    pub fn finish(&self, address: &str, outcome: Result<(), TransferFailure>) -> TransportEvent {
        self.try_finish(address, outcome)
            .unwrap_or_else(|| panic!("no live transfer for {}", address))
    }

    pub fn succeed(&self, address: &str) -> TransportEvent {
        self.finish(address, Ok(()))
    }

    pub fn fail(&self, address: &str, message: &str, continuation: Option<ContinuationToken>) -> TransportEvent {
        self.finish(
            address,
            Err(TransferFailure {
                message: message.to_string(),
                continuation,
            }),
        )
    }

    pub fn progress(&self, address: &str, total: u64, expected: Option<u64>) -> TransportEvent {
        let handle = self
            .live_handle(address)
            .unwrap_or_else(|| panic!("no live transfer for {}", address));
        TransportEvent::Progress {
            transfer: TransferRef::for_handle(&handle),
            bytes_written: total,
            total_bytes_written: total,
            bytes_expected: expected,
        }
    }

    fn start(&self, address: &str, call: Call) -> Result<TransferHandle, TransportError> {
        self.calls.lock().unwrap().push(call);
        if self.refuse.lock().unwrap().contains(address) {
            return Err(TransportError::Rejected(format!("{} refused", address)));
        }
        let handle = TransferHandle {
            id: TransferId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            address: address.to_string(),
        };
        let mut live = self.live.lock().unwrap();
        live.insert(handle.id, handle.clone());
        self.max_live.fetch_max(live.len(), Ordering::SeqCst);
        Ok(handle)
    }
}

impl Transport for ScriptedTransport {
    fn start_fresh(&self, address: &str) -> Result<TransferHandle, TransportError> {
        self.start(address, Call::Fresh(address.to_string()))
    }

    fn start_from_token(
        &self,
        address: &str,
        token: &ContinuationToken,
    ) -> Result<TransferHandle, TransportError> {
        self.start(address, Call::FromToken(address.to_string(), token.clone()))
    }

    fn request_cancel(&self, handle: &TransferHandle, want_token: bool) -> Option<ContinuationToken> {
        self.calls.lock().unwrap().push(Call::Cancel {
            address: handle.address.clone(),
            want_token,
        });
        self.live.lock().unwrap().remove(&handle.id);
        want_token.then(|| token_for(&handle.address))
    }
}
