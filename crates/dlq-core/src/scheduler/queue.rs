//! Locked scheduler state: the record store, the waiting queue, slots, and
//! the transfer index. Every method here runs inside the critical section.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{DownloadError, TransportError};
use crate::record::{DownloadId, DownloadRecord, DownloadState};
use crate::transport::{TransferId, TransferRef, Transport};

use super::notify::Outbox;
use super::slots::ActiveSlots;

/// How many inconsistencies are kept for inspection.
const INCONSISTENCY_HISTORY: usize = 64;

/// A transport report that did not fit the scheduler's view of the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency {
    /// Which kind of report triggered it (e.g. "completion").
    pub event: &'static str,
    pub detail: String,
}

/// Result of matching a transport reference against the active set.
pub(super) enum Resolved {
    Active(DownloadId),
    /// A transfer the scheduler cancelled itself; late reports are expected.
    Retired(TransferId),
    Unknown,
}

pub(super) struct QueueState {
    /// Canonical store. A record's queue is its state tag.
    pub(super) records: HashMap<DownloadId, DownloadRecord>,
    /// Ids in `Waiting`, in admission order.
    pub(super) waiting: VecDeque<DownloadId>,
    pub(super) slots: ActiveSlots,
    /// Transfer id → record, for active records only.
    pub(super) transfers: HashMap<TransferId, DownloadId>,
    pub(super) retired: HashSet<TransferId>,
    inconsistencies: VecDeque<Inconsistency>,
    inconsistency_total: u64,
}

impl QueueState {
    pub(super) fn new(concurrency_limit: usize) -> Self {
        Self {
            records: HashMap::new(),
            waiting: VecDeque::new(),
            slots: ActiveSlots::new(concurrency_limit),
            transfers: HashMap::new(),
            retired: HashSet::new(),
            inconsistencies: VecDeque::new(),
            inconsistency_total: 0,
        }
    }

    pub(super) fn record_inconsistency(&mut self, event: &'static str, detail: String) {
        tracing::warn!(event, "scheduler inconsistency: {}", detail);
        if self.inconsistencies.len() == INCONSISTENCY_HISTORY {
            self.inconsistencies.pop_front();
        }
        self.inconsistencies.push_back(Inconsistency { event, detail });
        self.inconsistency_total += 1;
    }

    pub(super) fn inconsistencies(&self) -> Vec<Inconsistency> {
        self.inconsistencies.iter().cloned().collect()
    }

    pub(super) fn inconsistency_total(&self) -> u64 {
        self.inconsistency_total
    }

    fn remove_waiting(&mut self, id: &DownloadId) {
        self.waiting.retain(|w| w != id);
    }

    /// Registers or re-admits `record` and runs admission.
    pub(super) fn submit(&mut self, record: DownloadRecord, transport: &dyn Transport, out: &mut Outbox) {
        let id = record.id().clone();
        if let Some(existing) = self.records.get_mut(&id) {
            match existing.state() {
                DownloadState::Waiting if existing.start_failed() => {
                    tracing::debug!(id = %id, "submit: retrying failed start");
                    existing.merge_from(record);
                    self.admit(transport, out);
                    return;
                }
                DownloadState::Waiting | DownloadState::Active => {
                    tracing::debug!(id = %id, state = %existing.state(), "submit: already scheduled");
                    return;
                }
                DownloadState::Completed => {
                    tracing::debug!(id = %id, "submit: completed record restarts from zero");
                    existing.merge_from(record);
                    existing.reset_progress();
                }
                DownloadState::Paused | DownloadState::Stopped => existing.merge_from(record),
            }
        } else {
            self.records.insert(id.clone(), record);
        }
        let Some(entry) = self.records.get_mut(&id) else {
            return;
        };

        entry.set_state(DownloadState::Waiting);
        out.state(entry);
        tracing::info!(id = %id, url = %entry.remote_location(), resumable = entry.continuation().is_some(), "queued");
        self.waiting.push_back(id);
        self.admit(transport, out);
    }

    /// Moves a waiting or active record to `target` (Paused or Stopped).
    /// Returns false if the record is unknown or not interruptible.
    pub(super) fn interrupt(
        &mut self,
        id: &DownloadId,
        target: DownloadState,
        transport: &dyn Transport,
        out: &mut Outbox,
    ) -> bool {
        let Some(state) = self.records.get(id).map(DownloadRecord::state) else {
            return false;
        };
        match state {
            DownloadState::Waiting => {
                self.remove_waiting(id);
                if let Some(record) = self.records.get_mut(id) {
                    record.set_state(target);
                    out.state(record);
                }
                tracing::info!(id = %id, to = %target, "interrupted before start");
                true
            }
            DownloadState::Active => {
                if let Some(record) = self.records.get_mut(id) {
                    if let Some(handle) = record.end_run() {
                        self.transfers.remove(&handle.id);
                        self.retired.insert(handle.id);
                        let token = transport.request_cancel(&handle, true);
                        tracing::info!(
                            id = %id,
                            transfer = %handle.id,
                            to = %target,
                            resumable = token.is_some(),
                            "interrupted active transfer"
                        );
                        record.set_continuation(token);
                    }
                    record.set_state(target);
                    out.state(record);
                }
                self.slots.release();
                self.admit(transport, out);
                true
            }
            DownloadState::Paused | DownloadState::Stopped | DownloadState::Completed => false,
        }
    }

    /// Forgets a record. An active transfer is cancelled without asking for a token.
    pub(super) fn remove(
        &mut self,
        id: &DownloadId,
        transport: &dyn Transport,
        out: &mut Outbox,
    ) -> Option<DownloadRecord> {
        let mut record = self.records.remove(id)?;
        match record.state() {
            DownloadState::Waiting => self.remove_waiting(id),
            DownloadState::Active => {
                if let Some(handle) = record.end_run() {
                    self.transfers.remove(&handle.id);
                    self.retired.insert(handle.id);
                    let _ = transport.request_cancel(&handle, false);
                }
                self.slots.release();
                self.admit(transport, out);
            }
            _ => {}
        }
        tracing::info!(id = %id, state = %record.state(), "removed");
        Some(record)
    }

    /// True when a slot is free and the waiting queue holds only records
    /// whose last start attempt failed.
    pub(super) fn has_deferred_starts(&self) -> bool {
        self.slots.available() > 0
            && self
                .waiting
                .iter()
                .any(|id| self.records.get(id).is_some_and(DownloadRecord::start_failed))
    }

    /// Promotes waiting records while slots are free.
    ///
    /// A record whose transport refuses to start stays `Waiting` with a
    /// start error; it goes back to the tail after this pass so one bad
    /// record cannot spin the loop. A permanent refusal stops the record.
    pub(super) fn admit(&mut self, transport: &dyn Transport, out: &mut Outbox) {
        let mut deferred = Vec::new();

        while self.slots.available() > 0 {
            let Some(id) = self.waiting.pop_front() else {
                break;
            };
            let state = self.records.get(&id).map(DownloadRecord::state);
            if state != Some(DownloadState::Waiting) {
                self.record_inconsistency(
                    "admission",
                    format!("waiting queue held {} in state {:?}", id, state),
                );
                continue;
            }
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };

            let mut token = record.take_continuation();
            let started = match &token {
                Some(t) => transport.start_from_token(record.remote_location(), t),
                None => {
                    record.reset_progress();
                    transport.start_fresh(record.remote_location())
                }
            };
            let started = match started {
                Err(TransportError::InvalidToken(reason)) => {
                    tracing::warn!(id = %id, "continuation token rejected ({}), starting fresh", reason);
                    record.reset_progress();
                    token = None;
                    transport.start_fresh(record.remote_location())
                }
                other => other,
            };

            match started {
                Ok(handle) => {
                    tracing::info!(
                        id = %id,
                        transfer = %handle.id,
                        resumed = token.is_some(),
                        "admitted"
                    );
                    self.transfers.insert(handle.id, id.clone());
                    record.begin_run(handle);
                    self.slots.acquire();
                    out.state(record);
                }
                Err(e) => {
                    record.set_continuation(token);
                    let err = DownloadError::TransportStart {
                        message: e.to_string(),
                    };
                    record.set_last_error(Some(err.clone()));
                    if e.is_permanent() {
                        tracing::warn!(id = %id, "transport refused address, stopping: {}", e);
                        record.set_state(DownloadState::Stopped);
                        out.state(record);
                        out.completed(record);
                    } else {
                        tracing::warn!(id = %id, "transport start failed: {}", e);
                        out.error(record, err);
                        deferred.push(id);
                    }
                }
            }
        }

        self.waiting.extend(deferred);
    }

    /// Matches a transport reference against the active set: transfer id
    /// first; references without one fall back to the current address and
    /// then the originally requested address.
    pub(super) fn resolve(&self, transfer: &TransferRef) -> Resolved {
        if let Some(tid) = transfer.transfer {
            if let Some(id) = self.transfers.get(&tid) {
                return Resolved::Active(id.clone());
            }
            if self.retired.contains(&tid) {
                return Resolved::Retired(tid);
            }
            return Resolved::Unknown;
        }

        let candidates = [
            transfer.current_address.as_deref(),
            transfer.original_address.as_deref(),
        ];
        for address in candidates.into_iter().flatten() {
            let hit = self.records.values().find(|r| {
                r.state() == DownloadState::Active
                    && (r.current_location() == Some(address) || r.remote_location() == address)
            });
            if let Some(r) = hit {
                return Resolved::Active(r.id().clone());
            }
        }
        Resolved::Unknown
    }

    /// Ids in `state`, sorted (waiting ids in admission order).
    pub(super) fn ids_in(&self, state: DownloadState) -> Vec<DownloadId> {
        if state == DownloadState::Waiting {
            return self.waiting.iter().cloned().collect();
        }
        let mut ids: Vec<_> = self
            .records
            .values()
            .filter(|r| r.state() == state)
            .map(|r| r.id().clone())
            .collect();
        ids.sort();
        ids
    }
}
