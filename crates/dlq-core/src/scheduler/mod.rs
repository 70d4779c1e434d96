//! Download queue scheduler.
//!
//! Owns every download record, runs at most `concurrency_limit` transfers at
//! once, moves records between the waiting / active / paused / stopped /
//! completed queues, and reconciles transport reports with that state.
//!
//! All state sits behind one mutex held for the duration of each operation
//! and each transport event, so API calls and transport callbacks serialize.
//! Artifact placement is the exception: the destination is resolved under the
//! lock, the file is moved without it, and the outcome is applied after.
//! Transport calls made under the lock are non-blocking by contract. Sink
//! notifications are collected under the lock and delivered after it is
//! released, in order, on the calling thread.
//!
//! Cancellation is acknowledged synchronously: `Transport::request_cancel`
//! returns the continuation token directly, so `pause`/`cancel` move the
//! record to its target state before returning. The transport's later report
//! for that transfer is recognised as retired and dropped.

mod lifecycle;
mod notify;
mod queue;
mod reconcile;
mod slots;


use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::DlqConfig;
use crate::placement;
use crate::record::{DownloadId, DownloadRecord, DownloadState, RecordSnapshot};
use crate::sink::EventSink;
use crate::transport::{Transport, TransportEvent};

use self::lifecycle::BackgroundCompletion;
use self::notify::Outbox;
use self::queue::QueueState;
use self::reconcile::Followup;

pub use self::queue::Inconsistency;

/// How often `run_events` retries records whose transport start failed.
pub const START_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Concurrency-bounded, resumable download queue.
pub struct Scheduler {
    state: Mutex<QueueState>,
    transport: Arc<dyn Transport>,
    default_sink: Option<Arc<dyn EventSink>>,
    background: BackgroundCompletion,
}

impl Scheduler {
    /// Scheduler running at most `concurrency_limit` transfers (clamped to at least 1).
    pub fn new(transport: Arc<dyn Transport>, concurrency_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::new(concurrency_limit)),
            transport,
            default_sink: None,
            background: BackgroundCompletion::default(),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, cfg: &DlqConfig) -> Self {
        Self::new(transport, cfg.concurrency_limit)
    }

    /// Sink for records submitted without their own.
    pub fn with_default_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.default_sink = Some(sink);
        self
    }

    // Sinks run outside the lock; a poisoned lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut QueueState, &dyn Transport, &mut Outbox) -> R) -> R {
        let mut out = Outbox::new(self.default_sink.clone());
        let result = {
            let mut state = self.lock();
            f(&mut state, self.transport.as_ref(), &mut out)
        };
        out.deliver();
        result
    }

    /// Queues `record` at the tail of the waiting queue and runs admission.
    ///
    /// Already waiting or active: no-op, except that a record waiting after
    /// a failed start gets another admission pass. Paused, stopped or
    /// completed: re-admitted (a completed record starts over). Never fails.
    pub fn submit(&self, record: DownloadRecord) {
        self.with_state(|state, transport, out| state.submit(record, transport, out));
    }

    /// Resubmits a tracked record by id. Returns false if the id is unknown.
    pub fn resume(&self, id: &DownloadId) -> bool {
        self.with_state(|state, transport, out| {
            let Some(record) = state.records.get(id) else {
                return false;
            };
            let again = DownloadRecord::new(id.clone(), record.remote_location());
            state.submit(again, transport, out);
            true
        })
    }

    /// Holds a waiting or active record in `Paused`, keeping any
    /// continuation token the transport hands back. Returns whether the
    /// record changed state.
    pub fn pause(&self, id: &DownloadId) -> bool {
        self.with_state(|state, transport, out| {
            state.interrupt(id, DownloadState::Paused, transport, out)
        })
    }

    /// Like [`pause`](Self::pause) but the record ends up `Stopped`.
    pub fn cancel(&self, id: &DownloadId) -> bool {
        self.with_state(|state, transport, out| {
            state.interrupt(id, DownloadState::Stopped, transport, out)
        })
    }

    /// Forgets a record in any state, cancelling its transfer without keeping
    /// resume data. Returns its final snapshot.
    pub fn remove(&self, id: &DownloadId) -> Option<RecordSnapshot> {
        self.with_state(|state, transport, out| {
            state
                .remove(id, transport, out)
                .map(|record| record.snapshot())
        })
    }

    /// Changes the concurrency limit (0 is treated as 1). Lowering it never
    /// demotes active records; raising it admits waiting ones.
    pub fn set_concurrency_limit(&self, limit: usize) {
        self.with_state(|state, transport, out| {
            state.slots.set_limit(limit);
            tracing::info!(limit = state.slots.limit(), "concurrency limit changed");
            state.admit(transport, out);
        });
    }

    pub fn concurrency_limit(&self) -> usize {
        self.lock().slots.limit()
    }

    pub fn active_count(&self) -> usize {
        self.lock().slots.in_use()
    }

    pub fn snapshot(&self, id: &DownloadId) -> Option<RecordSnapshot> {
        self.lock().records.get(id).map(DownloadRecord::snapshot)
    }

    /// All records, sorted by id.
    pub fn snapshots(&self) -> Vec<RecordSnapshot> {
        let mut all: Vec<_> = self
            .lock()
            .records
            .values()
            .map(DownloadRecord::snapshot)
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// The queue a record is in (its state), or None if unknown.
    pub fn queue_of(&self, id: &DownloadId) -> Option<DownloadState> {
        self.lock().records.get(id).map(DownloadRecord::state)
    }

    /// Ids in one queue. Waiting ids come in admission order, others sorted.
    pub fn ids_in(&self, state: DownloadState) -> Vec<DownloadId> {
        self.lock().ids_in(state)
    }

    /// True while any record is waiting, active or paused.
    pub fn has_pending(&self) -> bool {
        self.lock().records.values().any(|r| {
            matches!(
                r.state(),
                DownloadState::Waiting | DownloadState::Active | DownloadState::Paused
            )
        })
    }

    /// Runs admission again for waiting records whose transport start
    /// failed. Returns whether there were any to retry.
    pub fn retry_start_failures(&self) -> bool {
        self.with_state(|state, transport, out| {
            if !state.has_deferred_starts() {
                return false;
            }
            tracing::debug!("retrying failed transport starts");
            state.admit(transport, out);
            true
        })
    }

    /// Applies one transport report.
    ///
    /// Moving a finished artifact into place can mean a full copy, so it
    /// happens with the lock released; the outcome is applied afterwards.
    pub fn handle_event(&self, event: TransportEvent) {
        let followup =
            self.with_state(|state, transport, out| state.reconcile(event, transport, out));
        match followup {
            Followup::None => {}
            Followup::FinishBackgroundEvents => {
                self.finish_background_events();
            }
            Followup::Place(pending) => {
                let result = placement::place_artifact(&pending.temp_location, &pending.dest);
                self.with_state(|state, _, out| state.settle_placement(pending, result, out));
            }
        }
    }

    /// Applies transport reports until the channel closes, retrying failed
    /// starts every [`START_RETRY_INTERVAL`] in between.
    pub async fn run_events(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let mut retry = tokio::time::interval_at(
            tokio::time::Instant::now() + START_RETRY_INTERVAL,
            START_RETRY_INTERVAL,
        );
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = retry.tick() => {
                    self.retry_start_failures();
                }
            }
        }
        tracing::debug!("transport event channel closed");
    }

    /// Stores the host's completion for "all relaunched transfers reconciled".
    pub fn set_background_completion<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.background.store(Box::new(handler));
    }

    /// Runs the stored host completion once and discards it. Returns whether
    /// one was stored.
    pub fn finish_background_events(&self) -> bool {
        self.background.fire()
    }

    /// Recent transport reports that matched nothing (bounded history).
    pub fn inconsistencies(&self) -> Vec<Inconsistency> {
        self.lock().inconsistencies()
    }

    /// Total number of inconsistencies seen, including ones dropped from history.
    pub fn inconsistency_count(&self) -> u64 {
        self.lock().inconsistency_total()
    }
}
