//! Event sink: how the scheduler reports state changes, progress and
//! completion to whoever owns a download.
//!
//! Notifications are produced inside the scheduler's critical section and
//! delivered, in order, right after it is released on the same thread.
//! Implementations may call back into the scheduler but must not block.

use tokio::sync::mpsc;

use crate::error::DownloadError;
use crate::record::{DownloadId, DownloadState, RecordSnapshot};

/// Observer of one or more download records.
pub trait EventSink: Send + Sync {
    fn on_state_changed(&self, record: &RecordSnapshot, state: DownloadState);

    /// `bytes_written` is the size of the latest chunk; `progress` is in [0, 1].
    fn on_progress(&self, record: &RecordSnapshot, bytes_written: u64, progress: f64);

    /// The transfer ended. `error` is the failure, or a placement error for a
    /// transfer whose bytes arrived but could not be moved into place.
    fn on_completed(&self, record: &RecordSnapshot, error: Option<&DownloadError>);

    /// An error that does not end the transfer (start failure, placement failure).
    fn on_error(&self, _record: &RecordSnapshot, _error: &DownloadError) {}
}

/// A notification, as forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    StateChanged {
        id: DownloadId,
        state: DownloadState,
    },
    Progress {
        id: DownloadId,
        bytes_written: u64,
        bytes_received: u64,
        bytes_expected: Option<u64>,
        progress: f64,
        bytes_per_sec: f64,
    },
    Completed {
        id: DownloadId,
        state: DownloadState,
        error: Option<DownloadError>,
    },
    Error {
        id: DownloadId,
        error: DownloadError,
    },
}

impl DownloadEvent {
    pub fn id(&self) -> &DownloadId {
        match self {
            DownloadEvent::StateChanged { id, .. }
            | DownloadEvent::Progress { id, .. }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Error { id, .. } => id,
        }
    }
}

/// Sink that forwards every notification over a tokio channel.
///
/// Sends never block; if the receiver is gone the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: DownloadEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("download event receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_state_changed(&self, record: &RecordSnapshot, state: DownloadState) {
        self.send(DownloadEvent::StateChanged {
            id: record.id.clone(),
            state,
        });
    }

    fn on_progress(&self, record: &RecordSnapshot, bytes_written: u64, progress: f64) {
        self.send(DownloadEvent::Progress {
            id: record.id.clone(),
            bytes_written,
            bytes_received: record.progress.bytes_received,
            bytes_expected: record.progress.bytes_expected,
            progress,
            bytes_per_sec: record.progress.bytes_per_sec(),
        });
    }

    fn on_completed(&self, record: &RecordSnapshot, error: Option<&DownloadError>) {
        self.send(DownloadEvent::Completed {
            id: record.id.clone(),
            state: record.state,
            error: error.cloned(),
        });
    }

    fn on_error(&self, record: &RecordSnapshot, error: &DownloadError) {
        self.send(DownloadEvent::Error {
            id: record.id.clone(),
            error: error.clone(),
        });
    }
}
