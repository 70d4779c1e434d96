//! Outbox of sink notifications collected under the lock and delivered after it.

use std::sync::Arc;

use crate::error::DownloadError;
use crate::record::{DownloadRecord, DownloadState, RecordSnapshot};
use crate::sink::EventSink;

enum Notice {
    State(DownloadState),
    Progress { bytes_written: u64, progress: f64 },
    Completed(Option<DownloadError>),
    Error(DownloadError),
}

pub(super) struct Outbox {
    default_sink: Option<Arc<dyn EventSink>>,
    items: Vec<(Arc<dyn EventSink>, RecordSnapshot, Notice)>,
}

impl Outbox {
    pub(super) fn new(default_sink: Option<Arc<dyn EventSink>>) -> Self {
        Self {
            default_sink,
            items: Vec::new(),
        }
    }

    fn push(&mut self, record: &DownloadRecord, notice: Notice) {
        let sink = record.sink().or(self.default_sink.as_ref());
        if let Some(sink) = sink {
            self.items.push((Arc::clone(sink), record.snapshot(), notice));
        }
    }

    pub(super) fn state(&mut self, record: &DownloadRecord) {
        self.push(record, Notice::State(record.state()));
    }

    pub(super) fn progress(&mut self, record: &DownloadRecord, bytes_written: u64) {
        let progress = record.progress();
        self.push(
            record,
            Notice::Progress {
                bytes_written,
                progress,
            },
        );
    }

    pub(super) fn completed(&mut self, record: &DownloadRecord) {
        self.push(record, Notice::Completed(record.last_error().cloned()));
    }

    pub(super) fn error(&mut self, record: &DownloadRecord, error: DownloadError) {
        self.push(record, Notice::Error(error));
    }

    /// Delivers everything in the order it was queued. Call with no lock held.
    pub(super) fn deliver(self) {
        for (sink, snapshot, notice) in self.items {
            match notice {
                Notice::State(state) => sink.on_state_changed(&snapshot, state),
                Notice::Progress {
                    bytes_written,
                    progress,
                } => sink.on_progress(&snapshot, bytes_written, progress),
                Notice::Completed(error) => sink.on_completed(&snapshot, error.as_ref()),
                Notice::Error(error) => sink.on_error(&snapshot, &error),
            }
        }
    }
}
