//! Transport callbacks: reconcile asynchronous reports with queue state.

use std::path::PathBuf;

use crate::error::{DownloadError, PlacementError};
use crate::placement::Destination;
use crate::record::{DownloadId, DownloadState};
use crate::transport::{TransferFailure, TransferRef, Transport, TransportEvent};

use super::notify::Outbox;
use super::queue::{QueueState, Resolved};

/// What the caller must do after the lock is released.
#[derive(Debug)]
pub(super) enum Followup {
    None,
    /// Run the host's stored lifecycle completion.
    FinishBackgroundEvents,
    /// Move the artifact, then hand the result to `settle_placement`.
    Place(PendingPlacement),
}

/// An artifact move resolved under the lock and performed outside it.
#[derive(Debug)]
pub(super) struct PendingPlacement {
    pub(super) id: DownloadId,
    pub(super) temp_location: PathBuf,
    pub(super) dest: Destination,
}

impl QueueState {
    pub(super) fn reconcile(
        &mut self,
        event: TransportEvent,
        transport: &dyn Transport,
        out: &mut Outbox,
    ) -> Followup {
        match event {
            TransportEvent::Progress {
                transfer,
                bytes_written,
                total_bytes_written,
                bytes_expected,
            } => {
                let Resolved::Active(id) = self.resolve(&transfer) else {
                    tracing::trace!(?transfer, "progress for inactive transfer ignored");
                    return Followup::None;
                };
                if let Some(record) = self.records.get_mut(&id) {
                    record.record_progress(total_bytes_written, bytes_expected);
                    record.set_current_location(transfer.current_address);
                    out.progress(record, bytes_written);
                }
            }
            TransportEvent::Resumed {
                transfer,
                offset,
                bytes_expected,
            } => {
                let Resolved::Active(id) = self.resolve(&transfer) else {
                    tracing::debug!(?transfer, "resume report for inactive transfer ignored");
                    return Followup::None;
                };
                if let Some(record) = self.records.get_mut(&id) {
                    tracing::info!(id = %id, offset, expected = ?bytes_expected, "transfer resumed");
                    record.record_resume_offset(offset, bytes_expected);
                    record.set_current_location(transfer.current_address);
                    out.progress(record, 0);
                }
            }
            TransportEvent::ArtifactReady {
                transfer,
                temp_location,
            } => match self.resolve(&transfer) {
                Resolved::Active(id) => return self.plan_placement(id, temp_location),
                Resolved::Retired(tid) => {
                    tracing::debug!(transfer = %tid, path = %temp_location.display(), "artifact of retired transfer left in place");
                }
                Resolved::Unknown => self.record_inconsistency(
                    "artifact_ready",
                    format!("no active record for {}", describe(&transfer)),
                ),
            },
            TransportEvent::Completed { transfer, outcome } => match self.resolve(&transfer) {
                Resolved::Active(id) => {
                    self.complete(&id, outcome, out);
                    self.admit(transport, out);
                }
                Resolved::Retired(tid) => {
                    self.retired.remove(&tid);
                    tracing::debug!(transfer = %tid, "retired transfer finished");
                }
                Resolved::Unknown => self.record_inconsistency(
                    "completion",
                    format!("no active record for {}", describe(&transfer)),
                ),
            },
            TransportEvent::AllEventsDelivered => {
                tracing::info!("transport delivered all pending events");
                return Followup::FinishBackgroundEvents;
            }
        }
        Followup::None
    }

    /// Resolves where the artifact goes. Records without a destination
    /// leave it at the temp location.
    fn plan_placement(&self, id: DownloadId, temp_location: PathBuf) -> Followup {
        let Some(record) = self.records.get(&id) else {
            return Followup::None;
        };
        let Some(dest) = record
            .destination()
            .and_then(|policy| policy.resolve(&temp_location, record.remote_location()))
        else {
            tracing::debug!(id = %id, path = %temp_location.display(), "no destination; artifact left at temp location");
            return Followup::None;
        };
        Followup::Place(PendingPlacement {
            id,
            temp_location,
            dest,
        })
    }

    /// Records the outcome of a move. Failure sets the error but leaves the
    /// state alone; the completion that follows reports it again.
    pub(super) fn settle_placement(
        &mut self,
        pending: PendingPlacement,
        result: Result<(), PlacementError>,
        out: &mut Outbox,
    ) {
        let PendingPlacement { id, dest, .. } = pending;
        let Some(record) = self.records.get_mut(&id) else {
            tracing::debug!(id = %id, path = %dest.path.display(), "record removed while its artifact was placed");
            return;
        };
        match result {
            Ok(()) => {
                tracing::info!(id = %id, path = %dest.path.display(), "artifact placed");
                record.set_placed_at(dest.path);
            }
            Err(e) => {
                tracing::warn!(id = %id, path = %dest.path.display(), "artifact placement failed: {}", e);
                let err = DownloadError::ArtifactPlacement {
                    path: dest.path,
                    message: e.to_string(),
                };
                record.set_last_error(Some(err.clone()));
                out.error(record, err);
            }
        }
    }

    /// Terminal outcome of an active transfer: frees its slot and settles the state.
    fn complete(&mut self, id: &DownloadId, outcome: Result<(), TransferFailure>, out: &mut Outbox) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        if let Some(handle) = record.end_run() {
            self.transfers.remove(&handle.id);
        }
        self.slots.release();

        match outcome {
            Ok(()) => {
                record.mark_completed();
                tracing::info!(id = %id, bytes = record.bytes_received(), "completed");
            }
            Err(TransferFailure {
                message,
                continuation,
            }) => {
                let err = if continuation.is_some() {
                    DownloadError::TransientTransfer { message }
                } else {
                    DownloadError::TerminalTransfer { message }
                };
                tracing::warn!(
                    id = %id,
                    resumable = continuation.is_some(),
                    received = record.bytes_received(),
                    "transfer failed: {}",
                    err
                );
                record.set_continuation(continuation);
                record.set_last_error(Some(err));
                record.set_state(DownloadState::Stopped);
            }
        }
        out.state(record);
        out.completed(record);
    }
}

fn describe(transfer: &TransferRef) -> String {
    match (
        transfer.transfer,
        transfer.current_address.as_deref(),
        transfer.original_address.as_deref(),
    ) {
        (Some(tid), _, _) => format!("transfer {}", tid),
        (None, Some(current), _) => format!("address {}", current),
        (None, None, Some(original)) => format!("address {}", original),
        (None, None, None) => "an anonymous transfer".to_string(),
    }
}
