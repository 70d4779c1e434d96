//! Download records: identity, target, and mutable progress/state of one download.
//!
//! Callers create a [`DownloadRecord`] and hand it to the scheduler; from then
//! on only the scheduler mutates it. Everything a caller observes afterwards
//! is a [`RecordSnapshot`].

mod progress;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::DownloadError;
use crate::placement::Destination;
use crate::sink::EventSink;
use crate::transport::{ContinuationToken, TransferHandle};

pub use progress::{ratio, ProgressStats};
pub(crate) use progress::RunClock;

/// Caller-assigned identifier; unique while the record is known to a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DownloadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a download record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Created, cancelled, or failed. Not scheduled until resubmitted.
    Stopped,
    /// Queued for admission.
    Waiting,
    /// Transfer in flight; holds a concurrency slot.
    Active,
    /// Deliberately held by the caller.
    Paused,
    Completed,
}

impl DownloadState {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadState::Stopped => "stopped",
            DownloadState::Waiting => "waiting",
            DownloadState::Active => "active",
            DownloadState::Paused => "paused",
            DownloadState::Completed => "completed",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a destination when the artifact is ready.
/// Arguments are the temporary artifact location and the remote address.
pub type DestinationResolver = Arc<dyn Fn(&Path, &str) -> Option<Destination> + Send + Sync>;

/// Where a finished artifact should end up.
#[derive(Clone)]
pub enum DestinationPolicy {
    Fixed(Destination),
    /// Decided at artifact-ready time; `None` leaves the artifact where it is.
    Resolve(DestinationResolver),
}

impl DestinationPolicy {
    pub fn resolve(&self, temp_location: &Path, remote_location: &str) -> Option<Destination> {
        match self {
            DestinationPolicy::Fixed(dest) => Some(dest.clone()),
            DestinationPolicy::Resolve(f) => f(temp_location, remote_location),
        }
    }
}

impl fmt::Debug for DestinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationPolicy::Fixed(dest) => f.debug_tuple("Fixed").field(dest).finish(),
            DestinationPolicy::Resolve(_) => f.write_str("Resolve(..)"),
        }
    }
}

/// One download known to (or about to be submitted to) a scheduler.
///
/// Equality and hashing use the identifier only: two records with the same
/// identifier are the same logical download.
#[derive(Clone)]
pub struct DownloadRecord {
    id: DownloadId,
    remote_location: String,
    destination: Option<DestinationPolicy>,
    sink: Option<Arc<dyn EventSink>>,
    state: DownloadState,
    bytes_received: u64,
    bytes_expected: Option<u64>,
    continuation: Option<ContinuationToken>,
    last_error: Option<DownloadError>,
    handle: Option<TransferHandle>,
    current_location: Option<String>,
    placed_at: Option<PathBuf>,
    clock: Option<RunClock>,
}

impl DownloadRecord {
    /// A new record in the `Stopped` state.
    pub fn new(id: impl Into<DownloadId>, remote_location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote_location: remote_location.into(),
            destination: None,
            sink: None,
            state: DownloadState::Stopped,
            bytes_received: 0,
            bytes_expected: None,
            continuation: None,
            last_error: None,
            handle: None,
            current_location: None,
            placed_at: None,
            clock: None,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(DestinationPolicy::Fixed(destination));
        self
    }

    pub fn with_destination_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Path, &str) -> Option<Destination> + Send + Sync + 'static,
    {
        self.destination = Some(DestinationPolicy::Resolve(Arc::new(resolver)));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Seeds the record with a token from an earlier process, so the first
    /// admission resumes instead of starting fresh.
    pub fn with_continuation(mut self, token: ContinuationToken) -> Self {
        self.continuation = Some(token);
        self
    }

    pub fn id(&self) -> &DownloadId {
        &self.id
    }

    pub fn remote_location(&self) -> &str {
        &self.remote_location
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_expected(&self) -> Option<u64> {
        self.bytes_expected
    }

    /// Fraction complete; a completed record is whole even if its size was never reported.
    pub fn progress(&self) -> f64 {
        if self.state == DownloadState::Completed {
            return 1.0;
        }
        ratio(self.bytes_received, self.bytes_expected)
    }

    pub fn last_error(&self) -> Option<&DownloadError> {
        self.last_error.as_ref()
    }

    /// Waiting after the transport refused to start it.
    pub fn start_failed(&self) -> bool {
        self.state == DownloadState::Waiting
            && matches!(self.last_error, Some(DownloadError::TransportStart { .. }))
    }

    pub fn continuation(&self) -> Option<&ContinuationToken> {
        self.continuation.as_ref()
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        let progress = match &self.clock {
            Some(clock) => clock.stats(self.bytes_received, self.bytes_expected),
            None => ProgressStats {
                bytes_received: self.bytes_received,
                bytes_expected: self.bytes_expected,
                ..Default::default()
            },
        };
        RecordSnapshot {
            id: self.id.clone(),
            remote_location: self.remote_location.clone(),
            current_location: self.current_location.clone(),
            state: self.state,
            progress,
            continuation: self.continuation.clone(),
            last_error: self.last_error.clone(),
            placed_at: self.placed_at.clone(),
        }
    }

    pub(crate) fn sink(&self) -> Option<&Arc<dyn EventSink>> {
        self.sink.as_ref()
    }

    pub(crate) fn destination(&self) -> Option<&DestinationPolicy> {
        self.destination.as_ref()
    }

    pub(crate) fn handle(&self) -> Option<&TransferHandle> {
        self.handle.as_ref()
    }

    pub(crate) fn current_location(&self) -> Option<&str> {
        self.current_location.as_deref()
    }

    pub(crate) fn set_state(&mut self, state: DownloadState) {
        self.state = state;
    }

    pub(crate) fn set_last_error(&mut self, error: Option<DownloadError>) {
        self.last_error = error;
    }

    pub(crate) fn set_current_location(&mut self, location: Option<String>) {
        if location.is_some() {
            self.current_location = location;
        }
    }

    pub(crate) fn set_placed_at(&mut self, path: PathBuf) {
        self.placed_at = Some(path);
    }

    pub(crate) fn take_continuation(&mut self) -> Option<ContinuationToken> {
        self.continuation.take()
    }

    pub(crate) fn set_continuation(&mut self, token: Option<ContinuationToken>) {
        self.continuation = token;
    }

    /// Adopts a caller-supplied destination or sink on resubmission.
    pub(crate) fn merge_from(&mut self, other: DownloadRecord) {
        if other.destination.is_some() {
            self.destination = other.destination;
        }
        if other.sink.is_some() {
            self.sink = other.sink;
        }
    }

    /// Marks the record active with a fresh transfer handle.
    pub(crate) fn begin_run(&mut self, handle: TransferHandle) {
        self.handle = Some(handle);
        self.state = DownloadState::Active;
        self.last_error = None;
        self.clock = Some(RunClock::start(self.bytes_received));
    }

    /// Drops the transfer handle and run clock, returning the handle.
    pub(crate) fn end_run(&mut self) -> Option<TransferHandle> {
        self.clock = None;
        self.handle.take()
    }

    pub(crate) fn record_progress(&mut self, total_bytes_written: u64, bytes_expected: Option<u64>) {
        self.bytes_received = total_bytes_written;
        if bytes_expected.is_some() {
            self.bytes_expected = bytes_expected;
        }
    }

    pub(crate) fn record_resume_offset(&mut self, offset: u64, bytes_expected: Option<u64>) {
        self.record_progress(offset, bytes_expected);
        if let Some(clock) = self.clock.as_mut() {
            clock.rebase(offset);
        }
    }

    /// Successful completion: no token, received equals expected when known.
    pub(crate) fn mark_completed(&mut self) {
        self.state = DownloadState::Completed;
        self.continuation = None;
        if let Some(expected) = self.bytes_expected {
            self.bytes_received = expected;
        }
        if !matches!(self.last_error, Some(DownloadError::ArtifactPlacement { .. })) {
            self.last_error = None;
        }
    }

    /// Forget all progress so the next admission starts from zero.
    pub(crate) fn reset_progress(&mut self) {
        self.bytes_received = 0;
        self.bytes_expected = None;
        self.continuation = None;
        self.current_location = None;
        self.placed_at = None;
    }
}

impl PartialEq for DownloadRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DownloadRecord {}

impl Hash for DownloadRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DownloadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRecord")
            .field("id", &self.id)
            .field("remote_location", &self.remote_location)
            .field("state", &self.state)
            .field("bytes_received", &self.bytes_received)
            .field("bytes_expected", &self.bytes_expected)
            .field("continuation", &self.continuation)
            .field("last_error", &self.last_error)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Immutable view of a record at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub id: DownloadId,
    pub remote_location: String,
    /// Post-redirect address, when the transport reported one.
    pub current_location: Option<String>,
    pub state: DownloadState,
    pub progress: ProgressStats,
    pub continuation: Option<ContinuationToken>,
    pub last_error: Option<DownloadError>,
    /// Where the artifact was moved to, once placed.
    pub placed_at: Option<PathBuf>,
}

impl RecordSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.state == DownloadState::Completed {
            return 1.0;
        }
        self.progress.fraction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransferId;
    use std::collections::HashSet;

    #[test]
    fn equality_is_by_identifier() {
        let a = DownloadRecord::new("a", "https://example.com/one");
        let a2 = DownloadRecord::new("a", "https://mirror.example.com/other");
        let b = DownloadRecord::new("b", "https://example.com/one");
        assert_eq!(a, a2);
        assert_ne!(a, b);

        let set: HashSet<_> = [a, a2, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn new_record_is_stopped_without_progress() {
        let r = DownloadRecord::new("x", "https://example.com/x");
        assert_eq!(r.state(), DownloadState::Stopped);
        assert_eq!(r.bytes_received(), 0);
        assert_eq!(r.bytes_expected(), None);
        assert_eq!(r.progress(), 0.0);
        assert!(r.continuation().is_none());
    }

    #[test]
    fn mark_completed_clears_token_and_fills_counter() {
        let mut r = DownloadRecord::new("x", "https://example.com/x")
            .with_continuation(ContinuationToken::new(vec![1, 2, 3]));
        r.begin_run(TransferHandle {
            id: TransferId(1),
            address: "https://example.com/x".into(),
        });
        r.record_progress(90, Some(100));
        r.mark_completed();
        assert_eq!(r.state(), DownloadState::Completed);
        assert!(r.continuation().is_none());
        assert_eq!(r.bytes_received(), 100);
        assert_eq!(r.progress(), 1.0);
        assert_eq!(r.snapshot().fraction(), 1.0);
    }

    #[test]
    fn completed_empty_artifact_reports_full_progress() {
        let mut r = DownloadRecord::new("empty", "https://example.com/empty");
        r.begin_run(TransferHandle {
            id: TransferId(3),
            address: "https://example.com/empty".into(),
        });
        r.record_progress(0, Some(0));
        r.end_run();
        r.mark_completed();
        assert_eq!(r.progress(), 1.0);
        assert_eq!(r.snapshot().fraction(), 1.0);

        let mut unsized_body = DownloadRecord::new("chunked", "https://example.com/chunked");
        unsized_body.mark_completed();
        assert_eq!(unsized_body.progress(), 1.0);
    }

    #[test]
    fn completion_keeps_placement_error_only() {
        let mut r = DownloadRecord::new("x", "https://example.com/x");
        r.set_last_error(Some(DownloadError::ArtifactPlacement {
            path: PathBuf::from("/nope/x"),
            message: "denied".into(),
        }));
        r.mark_completed();
        assert!(matches!(
            r.last_error(),
            Some(DownloadError::ArtifactPlacement { .. })
        ));

        let mut r = DownloadRecord::new("y", "https://example.com/y");
        r.set_last_error(Some(DownloadError::TerminalTransfer {
            message: "old".into(),
        }));
        r.mark_completed();
        assert!(r.last_error().is_none());
    }

    #[test]
    fn resolver_policy_is_consulted() {
        let policy = DestinationPolicy::Resolve(Arc::new(|_tmp: &Path, remote: &str| {
            remote
                .ends_with(".iso")
                .then(|| Destination::new("/srv/isos/latest.iso"))
        }));
        assert!(policy
            .resolve(Path::new("/tmp/a"), "https://example.com/a.iso")
            .is_some());
        assert!(policy
            .resolve(Path::new("/tmp/a"), "https://example.com/a.txt")
            .is_none());
    }
}
