//! Transport boundary: the byte-transfer mechanism the scheduler drives.
//!
//! A transport starts transfers (fresh or from a continuation token), cancels
//! them on request, and reports everything else asynchronously as
//! [`TransportEvent`]s. Start and cancel must never block on the network.

pub mod curl;

use std::fmt;
use std::path::PathBuf;

use crate::error::TransportError;

pub use self::curl::CurlTransport;

/// Opaque resume data produced by a transport when a transfer is interrupted.
///
/// The scheduler stores and hands it back verbatim; only the transport that
/// produced it knows how to interpret the bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContinuationToken({} bytes)", self.0.len())
    }
}

/// Transport-assigned identifier of one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle for a running transfer, owned by the scheduler while the record is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    pub id: TransferId,
    /// Address the transfer was started with.
    pub address: String,
}

/// How a transport event names the transfer it is about.
///
/// Transports fill in whatever they still know. The scheduler resolves the
/// reference against its active set: transfer id first, then the current
/// (post-redirect) address, then the originally requested address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRef {
    pub transfer: Option<TransferId>,
    pub original_address: Option<String>,
    pub current_address: Option<String>,
}

impl TransferRef {
    pub fn for_handle(handle: &TransferHandle) -> Self {
        Self {
            transfer: Some(handle.id),
            original_address: Some(handle.address.clone()),
            current_address: None,
        }
    }

    pub fn with_current_address(mut self, address: impl Into<String>) -> Self {
        self.current_address = Some(address.into());
        self
    }
}

/// Terminal failure of a transfer. A present `continuation` makes it resumable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub message: String,
    pub continuation: Option<ContinuationToken>,
}

/// Asynchronous report from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Incremental bytes. `total_bytes_written` counts from the start of the
    /// artifact, including bytes from earlier runs when resumed.
    Progress {
        transfer: TransferRef,
        bytes_written: u64,
        total_bytes_written: u64,
        bytes_expected: Option<u64>,
    },
    /// A resumed transfer picked up at `offset`.
    Resumed {
        transfer: TransferRef,
        offset: u64,
        bytes_expected: Option<u64>,
    },
    /// The full artifact sits at `temp_location`; precedes a successful `Completed`.
    ArtifactReady {
        transfer: TransferRef,
        temp_location: PathBuf,
    },
    Completed {
        transfer: TransferRef,
        outcome: Result<(), TransferFailure>,
    },
    /// Every transfer that was in flight before a cold restart has reported.
    AllEventsDelivered,
}

impl TransportEvent {
    pub fn transfer(&self) -> Option<&TransferRef> {
        match self {
            TransportEvent::Progress { transfer, .. }
            | TransportEvent::Resumed { transfer, .. }
            | TransportEvent::ArtifactReady { transfer, .. }
            | TransportEvent::Completed { transfer, .. } => Some(transfer),
            TransportEvent::AllEventsDelivered => None,
        }
    }
}

/// The byte-transfer mechanism consumed by the scheduler.
///
/// Implementations report outcomes through [`TransportEvent`]s delivered to
/// the scheduler (usually via [`crate::scheduler::Scheduler::run_events`]).
/// Every method is called with the scheduler's lock held and must return
/// without waiting on I/O.
pub trait Transport: Send + Sync {
    /// Start downloading `address` from byte zero.
    fn start_fresh(&self, address: &str) -> Result<TransferHandle, TransportError>;

    /// Continue an interrupted transfer of `address` from `token`.
    fn start_from_token(
        &self,
        address: &str,
        token: &ContinuationToken,
    ) -> Result<TransferHandle, TransportError>;

    /// Stop a running transfer. When `want_token` is true the transport keeps
    /// partial data and returns a token if it can; otherwise it may discard it.
    fn request_cancel(&self, handle: &TransferHandle, want_token: bool)
        -> Option<ContinuationToken>;
}
