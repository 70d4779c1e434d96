//! Concurrency-bounded, resumable download queue.
//!
//! [`scheduler::Scheduler`] owns download records and drives a
//! [`transport::Transport`]; [`transport::CurlTransport`] is the built-in
//! libcurl implementation. Finished artifacts are moved into place by
//! [`placement`], and state changes reach callers through [`sink::EventSink`].

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod naming;
pub mod placement;
pub mod record;
pub mod scheduler;
pub mod sink;
pub mod transport;

pub use error::{DownloadError, PlacementError, TransportError};
pub use record::{DownloadId, DownloadRecord, DownloadState, RecordSnapshot};
pub use scheduler::Scheduler;
