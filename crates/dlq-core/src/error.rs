//! Error taxonomy for downloads, transports and artifact placement.

use std::path::PathBuf;

use thiserror::Error;

/// Error recorded on a download record and reported to its event sink.
///
/// Stored by value on records and snapshots, so every variant carries owned,
/// cloneable data rather than the underlying error object.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadError {
    /// The transport refused to start the transfer. The record is back in the
    /// waiting queue with nothing lost, or `Stopped` if the refusal was permanent.
    #[error("transport failed to start transfer: {message}")]
    TransportStart { message: String },
    /// The transfer failed but the transport supplied a continuation token;
    /// resubmitting resumes from where it stopped.
    #[error("transfer interrupted (resumable): {message}")]
    TransientTransfer { message: String },
    /// The transfer failed without a continuation token; resubmitting starts
    /// from zero.
    #[error("transfer failed: {message}")]
    TerminalTransfer { message: String },
    /// Bytes were fetched, but moving the artifact into place failed.
    #[error("could not place artifact at {}: {message}", path.display())]
    ArtifactPlacement { path: PathBuf, message: String },
}

impl DownloadError {
    /// True if the record still holds everything needed to resume.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            DownloadError::TransportStart { .. } | DownloadError::TransientTransfer { .. }
        )
    }
}

/// Synchronous failure reported by a transport when starting a transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("curl: {0}")]
    Curl(#[from] curl::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The continuation token could not be decoded or no longer applies.
    #[error("invalid continuation token: {0}")]
    InvalidToken(String),
    /// The transport declined the request for now (e.g. shutting down).
    #[error("transfer rejected: {0}")]
    Rejected(String),
    /// The address can never be fetched by this transport.
    #[error("unusable address: {0}")]
    InvalidAddress(String),
}

impl TransportError {
    /// Retrying the same start can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::InvalidAddress(_))
    }
}

/// Failure while moving a finished artifact to its destination.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumable_classification() {
        let start = DownloadError::TransportStart {
            message: "busy".into(),
        };
        let transient = DownloadError::TransientTransfer {
            message: "reset".into(),
        };
        let terminal = DownloadError::TerminalTransfer {
            message: "404".into(),
        };
        assert!(start.is_resumable());
        assert!(transient.is_resumable());
        assert!(!terminal.is_resumable());
    }

    #[test]
    fn placement_error_display_names_path() {
        let err = DownloadError::ArtifactPlacement {
            path: PathBuf::from("/tmp/out.iso"),
            message: "permission denied".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/tmp/out.iso"));
        assert!(text.contains("permission denied"));
    }

    #[test]
    fn download_error_serializes_with_kind_tag() {
        let err = DownloadError::TerminalTransfer {
            message: "gone".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"kind":"terminal_transfer","message":"gone"}"#);
    }
}
