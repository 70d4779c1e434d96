//! Continuation tokens produced by the curl transport.
//!
//! Serialized as JSON so a token survives being written to disk by a caller
//! and handed back in a later process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::transport::ContinuationToken;

const TOKEN_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct ResumeToken {
    pub version: u32,
    pub url: String,
    pub temp_path: PathBuf,
    /// Bytes of the artifact already on disk in `temp_path`.
    pub offset: u64,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl ResumeToken {
    pub fn new(url: &str, temp_path: &Path, offset: u64, etag: Option<String>, total: Option<u64>) -> Self {
        Self {
            version: TOKEN_VERSION,
            url: url.to_string(),
            temp_path: temp_path.to_path_buf(),
            offset,
            etag,
            total,
        }
    }

    pub fn encode(&self) -> Option<ContinuationToken> {
        match serde_json::to_vec(self) {
            Ok(bytes) => Some(ContinuationToken::new(bytes)),
            Err(e) => {
                tracing::warn!("could not encode resume token: {}", e);
                None
            }
        }
    }

    /// Decodes `token` and checks it still applies to `address` and to the
    /// partial file on disk.
    pub fn decode_for(token: &ContinuationToken, address: &str) -> Result<Self, TransportError> {
        let parsed: ResumeToken = serde_json::from_slice(token.as_bytes())
            .map_err(|e| TransportError::InvalidToken(e.to_string()))?;
        if parsed.version != TOKEN_VERSION {
            return Err(TransportError::InvalidToken(format!(
                "unsupported token version {}",
                parsed.version
            )));
        }
        if parsed.url != address {
            return Err(TransportError::InvalidToken(format!(
                "token is for {}, not {}",
                parsed.url, address
            )));
        }
        let on_disk = std::fs::metadata(&parsed.temp_path)
            .map(|m| m.len())
            .map_err(|e| {
                TransportError::InvalidToken(format!(
                    "partial file {}: {}",
                    parsed.temp_path.display(),
                    e
                ))
            })?;
        if on_disk < parsed.offset {
            return Err(TransportError::InvalidToken(format!(
                "partial file has {} bytes, token expects {}",
                on_disk, parsed.offset
            )));
        }
        Ok(parsed)
    }
}
