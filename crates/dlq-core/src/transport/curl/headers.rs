//! Response header tracking for one transfer.
//!
//! libcurl hands every header line of every response (including redirect
//! hops) to the header callback; a status line starts a new response.

use url::Url;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct ResponseHeaders {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
    /// Total size from `Content-Range: bytes a-b/total`.
    pub range_total: Option<u64>,
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub location: Option<String>,
}

impl ResponseHeaders {
    /// Feeds one raw header line. Returns true when it started a new response.
    pub fn feed(&mut self, line: &[u8]) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            return false;
        };
        let line = line.trim();
        if line.starts_with("HTTP/") {
            *self = ResponseHeaders {
                status: line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|code| code.parse().ok()),
                ..Default::default()
            };
            return true;
        }
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => self.content_length = value.parse().ok(),
            "content-range" => {
                self.range_total = value
                    .rsplit_once('/')
                    .and_then(|(_, total)| total.trim().parse().ok());
            }
            "accept-ranges" => self.accept_ranges = value.eq_ignore_ascii_case("bytes"),
            "etag" => self.etag = Some(value.to_string()),
            "location" => self.location = Some(value.to_string()),
            _ => {}
        }
        false
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, Some(301 | 302 | 303 | 307 | 308))
    }

    /// Full artifact size given that the body starts at `body_offset`.
    pub fn expected_total(&self, body_offset: u64) -> Option<u64> {
        self.range_total
            .or_else(|| self.content_length.map(|len| len + body_offset))
    }
}

/// Resolves a `Location` header against the address that returned it.
pub(super) fn follow_location(base: &str, location: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(location).ok().map(String::from)
}
