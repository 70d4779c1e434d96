//! Local file names for downloads, taken from the last URL path segment.

use std::path::{Path, PathBuf};

use url::Url;

/// Name used when the URL yields nothing usable.
pub const FALLBACK_NAME: &str = "download.bin";

const NAME_MAX: usize = 255;

/// Filename for `address`: last non-empty path segment, made safe for Linux.
///
/// `https://example.com/pub/debian-12.iso?mirror=3` → `debian-12.iso`,
/// `https://example.com/` → `download.bin`.
pub fn derive_filename(address: &str) -> String {
    let Some(segment) = last_segment(address) else {
        return FALLBACK_NAME.to_string();
    };
    match sanitize(&segment) {
        name if name.is_empty() || name == "." || name == ".." => FALLBACK_NAME.to_string(),
        name => name,
    }
}

/// `<dir>/<derived filename>`.
pub fn destination_in(dir: &Path, address: &str) -> PathBuf {
    dir.join(derive_filename(address))
}

fn last_segment(address: &str) -> Option<String> {
    let parsed = Url::parse(address).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Replaces separators, NUL, control characters and whitespace with a single
/// `_`, strips leading/trailing dots and underscores, and caps the result at
/// NAME_MAX bytes.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = matches!(c, '/' | '\\' | '\0') || c.is_control() || c.is_whitespace();
        if !unsafe_char {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_last_segment() {
        assert_eq!(derive_filename("https://example.com/a/b/file.deb"), "file.deb");
        assert_eq!(
            derive_filename("https://example.com/file.zip?token=abc#frag"),
            "file.zip"
        );
        assert_eq!(derive_filename("https://example.com/dir/"), "dir");
    }

    #[test]
    fn fallback_for_root_and_garbage() {
        assert_eq!(derive_filename("https://example.com/"), FALLBACK_NAME);
        assert_eq!(derive_filename("https://example.com"), FALLBACK_NAME);
        assert_eq!(derive_filename("not a url"), FALLBACK_NAME);
        assert_eq!(derive_filename("https://example.com/.."), FALLBACK_NAME);
    }

    #[test]
    fn sanitize_replaces_unsafe_runs() {
        assert_eq!(sanitize("a\\b\tc.txt"), "a_b_c.txt");
        assert_eq!(sanitize("two  spaces"), "two_spaces");
        assert_eq!(sanitize("..hidden.."), "hidden");
        assert_eq!(sanitize("nul\0byte"), "nul_byte");
    }

    #[test]
    fn sanitize_caps_length_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize(&long);
        assert!(out.len() <= NAME_MAX);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn destination_joins_dir() {
        assert_eq!(
            destination_in(Path::new("/srv/dl"), "http://h/x/y.tar.gz"),
            PathBuf::from("/srv/dl/y.tar.gz")
        );
    }
}
