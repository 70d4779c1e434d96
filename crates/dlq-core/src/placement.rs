//! Artifact placement: move a finished temp file to its destination.
//!
//! Placement is an atomic rename that replaces whatever is at the destination.
//! When the temp file lives on another filesystem the artifact is first copied
//! next to the destination (`.part` suffix) and then renamed into place, so a
//! reader never sees a half-written file at the final path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PlacementError;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for a temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// How to treat the destination when placing an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementOptions {
    /// Replace an existing file at the destination. When false, an existing
    /// file makes placement fail.
    pub overwrite: bool,
    /// Create missing parent directories of the destination.
    pub create_dirs: bool,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            create_dirs: true,
        }
    }
}

/// Final location of an artifact plus how to put it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub path: PathBuf,
    pub options: PlacementOptions,
}

impl Destination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: PlacementOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlacementOptions) -> Self {
        self.options = options;
        self
    }
}

/// Moves `temp_location` to `dest.path`, replacing any existing artifact.
pub fn place_artifact(temp_location: &Path, dest: &Destination) -> Result<(), PlacementError> {
    let target = dest.path.as_path();

    if dest.options.create_dirs {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PlacementError::Io {
                action: "create directory",
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    if !dest.options.overwrite && target.exists() {
        return Err(PlacementError::DestinationExists(target.to_path_buf()));
    }

    match fs::rename(temp_location, target) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => copy_then_rename(temp_location, target),
        Err(source) => Err(PlacementError::Io {
            action: "rename into",
            path: target.to_path_buf(),
            source,
        }),
    }
}

fn copy_then_rename(temp_location: &Path, target: &Path) -> Result<(), PlacementError> {
    let staging = temp_path(target);
    tracing::debug!(
        from = %temp_location.display(),
        to = %target.display(),
        "cross-device placement, copying"
    );
    fs::copy(temp_location, &staging).map_err(|source| PlacementError::Io {
        action: "copy to",
        path: staging.clone(),
        source,
    })?;
    if let Err(source) = fs::rename(&staging, target) {
        let _ = fs::remove_file(&staging);
        return Err(PlacementError::Io {
            action: "rename into",
            path: target.to_path_buf(),
            source,
        });
    }
    if let Err(e) = fs::remove_file(temp_location) {
        tracing::warn!(path = %temp_location.display(), "could not remove temp artifact: {}", e);
    }
    Ok(())
}

fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV on Linux and the BSDs.
    e.raw_os_error() == Some(18)
}
