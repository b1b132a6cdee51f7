//! Project root discovery and initialization
//!
//! A pgspa project is marked by a `.pgspa` directory at its root. Every
//! command that works with references first locates the root by walking from
//! the current directory upward.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the marker directory identifying a project root. The same name
/// is used for the per-directory policy file inside referenced directories;
/// the two never collide because the marker is a directory and the policy
/// is a regular file.
pub const MARKER: &str = ".pgspa";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("no {MARKER} directory found")]
    NotFound,

    #[error("IO error in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Locate the project root: the nearest ancestor of `start` (inclusive)
/// containing a `.pgspa` directory.
pub fn find_root_from(start: &Path) -> Result<PathBuf, ProjectError> {
    let mut dir = start;
    loop {
        if dir.join(MARKER).is_dir() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(ProjectError::NotFound),
        }
    }
}

/// Locate the project root relative to the current working directory.
pub fn find_root() -> Result<PathBuf, ProjectError> {
    let cwd = std::env::current_dir().map_err(|source| ProjectError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    find_root_from(&cwd)
}

/// Create the `.pgspa` marker directory in `dir` with `rwxr-xr-x`
/// permissions. Succeeds if the marker already exists.
pub fn init(dir: &Path) -> Result<(), ProjectError> {
    let marker = dir.join(MARKER);
    if !marker.is_dir() {
        std::fs::create_dir(&marker).map_err(|source| ProjectError::Io {
            path: marker.clone(),
            source,
        })?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&marker, std::fs::Permissions::from_mode(0o755)).map_err(
            |source| ProjectError::Io {
                path: marker.clone(),
                source,
            },
        )?;
    }
    Ok(())
}
