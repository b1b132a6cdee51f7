//! Reference resolution
//!
//! Maps a user-supplied reference (a path fragment relative to the project
//! root) to an ordered list of SQL file paths. A reference can denote a
//! `.sql` file, an include list (an extensionless file whose lines name
//! further references), or a directory of SQL files and subdirectories.
//!
//! Include-list expansion keeps a trail of the references currently on the
//! resolution stack; revisiting one is a cycle. Directory expansion honors
//! the per-directory `explicit` policy: such a directory may be named
//! directly but never pulled in while expanding a parent reference.

use crate::config::{ConfigError, DirectoryPolicy};
use crate::project;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("the reference name cannot be empty or start with a dot: \"{}\"", .0.display())]
    BadName(PathBuf),

    #[error("reference cyclicity detected: \"{trace}\"")]
    Cycle { trace: String },

    #[error("the references of the directory \"{}\" are allowed to be used only explicitly", .0.display())]
    ExplicitOnly(PathBuf),

    #[error("invalid reference \"{}\" specified", .0.display())]
    Invalid(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Resolves references against one project root.
pub struct Resolver {
    root: PathBuf,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `reference` (relative to the project root) into the ordered
    /// list of SQL file paths to execute. Returned paths are root-joined.
    pub fn resolve(&self, reference: &Path) -> Result<Vec<PathBuf>, ResolveError> {
        let mut trail = vec![reference.to_path_buf()];
        self.resolve_inner(reference, &mut trail, true)
    }

    fn resolve_inner(
        &self,
        reference: &Path,
        trail: &mut Vec<PathBuf>,
        top_level: bool,
    ) -> Result<Vec<PathBuf>, ResolveError> {
        match reference.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.is_empty() && !name.starts_with('.') => {}
            _ => return Err(ResolveError::BadName(reference.to_path_buf())),
        }

        let full = self.root.join(reference);
        let mut result = Vec::new();

        if full.is_file() && full.extension().is_some_and(|e| e == "sql") {
            result.push(full);
        } else if full.is_file() && full.extension().is_none() {
            self.expand_include_list(reference, &full, trail, &mut result)?;
        } else if full.is_dir() {
            self.expand_directory(reference, &full, trail, top_level, &mut result)?;
        } else if full.with_extension("sql").is_file() {
            result.push(full.with_extension("sql"));
        } else {
            return Err(ResolveError::Invalid(reference.to_path_buf()));
        }
        Ok(result)
    }

    /// Expand an include list: each non-blank, non-`#` line names a further
    /// reference relative to the list's parent directory, resolved in order.
    fn expand_include_list(
        &self,
        reference: &Path,
        full: &Path,
        trail: &mut Vec<PathBuf>,
        result: &mut Vec<PathBuf>,
    ) -> Result<(), ResolveError> {
        let contents = std::fs::read_to_string(full).map_err(|source| ResolveError::Io {
            path: full.to_path_buf(),
            source,
        })?;
        let parent = reference.parent().unwrap_or_else(|| Path::new(""));

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let next = parent.join(trimmed);
            if trail.contains(&next) {
                let mut trace = String::new();
                for step in trail.iter() {
                    trace.push_str(&step.display().to_string());
                    trace.push_str(" -> ");
                }
                trace.push_str(&next.display().to_string());
                return Err(ResolveError::Cycle { trace });
            }
            trail.push(next.clone());
            let expansion = self.resolve_inner(&next, trail, false)?;
            trail.pop();
            result.extend(expansion);
        }
        Ok(())
    }

    /// Expand a directory: heading file first, then the directory's SQL
    /// files and subdirectories in lexicographic order of their projected
    /// names.
    fn expand_directory(
        &self,
        reference: &Path,
        full: &Path,
        trail: &mut Vec<PathBuf>,
        top_level: bool,
        result: &mut Vec<PathBuf>,
    ) -> Result<(), ResolveError> {
        let policy_path = full.join(project::MARKER);
        if policy_path.is_file() {
            let policy = DirectoryPolicy::load(&policy_path)?;
            if policy.explicit && !top_level {
                return Err(ResolveError::ExplicitOnly(reference.to_path_buf()));
            }
        }

        let heading = full.with_extension("sql");
        if heading.is_file() {
            result.push(heading);
        }

        for name in directory_references(full)? {
            let sql = full.join(&name).with_extension("sql");
            if sql.is_file() {
                result.push(sql.clone());
            }
            let sub = sql.with_extension("");
            if sub.is_dir() {
                let child = match sub.file_name() {
                    Some(n) => reference.join(n),
                    None => continue,
                };
                result.extend(self.resolve_inner(&child, trail, false)?);
            }
        }
        Ok(())
    }
}

/// Project a directory's immediate entries onto reference names: the stem of
/// every regular `*.sql` file plus the name of every subdirectory, without
/// duplicates, sorted lexicographically.
fn directory_references(dir: &Path) -> Result<Vec<String>, ResolveError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ResolveError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ResolveError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = if path.is_file() && path.extension().is_some_and(|e| e == "sql") {
            path.file_stem().map(|s| s.to_string_lossy().into_owned())
        } else if path.is_dir() {
            path.file_name().map(|s| s.to_string_lossy().into_owned())
        } else {
            None
        };
        if let Some(name) = name {
            // Dot-prefixed entries cannot be named as references, so they
            // cannot be projected either.
            if !name.starts_with('.') && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}
