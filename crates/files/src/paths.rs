//! Resolution of peer-supplied file names against the shared root.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file name is empty")]
    Empty,
    #[error("file name must be relative: {0}")]
    Absolute(String),
    #[error("file name escapes the shared directory: {0}")]
    Traversal(String),
    #[error("file resolves outside the shared directory: {0}")]
    OutsideRoot(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PathError {
    /// Whether the name itself was rejected, as opposed to an I/O failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, PathError::Io(_))
    }
}

/// Map a relative `name` to a path under `root`.
///
/// Lexically rejects absolute names and any `..` component. When the target
/// exists it is canonicalized and must still live under the canonical root,
/// which catches symlinks pointing elsewhere. A non-existent target is
/// returned as-is so the caller can answer "not found".
pub fn resolve_shared_path(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.trim().is_empty() {
        return Err(PathError::Empty);
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Traversal(name.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(name.to_string()))
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }

    let candidate = root.join(&relative);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let canonical_root = root.canonicalize()?;
    let canonical = candidate.canonicalize()?;
    if !canonical.starts_with(&canonical_root) {
        return Err(PathError::OutsideRoot(name.to_string()));
    }
    Ok(canonical)
}
