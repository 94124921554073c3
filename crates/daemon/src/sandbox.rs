//! Allow-list of root directories and the path containment gate.
//!
//! Every filesystem operation resolves its caller-supplied path through
//! [`AllowList::resolve`] before touching the disk. Containment is decided
//! lexically: paths are cleaned of `.`/`..` segments and compared component
//! by component, so `/allowed-dirs` is never contained in `/allowed`.
//! Symlinks are not resolved.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors produced by the sandbox.
#[derive(Debug, Error, PartialEq)]
pub enum SandboxError {
    /// No allowed directory was configured.
    #[error("at least one allowed directory must be provided")]
    Empty,

    /// The caller supplied an empty path.
    #[error("path must not be empty")]
    EmptyPath,

    /// The working directory could not be determined for a relative path.
    #[error("cannot resolve relative path {0}: {1}")]
    Unresolvable(PathBuf, String),

    /// The path lies outside every allowed directory.
    #[error("path {0} is outside of allowed directories")]
    OutsideAllowedDirectories(PathBuf),
}

/// Immutable set of allowed root directories.
///
/// Entries are absolute and lexically clean. The list is built once at
/// startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowList {
    roots: Vec<PathBuf>,
}

impl AllowList {
    /// Build an allow-list from configured directories.
    ///
    /// Relative entries are resolved against the process working directory.
    pub fn new<I, P>(dirs: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut roots: Vec<PathBuf> = Vec::new();

        for dir in dirs {
            let dir = dir.as_ref();
            if dir.as_os_str().is_empty() {
                continue;
            }
            let root = clean(&absolutize(dir)?);
            if !root.is_dir() {
                tracing::warn!(root = %root.display(), "Allowed directory does not exist");
            }
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        if roots.is_empty() {
            return Err(SandboxError::Empty);
        }

        tracing::debug!(count = roots.len(), "Allow-list constructed");
        Ok(Self { roots })
    }

    /// The allowed roots, in configuration order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Check whether an absolute path is contained in an allowed root.
    ///
    /// Relative paths are always rejected. No filesystem access happens here.
    pub fn is_allowed(&self, candidate: &Path) -> bool {
        if !candidate.is_absolute() {
            return false;
        }

        let candidate = clean(candidate);
        self.roots.iter().any(|root| is_within(&candidate, root))
    }

    /// Turn caller input into a gated, absolute, clean path.
    ///
    /// Relative input is resolved against the working directory first.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        if raw.is_empty() {
            return Err(SandboxError::EmptyPath);
        }

        let candidate = clean(&absolutize(Path::new(raw))?);
        if self.is_allowed(&candidate) {
            Ok(candidate)
        } else {
            tracing::warn!(
                path = %candidate.display(),
                "Rejected path outside allowed directories"
            );
            Err(SandboxError::OutsideAllowedDirectories(candidate))
        }
    }
}

/// Component-wise containment: equal to `root` or a descendant of it.
fn is_within(candidate: &Path, root: &Path) -> bool {
    let mut candidate = candidate.components();
    for expected in root.components() {
        match candidate.next() {
            Some(actual) if actual.as_os_str() == expected.as_os_str() => {}
            _ => return false,
        }
    }
    true
}

fn absolutize(path: &Path) -> Result<PathBuf, SandboxError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| SandboxError::Unresolvable(path.to_path_buf(), e.to_string()))
}

/// Lexically normalize a path.
///
/// Drops `.` segments and redundant separators and folds `..` into the
/// preceding segment. A `..` directly under the root stays at the root.
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().map(|c| c.as_os_str()).collect()
}
