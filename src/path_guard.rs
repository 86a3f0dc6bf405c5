//! Path Guard - One Sanctioned Input Directory
//!
//! The guard resolves the configured input subpath against the repository
//! root before any ledger byte is read. Resolution follows symlinks; the
//! resolved directory must be exactly the expected one, and every ledger file
//! opened later must resolve back inside it.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathSecurityViolation {
    #[error("Input subpath must be relative: {path}")]
    AbsoluteSubpath { path: String },

    #[error("Input subpath contains a forbidden component ({component}): {path}")]
    TraversalComponent { path: String, component: String },

    #[error("Cannot resolve {path}: {reason}")]
    Unresolvable { path: String, reason: String },

    #[error("Input path resolves to {actual}, expected {expected}")]
    Redirected { expected: String, actual: String },

    #[error("Input path {path} is not a proper descendant of repository root {root}")]
    NotDescendant { path: String, root: String },

    #[error("Input path is not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Ledger file {file} resolves to {actual}, outside input root {root}")]
    EscapesInputRoot {
        file: String,
        actual: String,
        root: String,
    },
}

/// Canonical, verified input directory.
///
/// Only [`PathGuard::verify`] constructs one, so holding an `InputRoot` is
/// proof that the security check ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRoot(PathBuf);

impl InputRoot {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for InputRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Result of guarding the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Verified(InputRoot),
    /// Nothing exists at the input path. Not a violation; the run ends in NO_DATA_YET.
    Absent { expected: PathBuf },
}

pub struct PathGuard {
    repo_root: PathBuf,
    subpath: PathBuf,
}

impl PathGuard {
    pub fn new(repo_root: impl Into<PathBuf>, subpath: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            subpath: subpath.into(),
        }
    }

    /// Location the input directory is expected at, before resolution.
    pub fn declared_path(&self) -> PathBuf {
        self.repo_root.join(&self.subpath)
    }

    pub fn verify(&self) -> Result<GuardOutcome, PathSecurityViolation> {
        validate_subpath(&self.subpath)?;

        let canonical_root = canonicalize(&self.repo_root)?;
        let expected = canonical_root.join(&self.subpath);
        let declared = self.declared_path();

        // symlink_metadata does not follow links: a dangling link still exists here
        match declared.symlink_metadata() {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(GuardOutcome::Absent { expected });
            }
            Err(e) => {
                return Err(PathSecurityViolation::Unresolvable {
                    path: declared.display().to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(_) => {}
        }

        let actual = canonicalize(&declared)?;

        if actual.as_os_str() != expected.as_os_str() {
            return Err(PathSecurityViolation::Redirected {
                expected: expected.display().to_string(),
                actual: actual.display().to_string(),
            });
        }

        if actual == canonical_root || !actual.starts_with(&canonical_root) {
            return Err(PathSecurityViolation::NotDescendant {
                path: actual.display().to_string(),
                root: canonical_root.display().to_string(),
            });
        }

        if !actual.is_dir() {
            return Err(PathSecurityViolation::NotADirectory {
                path: actual.display().to_string(),
            });
        }

        Ok(GuardOutcome::Verified(InputRoot(actual)))
    }
}

/// Resolve a ledger file name inside a verified input root.
///
/// Returns `Ok(None)` when the file does not exist. A symlinked file whose
/// target lies outside the root is a violation, as is a dangling link.
pub fn resolve_within(
    root: &InputRoot,
    file_name: &str,
) -> Result<Option<PathBuf>, PathSecurityViolation> {
    validate_file_name(file_name)?;

    let candidate = root.path().join(file_name);
    match candidate.symlink_metadata() {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PathSecurityViolation::Unresolvable {
                path: candidate.display().to_string(),
                reason: e.to_string(),
            })
        }
        Ok(_) => {}
    }

    let resolved = canonicalize(&candidate)?;
    if !resolved.starts_with(root.path()) || resolved == root.path() {
        return Err(PathSecurityViolation::EscapesInputRoot {
            file: file_name.to_string(),
            actual: resolved.display().to_string(),
            root: root.to_string(),
        });
    }

    Ok(Some(resolved))
}

/// Reject absolute subpaths and anything other than plain named components.
pub fn validate_subpath(subpath: &Path) -> Result<(), PathSecurityViolation> {
    let shown = subpath.display().to_string();

    if subpath.is_absolute() || shown.starts_with('/') || shown.starts_with('\\') {
        return Err(PathSecurityViolation::AbsoluteSubpath { path: shown });
    }
    if subpath.as_os_str().is_empty() {
        return Err(PathSecurityViolation::TraversalComponent {
            path: shown,
            component: "<empty>".to_string(),
        });
    }

    for component in subpath.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                if part.contains('\0') || part.contains('\\') {
                    return Err(PathSecurityViolation::TraversalComponent {
                        path: shown,
                        component: part.into_owned(),
                    });
                }
            }
            Component::ParentDir => {
                return Err(PathSecurityViolation::TraversalComponent {
                    path: shown,
                    component: "..".to_string(),
                });
            }
            Component::CurDir => {
                return Err(PathSecurityViolation::TraversalComponent {
                    path: shown,
                    component: ".".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathSecurityViolation::AbsoluteSubpath { path: shown });
            }
        }
    }

    Ok(())
}

/// A single safe path component: non-empty, no separators, not `.`/`..`.
pub fn validate_file_name(name: &str) -> Result<(), PathSecurityViolation> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(PathSecurityViolation::TraversalComponent {
            path: name.to_string(),
            component: name.to_string(),
        });
    }
    Ok(())
}

fn canonicalize(path: &Path) -> Result<PathBuf, PathSecurityViolation> {
    path.canonicalize()
        .map_err(|e| PathSecurityViolation::Unresolvable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
