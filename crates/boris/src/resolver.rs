//! Path scoping: canonicalize caller paths and enforce allow/deny policy.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;

use crate::error::ResolveError;

/// Validates every file-tool path before any I/O happens.
///
/// An empty allow-list means no restriction. Deny patterns are doublestar
/// globs (`**/.env`) matched against the fully resolved path, so symlink and
/// `..` tricks cannot sidestep them.
#[derive(Debug)]
pub struct Resolver {
    allow: Vec<PathBuf>,
    deny: Vec<Pattern>,
}

impl Resolver {
    pub fn new(allow: Vec<PathBuf>, deny: &[String]) -> Result<Self, ResolveError> {
        let allow = allow
            .into_iter()
            // Policy roots are canonicalized once so the boundary check below
            // compares like with like. A root that does not exist yet is kept
            // verbatim; nothing will resolve under it until it does.
            .map(|p| p.canonicalize().unwrap_or(p))
            .collect();
        let deny = deny
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|source| ResolveError::InvalidDenyPattern {
                    pattern: raw.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { allow, deny })
    }

    /// A resolver that admits everything. Used by tests and by servers run
    /// without `--allow`.
    pub fn unrestricted() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    /// Resolve `input` against the session cwd and check policy.
    ///
    /// Empty input means the cwd itself. The existing prefix of the path is
    /// symlink-resolved; a not-yet-created suffix is appended after lexical
    /// cleaning, so tools may create files in existing directories. Not-found
    /// is never an error here; the caller's I/O produces the definitive one.
    pub fn resolve(&self, cwd: &Path, input: &str) -> Result<PathBuf, ResolveError> {
        let joined = if input.is_empty() {
            cwd.to_path_buf()
        } else {
            let candidate = Path::new(input);
            if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                cwd.join(candidate)
            }
        };

        let resolved = canonicalize_prefix(&joined);

        if !self.allow.is_empty() {
            // Component-wise prefix check: `/foo` admits `/foo/bar` but never
            // `/foobar`.
            let inside = self.allow.iter().any(|root| resolved.starts_with(root));
            if !inside {
                return Err(ResolveError::OutsideAllowed(resolved));
            }
        }

        let text = resolved.to_string_lossy();
        for pattern in &self.deny {
            if pattern.matches(&text) {
                return Err(ResolveError::Denied {
                    path: resolved,
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        Ok(resolved)
    }
}

/// Canonicalize the longest existing ancestor of `path` and reattach the
/// remaining components. Falls back to lexical cleaning when nothing along
/// the path exists (e.g. a broken symlink partway down).
fn canonicalize_prefix(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }

    let mut suffix: Vec<OsString> = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        // `file_name` is None for `..`-terminated paths; give up on those and
        // clean lexically below.
        let Some(name) = current.file_name().map(OsString::from) else {
            break;
        };
        suffix.push(name);
        if !current.pop() {
            break;
        }
        if let Ok(base) = current.canonicalize() {
            let mut out = base;
            for name in suffix.iter().rev() {
                out.push(name);
            }
            return out;
        }
    }

    clean(path)
}

/// Fold `.` and `..` components without touching the filesystem.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
