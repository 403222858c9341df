//! Normalized workbook paths
//!
//! Excel identifies open workbooks by full name, compared case-insensitively,
//! and refuses to hold two workbooks whose file names match even when their
//! directories differ. [`BookPath`] captures both notions: the full-path key
//! used for "is this file already open" and the basename used for collision
//! checks.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// An absolute workbook path with a normalized comparison key.
///
/// Two `BookPath`s are equal when their keys are equal: separators are unified
/// to `/`, case is folded, `.`/`..` components are resolved and, if the file
/// exists, symlinks and short (8.3) names are resolved by canonicalization.
#[derive(Debug, Clone)]
pub struct BookPath {
    path: PathBuf,
    key: String,
}

impl BookPath {
    /// Normalize `path` against the current working directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::FileNameNotGiven);
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let resolved = match std::fs::canonicalize(&absolute) {
            Ok(canonical) => strip_verbatim(canonical),
            // Not created yet: canonicalize the directory so the key matches
            // the one computed once the file exists.
            Err(_) => {
                let clean = lexical_clean(&absolute);
                match (clean.parent(), clean.file_name()) {
                    (Some(parent), Some(name)) => match std::fs::canonicalize(parent) {
                        Ok(dir) => strip_verbatim(dir).join(name),
                        Err(_) => clean.clone(),
                    },
                    _ => clean.clone(),
                }
            }
        };

        let key = normalize_key(&resolved.to_string_lossy());
        Ok(Self {
            path: resolved,
            key,
        })
    }

    /// The absolute path, as handed to the automation layer.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The comparison key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The case-folded final path component.
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Whether `other` names a different file with the same basename.
    pub fn collides_with(&self, other: &BookPath) -> bool {
        self != other && self.basename() == other.basename()
    }
}

impl PartialEq for BookPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for BookPath {}

impl Hash for BookPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for BookPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for BookPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

fn normalize_key(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let trimmed = if unified.len() > 1 {
        unified.trim_end_matches('/')
    } else {
        unified.as_str()
    };
    trimmed.to_lowercase()
}

/// Drop the `\\?\` prefix Windows adds to canonicalized paths.
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC") => PathBuf::from(rest),
        _ => path,
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
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
