//! Path canonicalization and classification.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::io;

/// Which subsystem services a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Managed by the storage backend.
    Backend,
    /// Handled by the native operating system.
    Native,
}

impl Classification {
    /// Returns true if the backend services this path.
    pub fn is_backend(&self) -> bool {
        matches!(self, Classification::Backend)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Backend => write!(f, "backend"),
            Classification::Native => write!(f, "native"),
        }
    }
}

/// Turns a possibly relative path into an absolute, normalized one.
///
/// `cwd` is only consulted for relative paths. Nothing else touches the
/// filesystem: symlinks are not resolved.
pub fn canonicalize<F>(path: &str, cwd: F) -> io::Result<String>
where
    F: FnOnce() -> io::Result<String>,
{
    if path.is_empty() {
        return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }

    let absolute: Cow<'_, str> = if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("{}/{}", cwd()?, path))
    };

    Ok(normalize(&absolute))
}

/// Normalizes an absolute path: drops `.` and empty segments, resolves `..`
/// against the preceding segment (the root is its own parent).
///
/// A trailing separator survives on non-root results.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = String::with_capacity(path.len());
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }

    if out.is_empty() {
        out.push('/');
    } else if path.ends_with('/') {
        out.push('/');
    }

    out
}
