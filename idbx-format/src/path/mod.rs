use relative_path::{Component, RelativePath, RelativePathBuf};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// A declared path rewritten to stay inside the output root.
///
/// It never contains `.`, `..` or empty segments, so joining it onto a root
/// directory can only name that directory or something below it.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SanitizedPath(RelativePathBuf);

/// The result of [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub path: SanitizedPath,
    /// Number of `..` segments that would have climbed above the root and
    /// were dropped instead.
    pub dropped_parents: usize,
}

/// Normalizes a package-declared path.
///
/// Leading `/`, empty and `.` segments are discarded. A `..` pops the last
/// kept segment, and is dropped when nothing is left to pop.
pub fn sanitize(declared: &str) -> Sanitized {
    let mut out = RelativePathBuf::new();
    let mut dropped_parents = 0;

    for component in RelativePath::new(declared).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    dropped_parents += 1;
                }
            }
            Component::Normal(segment) => out.push(segment),
        }
    }

    Sanitized {
        path: SanitizedPath(out),
        dropped_parents,
    }
}

impl SanitizedPath {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The root itself, as produced by declared paths like `/` or `..`.
    pub fn is_empty(&self) -> bool {
        self.0.as_str().is_empty()
    }

    pub fn to_path<P: AsRef<Path>>(&self, root: P) -> PathBuf {
        self.0.to_path(root)
    }

    pub fn parent(&self) -> Option<SanitizedPath> {
        if self.is_empty() {
            return None;
        }
        self.0
            .parent()
            .map(|parent| SanitizedPath(parent.to_relative_path_buf()))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.as_str().split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for SanitizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}
