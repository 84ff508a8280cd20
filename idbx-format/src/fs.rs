//! Creating directories, files and symlinks below the output root.
//!
//! Every destination is a [`SanitizedPath`] joined onto the canonical root.
//! Lexical sanitization cannot see symlinks already on disk, so ancestors
//! are walked one at a time and any symlink found on the way must resolve
//! back inside the root.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{ExtractError, Failure, SkipError};
use crate::path::{SanitizedPath, sanitize};

/// Upper bound on symlinks followed while resolving one path.
const MAX_LINK_HOPS: usize = 40;

/// Resolves symlinks in `path` like `realpath`, except that components which
/// do not exist are appended lexically instead of failing.
pub(crate) fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    let mut pending: Vec<OsString> = vec![];
    let mut hops = 0;

    push_components(path, &mut resolved, &mut pending);

    while let Some(component) = pending.pop() {
        if component == "." {
            continue;
        }
        if component == ".." {
            resolved.pop();
            continue;
        }

        let candidate = resolved.join(&component);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(io::Error::other(format!(
                        "too many levels of symbolic links: {}",
                        path.display()
                    )));
                }
                let target = fs::read_link(&candidate)?;
                push_components(&target, &mut resolved, &mut pending);
            }
            Ok(_) => resolved = candidate,
            Err(e) if e.kind() == io::ErrorKind::NotFound => resolved = candidate,
            Err(e) => return Err(e),
        }
    }

    Ok(resolved)
}

/// Queues the components of `path` in front of `pending`. An absolute path
/// restarts resolution from its root.
fn push_components(path: &Path, resolved: &mut PathBuf, pending: &mut Vec<OsString>) {
    let mut queued = vec![];
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                resolved.clear();
                resolved.push(component.as_os_str());
            }
            other => queued.push(other.as_os_str().to_os_string()),
        }
    }
    pending.extend(queued.into_iter().rev());
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks not supported",
    ))
}

/// Writes entries below one output root.
#[derive(Debug)]
pub(crate) struct Materializer {
    root: PathBuf,
}

impl Materializer {
    /// Creates the root if needed and canonicalizes it.
    pub(crate) fn new(root: &Path) -> Result<Materializer, ExtractError> {
        fs::create_dir_all(root).map_err(|e| ExtractError::CreateRoot(e, root.to_path_buf()))?;
        let root = root
            .canonicalize()
            .map_err(|e| ExtractError::CreateRoot(e, root.to_path_buf()))?;
        Ok(Materializer { root })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn destination(&self, path: &SanitizedPath) -> PathBuf {
        path.to_path(&self.root)
    }

    /// Resolves `path` and requires the result to stay inside the root.
    fn contain(&self, path: &Path) -> Result<PathBuf, ExtractError> {
        let resolved =
            resolve_lenient(path).map_err(|e| ExtractError::ResolveFailed(e, path.to_path_buf()))?;
        if !resolved.starts_with(&self.root) {
            return Err(ExtractError::Containment {
                path: path.to_path_buf(),
                resolved,
            });
        }
        Ok(resolved)
    }

    /// Creates the ancestors of `path` and returns its destination.
    pub(crate) fn prepare(&self, path: &SanitizedPath) -> Result<PathBuf, ExtractError> {
        let Some(parent) = path.parent() else {
            return Ok(self.root.clone());
        };

        let mut current = self.root.clone();
        for segment in parent.segments() {
            current.push(segment);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.is_dir() => {}
                Ok(meta) if meta.file_type().is_symlink() => {
                    let resolved = self.contain(&current)?;
                    tracing::trace!(
                        path = %current.display(),
                        resolved = %resolved.display(),
                        "following symlinked directory"
                    );
                    fs::create_dir_all(&resolved)
                        .map_err(|e| ExtractError::CreateDirFailed(e, current.clone()))?;
                }
                Ok(_) => {
                    return Err(ExtractError::CreateDirFailed(
                        io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
                        current,
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir(&current)
                        .map_err(|e| ExtractError::CreateDirFailed(e, current.clone()))?;
                }
                Err(e) => return Err(ExtractError::CreateDirFailed(e, current)),
            }
        }

        Ok(self.destination(path))
    }

    /// Creates a directory, or updates the mode of an existing one.
    ///
    /// Returns whether a new directory was created.
    pub(crate) fn create_dir(&self, path: &SanitizedPath, mode: u32) -> Result<bool, Failure> {
        let dest = self.prepare(path)?;

        let created = match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_dir() => false,
            Ok(meta) if meta.file_type().is_symlink() => {
                return match fs::metadata(&dest) {
                    Ok(target) if target.is_dir() => Ok(false),
                    _ => Err(SkipError::NotADirectory(dest).into()),
                };
            }
            Ok(_) => return Err(SkipError::NotADirectory(dest).into()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&dest).map_err(|e| SkipError::CreateDirFailed(e, dest.clone()))?;
                true
            }
            Err(e) => return Err(SkipError::CreateDirFailed(e, dest).into()),
        };

        set_mode(&dest, mode).map_err(|e| SkipError::CreateDirFailed(e, dest.clone()))?;
        Ok(created)
    }

    /// Writes a regular file and applies `mode` afterwards.
    pub(crate) fn write_file(
        &self,
        path: &SanitizedPath,
        contents: &[u8],
        mode: u32,
    ) -> Result<(), Failure> {
        if path.is_empty() {
            return Err(SkipError::EmptyPath.into());
        }
        let dest = self.prepare(path)?;

        if let Ok(meta) = fs::symlink_metadata(&dest) {
            if meta.file_type().is_symlink() {
                self.contain(&dest)?;
            }
        }

        fs::write(&dest, contents).map_err(|e| SkipError::WriteFailed(e, dest.clone()))?;
        set_mode(&dest, mode).map_err(|e| SkipError::WriteFailed(e, dest.clone()))?;
        Ok(())
    }

    /// Maps a link target into the extracted tree. Absolute targets are
    /// rebased onto the root; relative ones are kept as written.
    pub(crate) fn link_target(&self, target: &str) -> PathBuf {
        if target.starts_with('/') {
            sanitize(target).path.to_path(&self.root)
        } else {
            PathBuf::from(target)
        }
    }

    /// Creates a symlink at `path` pointing to `target`.
    ///
    /// An existing entry is accepted when it resolves to the same place the
    /// new link would. Returns whether a new link was created.
    pub(crate) fn create_symlink(&self, path: &SanitizedPath, target: &Path) -> Result<bool, Failure> {
        if path.is_empty() {
            return Err(SkipError::EmptyPath.into());
        }
        let dest = self.prepare(path)?;

        match fs::symlink_metadata(&dest) {
            Ok(_) => {
                let existing = resolve_lenient(&dest)
                    .map_err(|e| ExtractError::ResolveFailed(e, dest.clone()))?;
                let base = dest.parent().unwrap_or(&self.root);
                let intended = resolve_lenient(&base.join(target))
                    .map_err(|e| ExtractError::ResolveFailed(e, dest.clone()))?;
                if existing != intended {
                    return Err(ExtractError::LinkConflict {
                        path: dest,
                        existing,
                        intended,
                    }
                    .into());
                }
                Ok(false)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                symlink(target, &dest)
                    .map_err(|e| SkipError::CreateLinkFailed(e, dest.clone(), target.to_path_buf()))?;
                Ok(true)
            }
            Err(e) => Err(SkipError::CreateLinkFailed(e, dest, target.to_path_buf()).into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn setup() -> (tempfile::TempDir, Materializer) {
        let dir = tempfile::tempdir().unwrap();
        let materializer = Materializer::new(&dir.path().join("root")).unwrap();
        (dir, materializer)
    }

    fn path(declared: &str) -> SanitizedPath {
        sanitize(declared).path
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn resolve_missing_components() {
        let (_dir, m) = setup();
        let resolved = resolve_lenient(&m.root().join("a/b/../c")).unwrap();
        assert_eq!(resolved, m.root().join("a/c"));
    }

    #[test]
    fn resolve_through_dangling_link() {
        let (_dir, m) = setup();
        symlink(Path::new("nowhere/deeper"), &m.root().join("link")).unwrap();
        let resolved = resolve_lenient(&m.root().join("link/file")).unwrap();
        assert_eq!(resolved, m.root().join("nowhere/deeper/file"));
    }

    #[test]
    fn resolve_link_loop() {
        let (_dir, m) = setup();
        symlink(Path::new("b"), &m.root().join("a")).unwrap();
        symlink(Path::new("a"), &m.root().join("b")).unwrap();
        assert!(resolve_lenient(&m.root().join("a")).is_err());
    }

    #[test]
    fn directory_is_idempotent() {
        let (_dir, m) = setup();
        let dir = path("usr/lib");

        assert!(m.create_dir(&dir, 0o755).unwrap());
        assert_eq!(mode_of(&m.root().join("usr/lib")), 0o755);

        fs::set_permissions(m.root().join("usr/lib"), fs::Permissions::from_mode(0o700)).unwrap();
        assert!(!m.create_dir(&dir, 0o755).unwrap());
        assert_eq!(mode_of(&m.root().join("usr/lib")), 0o755);
    }

    #[test]
    fn directory_over_file_is_recoverable() {
        let (_dir, m) = setup();
        fs::write(m.root().join("usr"), b"").unwrap();
        assert!(matches!(
            m.create_dir(&path("usr"), 0o755),
            Err(Failure::Skip(SkipError::NotADirectory(_)))
        ));
    }

    #[test]
    fn ancestor_file_is_fatal() {
        let (_dir, m) = setup();
        fs::write(m.root().join("usr"), b"").unwrap();
        assert!(matches!(
            m.write_file(&path("usr/bin/foo"), b"x", 0o644),
            Err(Failure::Fatal(ExtractError::CreateDirFailed(..)))
        ));
    }

    #[test]
    fn ancestor_link_inside_root_is_followed() {
        let (_dir, m) = setup();
        fs::create_dir(m.root().join("real")).unwrap();
        symlink(Path::new("real"), &m.root().join("usr")).unwrap();

        m.write_file(&path("usr/bin/foo"), b"DATA", 0o644).unwrap();
        assert_eq!(fs::read(m.root().join("real/bin/foo")).unwrap(), b"DATA");
    }

    #[test]
    fn ancestor_link_outside_root_is_fatal() {
        let (dir, m) = setup();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        symlink(&outside, &m.root().join("usr")).unwrap();

        assert!(matches!(
            m.write_file(&path("usr/bin/foo"), b"DATA", 0o644),
            Err(Failure::Fatal(ExtractError::Containment { .. }))
        ));
        assert!(!outside.join("bin").exists());
    }

    #[test]
    fn write_through_escaping_link_is_fatal() {
        let (dir, m) = setup();
        let outside = dir.path().join("victim");
        fs::write(&outside, b"keep").unwrap();
        symlink(&outside, &m.root().join("foo")).unwrap();

        assert!(matches!(
            m.write_file(&path("foo"), b"DATA", 0o644),
            Err(Failure::Fatal(ExtractError::Containment { .. }))
        ));
        assert_eq!(fs::read(&outside).unwrap(), b"keep");
    }

    #[test]
    fn file_mode_applied_after_write() {
        let (_dir, m) = setup();
        m.write_file(&path("bin/ro"), b"x", 0o444).unwrap();
        assert_eq!(mode_of(&m.root().join("bin/ro")), 0o444);
    }

    #[test]
    fn symlink_is_idempotent() {
        let (_dir, m) = setup();
        let link = path("usr/lib/libc.so");
        let target = m.link_target("libc.so.1");

        assert!(m.create_symlink(&link, &target).unwrap());
        assert!(!m.create_symlink(&link, &target).unwrap());
        assert_eq!(
            fs::read_link(m.root().join("usr/lib/libc.so")).unwrap(),
            PathBuf::from("libc.so.1")
        );
    }

    #[test]
    fn symlink_conflict_is_fatal() {
        let (_dir, m) = setup();
        let link = path("usr/lib/libc.so");
        m.create_symlink(&link, &m.link_target("libc.so.1")).unwrap();

        assert!(matches!(
            m.create_symlink(&link, &m.link_target("libc.so.2")),
            Err(Failure::Fatal(ExtractError::LinkConflict { .. }))
        ));
    }

    #[test]
    fn absolute_target_is_rebased() {
        let (_dir, m) = setup();
        let target = m.link_target("/usr/../../etc/passwd");
        assert_eq!(target, m.root().join("etc/passwd"));
    }

    #[test]
    fn empty_paths_are_rejected() {
        let (_dir, m) = setup();
        assert!(matches!(
            m.write_file(&path("/"), b"", 0o644),
            Err(Failure::Skip(SkipError::EmptyPath))
        ));
        assert!(!m.create_dir(&path("/"), 0o755).unwrap());
    }
}
