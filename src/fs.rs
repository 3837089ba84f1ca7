//! Filesystem primitives used by the fetch pipeline.
//!
//! Everything here is async (tokio) and reports failures as
//! [`FileSystemError`] carrying the operation and the path involved.
//!
//! - [`exists`] - existence prober; never fails
//! - [`resolve_under`] - maps a resource name onto a directory
//! - [`copy_contents`] - content-only copy written through a temporary sibling
//! - [`apply_mode`] - sets permission bits (no-op off unix)
//! - [`PartialFile`] - temporary sibling that is removed unless committed

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use rand::Rng;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Filesystem operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOperation {
    /// Creating a directory (and its parents).
    CreateDir,
    /// Reading metadata.
    Stat,
    /// Copying a cached file to its destination.
    Copy,
    /// Applying permission bits.
    Chmod,
    /// Mapping a resource name onto a directory.
    ResolveName,
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateDir => "create directory",
            Self::Stat => "stat",
            Self::Copy => "copy",
            Self::Chmod => "chmod",
            Self::ResolveName => "resolve name",
        };
        f.write_str(label)
    }
}

/// Local filesystem failure outside of a download stream.
#[derive(Debug, Error)]
#[error("{operation} failed for {path}: {source}")]
pub struct FileSystemError {
    /// What was being attempted.
    pub operation: FsOperation,
    /// The path involved.
    pub path: PathBuf,
    /// The underlying IO error.
    #[source]
    pub source: io::Error,
}

impl FileSystemError {
    /// Creates a filesystem error for `operation` on `path`.
    pub fn new(operation: FsOperation, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Creates an error for a resource name that cannot live under a directory.
    pub fn invalid_name(name: &str) -> Self {
        Self::new(
            FsOperation::ResolveName,
            name,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "resource name must be a non-empty relative path without `..`",
            ),
        )
    }
}

/// Returns `true` only if `path` names a regular file.
///
/// Any stat error (including not-found) yields `false`.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Resolves `name` relative to `dir`.
///
/// Nested names (`fonts/a.woff`) are allowed. Empty names, absolute names
/// and names that climb out through `..` are rejected.
///
/// # Errors
///
/// Returns [`FileSystemError`] with [`FsOperation::ResolveName`] for
/// rejected names.
pub fn resolve_under(dir: &Path, name: &str) -> Result<PathBuf, FileSystemError> {
    let relative = Path::new(name);
    let mut has_normal = false;
    for component in relative.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FileSystemError::invalid_name(name));
            }
        }
    }
    if !has_normal {
        return Err(FileSystemError::invalid_name(name));
    }
    Ok(dir.join(relative))
}

/// Creates every missing parent directory of `path`.
///
/// # Errors
///
/// Returns [`FileSystemError`] if directory creation fails.
pub async fn ensure_parent_dir(path: &Path) -> Result<(), FileSystemError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| FileSystemError::new(FsOperation::CreateDir, parent, e))
}

/// Copies the bytes of `from` to `to`, creating directories as needed.
///
/// Only content is transferred; the new file gets default permissions.
/// The destination is replaced in one rename, so a failed copy leaves any
/// previous file at `to` untouched.
///
/// # Errors
///
/// Returns [`FileSystemError`] with [`FsOperation::Copy`] on any read or write
/// failure, or [`FsOperation::CreateDir`] if the parent cannot be created.
#[instrument(level = "debug", fields(from = %from.display(), to = %to.display()))]
pub async fn copy_contents(from: &Path, to: &Path) -> Result<u64, FileSystemError> {
    ensure_parent_dir(to).await?;

    let mut source = File::open(from)
        .await
        .map_err(|e| FileSystemError::new(FsOperation::Copy, from, e))?;

    let partial = PartialFile::for_target(to);
    let mut target = File::create(partial.temp_path())
        .await
        .map_err(|e| FileSystemError::new(FsOperation::Copy, to, e))?;

    let bytes = tokio::io::copy(&mut source, &mut target)
        .await
        .map_err(|e| FileSystemError::new(FsOperation::Copy, to, e))?;
    target
        .flush()
        .await
        .map_err(|e| FileSystemError::new(FsOperation::Copy, to, e))?;
    drop(target);

    partial
        .commit()
        .await
        .map_err(|e| FileSystemError::new(FsOperation::Copy, to, e))?;

    debug!(bytes, "copied");
    Ok(bytes)
}

/// Applies unix permission bits to `path`.
///
/// # Errors
///
/// Returns [`FileSystemError`] with [`FsOperation::Chmod`] if the permissions
/// cannot be set.
#[cfg(unix)]
pub async fn apply_mode(path: &Path, mode: u32) -> Result<(), FileSystemError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| FileSystemError::new(FsOperation::Chmod, path, e))?;
    debug!(path = %path.display(), mode = format_args!("{mode:o}"), "applied file mode");
    Ok(())
}

/// Permission bits are not representable here; the request is ignored.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub async fn apply_mode(path: &Path, mode: u32) -> Result<(), FileSystemError> {
    debug!(path = %path.display(), mode, "file modes unsupported on this platform; skipping");
    Ok(())
}

/// Temporary sibling of a target file.
///
/// Data is written to `.<name>.<random>.part` next to the target and moved
/// into place by [`commit`](Self::commit). If the value is dropped before a
/// successful commit (error, timeout, task abort) the temporary file is
/// deleted; a deletion failure is logged and otherwise ignored.
#[derive(Debug)]
pub(crate) struct PartialFile {
    temp_path: PathBuf,
    target: PathBuf,
    armed: bool,
}

impl PartialFile {
    pub(crate) fn for_target(target: &Path) -> Self {
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix: u32 = rand::thread_rng().r#gen();
        let temp_name = format!(".{file_name}.{suffix:08x}.part");
        let temp_path = match target.parent() {
            Some(parent) => parent.join(temp_name),
            None => PathBuf::from(temp_name),
        };
        Self {
            temp_path,
            target: target.to_path_buf(),
            armed: true,
        }
    }

    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Renames the temporary file onto the target.
    pub(crate) async fn commit(mut self) -> io::Result<()> {
        tokio::fs::rename(&self.temp_path, &self.target).await?;
        self.armed = false;
        Ok(())
    }

    /// Deletes the temporary file now instead of waiting for drop.
    pub(crate) async fn discard(mut self) {
        self.armed = false;
        remove_logged(&self.temp_path, tokio::fs::remove_file(&self.temp_path).await);
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            remove_logged(&self.temp_path, std::fs::remove_file(&self.temp_path));
        }
    }
}

fn remove_logged(path: &Path, outcome: io::Result<()>) {
    match outcome {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exists_true_for_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();
        assert!(exists(&path).await);
    }

    #[tokio::test]
    async fn test_exists_false_for_missing_and_directory() {
        let dir = TempDir::new().unwrap();
        assert!(!exists(&dir.path().join("missing")).await);
        assert!(!exists(dir.path()).await);
    }

    #[test]
    fn test_resolve_under_accepts_nested_names() {
        let resolved = resolve_under(Path::new("/out"), "fonts/a.woff").unwrap();
        assert_eq!(resolved, PathBuf::from("/out/fonts/a.woff"));
    }

    #[test]
    fn test_resolve_under_rejects_escape_and_absolute() {
        for name in ["../etc/passwd", "/abs", "", ".", "a/../../b"] {
            let err = resolve_under(Path::new("/out"), name).unwrap_err();
            assert_eq!(err.operation, FsOperation::ResolveName, "name: {name:?}");
        }
    }

    #[tokio::test]
    async fn test_copy_contents_creates_parents_and_copies_bytes() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("cache/a.bin");
        std::fs::create_dir_all(from.parent().unwrap()).unwrap();
        std::fs::write(&from, b"payload").unwrap();
        let to = dir.path().join("dest/deep/a.bin");

        let bytes = copy_contents(&from, &to).await.unwrap();

        assert_eq!(bytes, 7);
        assert_eq!(std::fs::read(&to).unwrap(), b"payload");
        let leftovers: Vec<_> = std::fs::read_dir(to.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "no temporary files left: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_copy_contents_missing_source_reports_copy_error() {
        let dir = TempDir::new().unwrap();
        let err = copy_contents(&dir.path().join("nope"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert_eq!(err.operation, FsOperation::Copy);
        assert!(!dir.path().join("out").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_contents_does_not_carry_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let from = dir.path().join("exec.sh");
        std::fs::write(&from, b"#!/bin/sh").unwrap();
        std::fs::set_permissions(&from, std::fs::Permissions::from_mode(0o755)).unwrap();
        let to = dir.path().join("copy.sh");

        copy_contents(&from, &to).await.unwrap();

        let mode = std::fs::metadata(&to).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o111, 0, "copy must not inherit execute bits");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_mode_sets_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.txt");
        std::fs::write(&path, b"b").unwrap();

        apply_mode(&path, 0o640).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[tokio::test]
    async fn test_apply_mode_missing_file_is_chmod_error() {
        let dir = TempDir::new().unwrap();
        let result = apply_mode(&dir.path().join("missing"), 0o644).await;
        #[cfg(unix)]
        assert_eq!(result.unwrap_err().operation, FsOperation::Chmod);
        #[cfg(not(unix))]
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_partial_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let partial = PartialFile::for_target(&dir.path().join("x.bin"));
        std::fs::write(partial.temp_path(), b"half").unwrap();
        let temp = partial.temp_path().to_path_buf();

        drop(partial);

        assert!(!temp.exists());
        assert!(!dir.path().join("x.bin").exists());
    }

    #[tokio::test]
    async fn test_partial_file_commit_replaces_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("x.bin");
        std::fs::write(&target, b"old").unwrap();
        let partial = PartialFile::for_target(&target);
        std::fs::write(partial.temp_path(), b"new").unwrap();

        partial.commit().await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
