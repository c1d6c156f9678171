// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic file operations, directory copies, and the attach sentinel.

use std::path::Path;
use thiserror::Error;
use warden_core::ATTACH_SENTINEL;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> IoError {
    IoError::Io { path: path.display().to_string(), source }
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// then rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| io_err(path, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_err(path, e))?;
    std::io::Write::write_all(&mut tmp, bytes).map_err(|e| io_err(path, e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// True when the directory is missing or contains no entries.
pub fn is_empty_or_missing(path: &Path) -> Result<bool, IoError> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Recursively copy `src` into `dst`, skipping top-level entries whose
/// file name appears in `exclude`.
pub fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<(), IoError> {
    copy_dir_inner(src, dst, exclude, true)
}

fn copy_dir_inner(src: &Path, dst: &Path, exclude: &[&str], top: bool) -> Result<(), IoError> {
    std::fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    for entry in std::fs::read_dir(src).map_err(|e| io_err(src, e))? {
        let entry = entry.map_err(|e| io_err(src, e))?;
        let name = entry.file_name();
        if top && exclude.iter().any(|x| name.as_os_str() == *x) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type().map_err(|e| io_err(&from, e))?;
        if file_type.is_dir() {
            copy_dir_inner(&from, &to, exclude, false)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
        }
        // Symlinks are dropped: instance trees must be self-contained.
    }
    Ok(())
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(path: &Path) -> Result<(), IoError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// True when the attach sentinel is present in `dir`.
pub fn has_sentinel(dir: &Path) -> bool {
    dir.join(ATTACH_SENTINEL).is_file()
}

/// Write the attach sentinel into `dir` (detach marker). The contents
/// let a later attach restore the instance's identity.
pub fn write_sentinel(dir: &Path, contents: &[u8]) -> Result<(), IoError> {
    write_atomic(&dir.join(ATTACH_SENTINEL), contents)
}

/// Remove the attach sentinel, returning its contents when one was
/// consumed.
pub fn consume_sentinel(dir: &Path) -> Result<Option<String>, IoError> {
    let path = dir.join(ATTACH_SENTINEL);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            Ok(Some(contents))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(&path, e)),
    }
}

#[cfg(test)]
#[path = "ioutil_tests.rs"]
mod tests;
