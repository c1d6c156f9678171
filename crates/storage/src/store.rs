// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence with atomic replace and rotating backups.
//!
//! Saves write a temp file in the snapshot directory, rotate the
//! previous snapshot into `.bak` / `.bak.2` / `.bak.3`, then rename the
//! temp file over the target. Loads fall back to the newest readable
//! backup when the snapshot itself is corrupt.

use crate::state::ControllerState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Current snapshot schema version
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

const MAX_BAK_FILES: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
    #[error("snapshot and all backups are unreadable at {}", .0.display())]
    Unrecoverable(PathBuf),
}

/// On-disk envelope around [`ControllerState`].
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(rename = "v")]
    version: u32,
    state: ControllerState,
    saved_at: DateTime<Utc>,
}

/// Pick the `.bak` / `.bak.N` path for slot `n`.
fn bak_path(path: &Path, n: u32) -> PathBuf {
    if n == 1 {
        path.with_extension("bak")
    } else {
        path.with_extension(format!("bak.{n}"))
    }
}

/// Rotate existing backups up by one slot and return the freed `.bak`
/// path. The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let oldest = bak_path(path, MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak_path(path, n);
        if src.exists() {
            let _ = fs::rename(&src, bak_path(path, n + 1));
        }
    }
    bak_path(path, 1)
}

/// The controller's persisted state behind a process-wide lock.
pub struct Store {
    path: PathBuf,
    state: Mutex<ControllerState>,
}

impl Store {
    /// Load the snapshot at `path`. A missing file yields the default
    /// state; a corrupt file is recovered from the newest backup.
    pub fn load(path: PathBuf) -> Result<Self, StoreError> {
        let state = match Self::read_snapshot(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!(path = %path.display(), "no snapshot, starting fresh");
                ControllerState::default()
            }
            Err(first_error) => {
                warn!(path = %path.display(), error = %first_error, "snapshot unreadable, trying backups");
                let mut recovered = None;
                for n in 1..=MAX_BAK_FILES {
                    match Self::read_snapshot(&bak_path(&path, n)) {
                        Ok(Some(state)) => {
                            warn!(backup = n, "recovered state from backup");
                            recovered = Some(state);
                            break;
                        }
                        _ => continue,
                    }
                }
                recovered.ok_or(StoreError::Unrecoverable(path.clone()))?
            }
        };
        Ok(Self { path, state: Mutex::new(state) })
    }

    fn read_snapshot(path: &Path) -> Result<Option<ControllerState>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version > CURRENT_SNAPSHOT_VERSION {
            return Err(StoreError::VersionTooNew {
                found: snapshot.version,
                supported: CURRENT_SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot.state))
    }

    /// Persist the current state: serialize under the lock, rotate
    /// backups, atomic replace.
    pub fn save(&self) -> Result<(), StoreError> {
        let bytes = {
            let state = self.state.lock();
            let snapshot = Snapshot {
                version: CURRENT_SNAPSHOT_VERSION,
                state: state.clone(),
                saved_at: Utc::now(),
            };
            serde_json::to_vec_pretty(&snapshot)?
        };

        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        if self.path.exists() {
            let _ = fs::copy(&self.path, rotate_bak_path(&self.path));
        }
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Read access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&ControllerState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Mutate the state and persist the result.
    pub fn update<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> Result<R, StoreError> {
        let result = f(&mut self.state.lock());
        self.save()?;
        Ok(result)
    }

    /// Mutate the state without persisting (callers batch a save after).
    pub fn update_unsaved<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
