//! Persistent runtime state.
//!
//! The local runtime keeps a JSON index of pulled images and the
//! containers it created, so a later process can pick them up again.
//!
//! Several processes may share one index. Readers hold a shared lock and
//! writers an exclusive lock on a sibling `.lock` file for the whole
//! load-modify-save cycle. The index itself is replaced by renaming a
//! uniquely named temporary file, so the lock never lives on a file that
//! gets swapped out.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use nebulabox_common::error::RuntimeError;
use nebulabox_common::types::{ContainerId, ContainerOptions};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::client::{ContainerHandle, RuntimeContainer, RuntimeResult, RuntimeStatus};

/// Persistent record of one runtime container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Runtime handle.
    pub handle: ContainerHandle,
    /// Lifecycle ID the container was created for.
    #[serde(default)]
    pub container_id: Option<ContainerId>,
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Options the container was created with.
    #[serde(default)]
    pub options: ContainerOptions,
    /// Process status.
    pub status: RuntimeStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Captured output lines.
    #[serde(default)]
    pub logs: Vec<String>,
}

impl StateEntry {
    /// Returns the listing view of this entry.
    #[must_use]
    pub fn to_runtime_container(&self) -> RuntimeContainer {
        RuntimeContainer {
            handle: self.handle.clone(),
            container_id: self.container_id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            command: self.command.clone(),
            options: self.options.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Everything the local runtime persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    /// Image references that have been pulled.
    #[serde(default)]
    pub images: Vec<String>,
    /// Containers created and not yet removed.
    #[serde(default)]
    pub containers: Vec<StateEntry>,
}

impl RuntimeState {
    /// Finds a container by handle.
    #[must_use]
    pub fn find(&self, handle: &ContainerHandle) -> Option<&StateEntry> {
        self.containers.iter().find(|entry| &entry.handle == handle)
    }

    /// Finds a container by handle, mutably.
    pub fn find_mut(&mut self, handle: &ContainerHandle) -> Option<&mut StateEntry> {
        self.containers.iter_mut().find(|entry| &entry.handle == handle)
    }
}

/// Loads the state index from disk.
///
/// A missing file yields an empty state.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_state(path: &Path) -> RuntimeResult<RuntimeState> {
    tracing::debug!(path = %path.display(), "loading state index");
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RuntimeState::default()),
        Err(e) => {
            return Err(RuntimeError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(RuntimeState::default());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Persists the state index to disk atomically.
///
/// Writes to a uniquely named temporary file in the same directory and
/// renames it over the target, so readers never see a partial index and
/// concurrent writers never share a temporary path.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_state(path: &Path, state: &RuntimeState) -> RuntimeResult<()> {
    tracing::debug!(path = %path.display(), containers = state.containers.len(), "saving state index");
    let parent = ensure_parent(path)?;
    let json = serde_json::to_vec_pretty(state)?;
    let io = |source: std::io::Error| RuntimeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(&parent).map_err(io)?;
    tmp.write_all(&json).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    let _ = tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

/// Loads the index under a shared lock.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken or the index cannot be
/// read.
pub fn read_state(path: &Path) -> RuntimeResult<RuntimeState> {
    let lock = StateLock::shared(path)?;
    let state = load_state(path);
    drop(lock);
    state
}

/// Runs a load-modify-save cycle under an exclusive lock.
///
/// Nothing is written when `f` fails.
///
/// # Errors
///
/// Returns the error from `f`, or an error if the lock cannot be taken or
/// the index cannot be read or written.
pub fn with_state<T>(
    path: &Path,
    f: impl FnOnce(&mut RuntimeState) -> RuntimeResult<T>,
) -> RuntimeResult<T> {
    let lock = StateLock::exclusive(path)?;
    let mut state = load_state(path)?;
    let out = f(&mut state)?;
    save_state(path, &state)?;
    drop(lock);
    Ok(out)
}

/// Advisory lock on the `.lock` sibling of an index file. Released on drop.
#[derive(Debug)]
struct StateLock {
    file: File,
}

impl StateLock {
    fn shared(index: &Path) -> RuntimeResult<Self> {
        let (file, path) = Self::open(index)?;
        FileExt::lock_shared(&file).map_err(|source| RuntimeError::Io { path, source })?;
        Ok(Self { file })
    }

    fn exclusive(index: &Path) -> RuntimeResult<Self> {
        let (file, path) = Self::open(index)?;
        FileExt::lock_exclusive(&file).map_err(|source| RuntimeError::Io { path, source })?;
        Ok(Self { file })
    }

    fn open(index: &Path) -> RuntimeResult<(File, PathBuf)> {
        let _ = ensure_parent(index)?;
        let path = lock_path(index);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| RuntimeError::Io {
                path: path.clone(),
                source,
            })?;
        Ok((file, path))
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(error = %e, "state lock release failed");
        }
    }
}

fn lock_path(index: &Path) -> PathBuf {
    let mut name = index.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".lock");
    index.with_file_name(name)
}

fn ensure_parent(path: &Path) -> RuntimeResult<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|source| RuntimeError::Io {
        path: parent.clone(),
        source,
    })?;
    Ok(parent)
}
