//! Local runtime backend persisted in a JSON state file.
//!
//! Keeps handles, process status and captured output on disk so separate
//! CLI invocations see the same containers. Every mutation is a
//! load-modify-save cycle under the state file lock, run on the blocking
//! pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use nebulabox_common::config::NebulaboxConfig;
use nebulabox_common::error::RuntimeError;
use tokio_util::sync::CancellationToken;

use crate::client::{
    ContainerHandle, CreateSpec, RuntimeClient, RuntimeContainer, RuntimeResult, RuntimeStatus,
};
use crate::image::ImageReference;
use crate::logs::{LogSender, LogStream};
use crate::state::{RuntimeState, StateEntry, read_state, with_state};

/// Runtime client backed by a state file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    state_path: PathBuf,
    poll_interval: Duration,
    log_buffer: usize,
}

impl LocalRuntime {
    /// Creates a backend using the configured state file.
    #[must_use]
    pub fn new(config: &NebulaboxConfig) -> Self {
        Self {
            state_path: config.state_file_path(),
            poll_interval: config.log_poll_interval(),
            log_buffer: config.log_buffer,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn read(&self) -> RuntimeResult<RuntimeState> {
        let path = self.state_path.clone();
        blocking(move || read_state(&path)).await
    }

    /// Applies `f` to the persisted state and saves the result.
    async fn update<T, F>(&self, f: F) -> RuntimeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RuntimeState) -> RuntimeResult<T> + Send + 'static,
    {
        let path = self.state_path.clone();
        blocking(move || with_state(&path, f)).await
    }
}

async fn blocking<T, F>(f: F) -> RuntimeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RuntimeResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RuntimeError::Unavailable(format!("state task failed: {e}")))?
}

fn stamp(message: &str) -> String {
    format!("{} {message}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn entry_for(spec: CreateSpec<'_>, handle: ContainerHandle, status: RuntimeStatus) -> StateEntry {
    StateEntry {
        handle,
        container_id: Some(spec.id.clone()),
        name: spec.name.to_string(),
        image: spec.image.to_string(),
        command: spec.command.to_vec(),
        options: spec.options.clone(),
        status,
        created_at: Utc::now(),
        logs: vec![stamp(&format!("created from {}", spec.image))],
    }
}

fn new_handle() -> ContainerHandle {
    ContainerHandle::new(uuid::Uuid::new_v4().simple().to_string())
}

fn check(cancel: &CancellationToken) -> RuntimeResult<()> {
    if cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
    }
    Ok(())
}

fn entry_mut<'a>(state: &'a mut RuntimeState, handle: &ContainerHandle) -> RuntimeResult<&'a mut StateEntry> {
    state
        .find_mut(handle)
        .ok_or_else(|| RuntimeError::UnknownHandle(handle.to_string()))
}

#[async_trait]
impl RuntimeClient for LocalRuntime {
    async fn pull_image(&self, cancel: &CancellationToken, image: &str) -> RuntimeResult<()> {
        check(cancel)?;
        let reference = ImageReference::parse(image).map_err(|e| RuntimeError::Rejected(e.to_string()))?;
        let image = image.to_string();
        let recorded = image.clone();
        let fresh = self
            .update(move |state| {
                if state.images.contains(&recorded) {
                    return Ok(false);
                }
                state.images.push(recorded);
                Ok(true)
            })
            .await?;
        tracing::debug!(image = %image, reference = %reference, fresh, "image recorded");
        Ok(())
    }

    async fn create_container(
        &self,
        cancel: &CancellationToken,
        spec: CreateSpec<'_>,
    ) -> RuntimeResult<ContainerHandle> {
        check(cancel)?;
        let handle = new_handle();
        let entry = entry_for(spec, handle.clone(), RuntimeStatus::Created);
        self.update(move |state| {
            if !state.images.contains(&entry.image) {
                return Err(RuntimeError::ImageNotFound(entry.image));
            }
            state.containers.push(entry);
            Ok(())
        })
        .await?;
        Ok(handle)
    }

    async fn start_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        check(cancel)?;
        let handle = handle.clone();
        self.update(move |state| {
            let entry = entry_mut(state, &handle)?;
            if entry.status != RuntimeStatus::Running {
                entry.status = RuntimeStatus::Running;
                let line = if entry.command.is_empty() {
                    stamp(&format!("{} started", entry.name))
                } else {
                    stamp(&format!("{} started: {}", entry.name, entry.command.join(" ")))
                };
                entry.logs.push(line);
            }
            Ok(())
        })
        .await
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        check(cancel)?;
        let handle = handle.clone();
        self.update(move |state| {
            let entry = entry_mut(state, &handle)?;
            if entry.status == RuntimeStatus::Running {
                entry.logs.push(stamp(&format!("{} stopped", entry.name)));
            }
            entry.status = RuntimeStatus::Stopped;
            Ok(())
        })
        .await
    }

    async fn remove_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        check(cancel)?;
        let handle = handle.clone();
        self.update(move |state| {
            let before = state.containers.len();
            state.containers.retain(|entry| entry.handle != handle);
            if state.containers.len() == before {
                return Err(RuntimeError::UnknownHandle(handle.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn mark_failed(
        &self,
        cancel: &CancellationToken,
        spec: CreateSpec<'_>,
        handle: Option<&ContainerHandle>,
    ) -> RuntimeResult<Option<ContainerHandle>> {
        check(cancel)?;
        let note = stamp(&format!("{} failed", spec.name));
        let recorded = match handle {
            Some(handle) => {
                let handle = handle.clone();
                self.update(move |state| {
                    let entry = entry_mut(state, &handle)?;
                    entry.status = RuntimeStatus::Failed;
                    entry.logs.push(note);
                    Ok(handle)
                })
                .await?
            }
            None => {
                let mut entry = entry_for(spec, new_handle(), RuntimeStatus::Failed);
                entry.logs.push(note);
                let handle = entry.handle.clone();
                self.update(move |state| {
                    state.containers.push(entry);
                    Ok(())
                })
                .await?;
                handle
            }
        };
        Ok(Some(recorded))
    }

    async fn list_containers(
        &self,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Vec<RuntimeContainer>> {
        check(cancel)?;
        Ok(self
            .read()
            .await?
            .containers
            .iter()
            .map(StateEntry::to_runtime_container)
            .collect())
    }

    async fn get_logs(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        follow: bool,
    ) -> RuntimeResult<LogStream> {
        check(cancel)?;
        let state = self.read().await?;
        let entry = state
            .find(handle)
            .ok_or_else(|| RuntimeError::UnknownHandle(handle.to_string()))?;
        if !follow || entry.status != RuntimeStatus::Running {
            return Ok(LogStream::from_lines(entry.logs.clone()));
        }

        let (tx, stream) = LogStream::channel(self.log_buffer);
        let _ = tokio::spawn(poll_logs(
            self.clone(),
            handle.clone(),
            entry.logs.clone(),
            tx,
            cancel.clone(),
        ));
        Ok(stream)
    }
}

/// Replays `initial`, then polls the state file for new lines until the
/// container stops running, disappears, or the token fires.
async fn poll_logs(
    runtime: LocalRuntime,
    handle: ContainerHandle,
    initial: Vec<String>,
    tx: LogSender,
    cancel: CancellationToken,
) {
    let mut lines = initial;
    let mut sent = 0;
    let mut running = true;
    loop {
        for line in lines.iter().skip(sent) {
            if !tx.send(line.clone()).await {
                return;
            }
        }
        sent = lines.len();
        if !running {
            return;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tx.closed() => return,
            () = tokio::time::sleep(runtime.poll_interval) => {}
        }

        let state = match runtime.read().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(handle = %handle, error = %e, "log poll failed");
                return;
            }
        };
        let Some(entry) = state.find(&handle) else {
            return;
        };
        lines.clone_from(&entry.logs);
        running = entry.status == RuntimeStatus::Running;
    }
}
