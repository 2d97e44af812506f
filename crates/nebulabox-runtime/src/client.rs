//! Runtime client interface.
//!
//! The lifecycle core never touches processes, images, or namespaces
//! itself. Everything that does goes through [`RuntimeClient`]. Every call
//! receives a [`CancellationToken`]; implementations should give up and
//! return [`RuntimeError::Cancelled`] once it fires.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nebulabox_common::error::RuntimeError;
use nebulabox_common::types::{ContainerId, ContainerOptions};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::logs::LogStream;

/// Result alias for runtime client calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Opaque identifier the runtime assigns to a container it created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Wraps a runtime-assigned identifier.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process status as the runtime reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    /// Created but never started.
    Created,
    /// Process is running.
    Running,
    /// Process has exited or was stopped.
    Stopped,
    /// The lifecycle core gave up on it after a failed create or start.
    Failed,
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// A container as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContainer {
    /// Runtime handle.
    pub handle: ContainerHandle,
    /// Lifecycle ID recorded at creation, if the runtime kept it.
    #[serde(default)]
    pub container_id: Option<ContainerId>,
    /// Name the container was created with.
    pub name: String,
    /// Image reference it was created from.
    pub image: String,
    /// Command it runs.
    #[serde(default)]
    pub command: Vec<String>,
    /// Options it was created with.
    #[serde(default)]
    pub options: ContainerOptions,
    /// Current status.
    pub status: RuntimeStatus,
    /// When the runtime created it.
    pub created_at: DateTime<Utc>,
}

/// Everything the runtime needs to create a container.
#[derive(Debug, Clone, Copy)]
pub struct CreateSpec<'a> {
    /// Lifecycle ID, for runtimes that can label containers with it.
    pub id: &'a ContainerId,
    /// Image reference, already pulled.
    pub image: &'a str,
    /// Container name.
    pub name: &'a str,
    /// Command override; empty means the image default.
    pub command: &'a [String],
    /// Pass-through options.
    pub options: &'a ContainerOptions,
}

/// Narrow interface to an external container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Fetches or validates an image so containers can be created from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be resolved or fetched.
    async fn pull_image(&self, cancel: &CancellationToken, image: &str) -> RuntimeResult<()>;

    /// Creates a container and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime refuses the container.
    async fn create_container(
        &self,
        cancel: &CancellationToken,
        spec: CreateSpec<'_>,
    ) -> RuntimeResult<ContainerHandle>;

    /// Starts a created or stopped container.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    async fn start_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()>;

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be stopped.
    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()>;

    /// Deletes a container. Runtimes without a delete step keep the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot delete the container.
    async fn remove_container(
        &self,
        _cancel: &CancellationToken,
        _handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        Ok(())
    }

    /// Records that a create or start failed, so a later
    /// [`list_containers`](Self::list_containers) reports the container as
    /// [`RuntimeStatus::Failed`].
    ///
    /// `handle` is `None` when the create step itself failed. Returns the
    /// handle the failure is recorded under, if any. Runtimes without
    /// persistent state keep the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the failure cannot be recorded.
    async fn mark_failed(
        &self,
        _cancel: &CancellationToken,
        _spec: CreateSpec<'_>,
        handle: Option<&ContainerHandle>,
    ) -> RuntimeResult<Option<ContainerHandle>> {
        Ok(handle.cloned())
    }

    /// Lists the containers the runtime knows, for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    async fn list_containers(
        &self,
        _cancel: &CancellationToken,
    ) -> RuntimeResult<Vec<RuntimeContainer>> {
        Ok(Vec::new())
    }

    /// Returns the container's log lines.
    ///
    /// Without `follow` the stream is complete when returned. With `follow`
    /// it keeps yielding new lines until the runtime ends it or `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs cannot be read.
    async fn get_logs(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        follow: bool,
    ) -> RuntimeResult<LogStream>;
}
