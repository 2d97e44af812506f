//! Unified error types for the NebulaBox workspace.
//!
//! [`NebulaboxError`] is what every lifecycle operation returns. Failures
//! reported by the runtime client arrive as [`RuntimeError`] and are wrapped
//! by the lifecycle manager into the variant naming the failed step.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ContainerId, ContainerState, LifecycleStep};

/// Error reported by a runtime client implementation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime cannot be reached or is not operational.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The image reference could not be resolved.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The runtime does not know the given handle.
    #[error("unknown container handle: {0}")]
    UnknownHandle(String),

    /// The runtime refused the request.
    #[error("{0}")]
    Rejected(String),

    /// The call observed its cancellation signal and gave up.
    #[error("runtime call cancelled")]
    Cancelled,

    /// An I/O operation inside the runtime failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The runtime's own state could not be encoded or decoded.
    #[error("runtime state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NebulaboxError {
    /// No container matches the given ID or name.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier or name that was looked up.
        id: String,
    },

    /// An active container already holds the requested name.
    #[error("container name already in use: {name}")]
    DuplicateName {
        /// The contested name.
        name: String,
    },

    /// The requested state change is not in the legal-transition table.
    #[error("container {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        /// Container whose transition was refused.
        id: ContainerId,
        /// State observed at the time of the request.
        from: ContainerState,
        /// State that was requested.
        to: ContainerState,
    },

    /// The runtime client could not fetch or validate the image.
    #[error("failed to pull image {image}: {source}")]
    ImagePullFailed {
        /// Image reference being pulled.
        image: String,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// Creating or starting the container at the runtime failed.
    #[error("container {id}: {step} step failed: {source}")]
    StartFailed {
        /// Container left in `Failed`.
        id: ContainerId,
        /// Whether the create or the start call failed.
        step: LifecycleStep,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// Stopping the container at the runtime failed; it remains `Stopping`.
    #[error("container {id}: stop step failed: {source}")]
    StopFailed {
        /// Container left in `Stopping`.
        id: ContainerId,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// Deleting the container at the runtime failed; state is unchanged.
    #[error("container {id}: remove step failed: {source}")]
    RemoveFailed {
        /// Container that could not be removed.
        id: ContainerId,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// Fetching logs or listing runtime containers failed.
    #[error("{target}: {step} step failed: {source}")]
    Runtime {
        /// Container ID, or the runtime itself for listing.
        target: String,
        /// Step that failed.
        step: LifecycleStep,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("{} {step} step cancelled: {reason}", cancel_subject(.id))]
    OperationCancelled {
        /// Container affected, if a record had been created.
        id: Option<ContainerId>,
        /// Step in flight when the signal fired.
        step: LifecycleStep,
        /// Why the operation stopped.
        reason: String,
    },

    /// Another lifecycle operation is in flight for the container.
    #[error("container {id}: another operation is in progress")]
    ConcurrentOperationInProgress {
        /// Container that is busy.
        id: ContainerId,
    },

    /// The requested container options are inconsistent.
    #[error("invalid container options: {message}")]
    InvalidOptions {
        /// Which rule was broken.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl NebulaboxError {
    /// Shorthand for a missing container.
    #[must_use]
    pub fn container_not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: target.into(),
        }
    }

    /// Returns whether the error came from a cancellation or deadline.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::OperationCancelled { .. })
    }

    /// Returns the container the error is about, when known.
    #[must_use]
    pub fn container_id(&self) -> Option<&ContainerId> {
        match self {
            Self::InvalidTransition { id, .. }
            | Self::StartFailed { id, .. }
            | Self::StopFailed { id, .. }
            | Self::RemoveFailed { id, .. }
            | Self::ConcurrentOperationInProgress { id } => Some(id),
            Self::OperationCancelled { id, .. } => id.as_ref(),
            _ => None,
        }
    }
}

fn cancel_subject(id: &Option<ContainerId>) -> String {
    id.as_ref()
        .map_or_else(|| "operation".to_string(), |id| format!("container {id}:"))
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NebulaboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_failed_names_container_and_step() {
        let err = NebulaboxError::StartFailed {
            id: ContainerId::new("abc"),
            step: LifecycleStep::Start,
            source: RuntimeError::Rejected("exec format error".into()),
        };
        assert_eq!(
            err.to_string(),
            "container abc: start step failed: exec format error"
        );
        assert_eq!(err.container_id().map(ContainerId::as_str), Some("abc"));
    }

    #[test]
    fn cancelled_message_without_container() {
        let err = NebulaboxError::OperationCancelled {
            id: None,
            step: LifecycleStep::Pull,
            reason: "deadline exceeded".into(),
        };
        assert_eq!(
            err.to_string(),
            "operation pull step cancelled: deadline exceeded"
        );
        assert!(err.is_cancelled());
    }

    #[test]
    fn cancelled_message_with_container() {
        let err = NebulaboxError::OperationCancelled {
            id: Some(ContainerId::new("c1")),
            step: LifecycleStep::Stop,
            reason: "cancelled by caller".into(),
        };
        assert_eq!(
            err.to_string(),
            "container c1: stop step cancelled: cancelled by caller"
        );
    }

    #[test]
    fn invalid_transition_lists_both_states() {
        let err = NebulaboxError::InvalidTransition {
            id: ContainerId::new("web"),
            from: ContainerState::Stopped,
            to: ContainerState::Stopping,
        };
        assert_eq!(
            err.to_string(),
            "container web: cannot transition from stopped to stopping"
        );
    }
}
