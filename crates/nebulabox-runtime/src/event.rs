//! Container lifecycle events.
//!
//! The store publishes an event for every record it inserts, every state
//! transition it commits, and every record it prunes.

use nebulabox_common::types::{ContainerId, ContainerState};
use tokio::sync::broadcast;

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A record was added to the store.
    Created {
        /// New container.
        container_id: ContainerId,
        /// Its display name.
        name: String,
        /// State it was inserted with.
        state: ContainerState,
    },
    /// A container changed state.
    StateChange {
        /// Container that changed.
        container_id: ContainerId,
        /// Previous state.
        from: ContainerState,
        /// New state.
        to: ContainerState,
    },
    /// A removed record was garbage collected.
    Pruned {
        /// Container that was dropped.
        container_id: ContainerId,
    },
}

impl ContainerEvent {
    /// Returns the container the event is about.
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        match self {
            Self::Created { container_id, .. }
            | Self::StateChange { container_id, .. }
            | Self::Pruned { container_id } => container_id,
        }
    }
}

/// Listens for container lifecycle events.
#[derive(Debug)]
pub struct EventListener {
    rx: broadcast::Receiver<ContainerEvent>,
}

impl EventListener {
    /// Wraps a broadcast receiver.
    #[must_use]
    pub const fn new(rx: broadcast::Receiver<ContainerEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` when the publisher is gone. If the listener fell
    /// behind, the missed events are skipped and the next one is returned.
    pub async fn next(&mut self) -> Option<ContainerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
