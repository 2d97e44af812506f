//! Container record tracked by the lifecycle core.

use chrono::{DateTime, Utc};
use nebulabox_common::types::{ContainerId, ContainerOptions, ContainerState};
use serde::{Deserialize, Serialize};

use crate::client::{ContainerHandle, RuntimeContainer, RuntimeStatus};

/// A container record with its requested configuration and lifecycle state.
///
/// The [`ContainerStore`](crate::store::ContainerStore) owns every record;
/// everything handed out elsewhere is a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique identifier, immutable.
    pub id: ContainerId,
    /// Display name, unique among non-removed containers.
    pub name: String,
    /// Image reference, immutable.
    pub image: String,
    /// Command to execute inside the container.
    pub command: Vec<String>,
    /// Options requested at creation.
    pub options: ContainerOptions,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Runtime handle, once the runtime has created the container.
    pub handle: Option<ContainerHandle>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last state transition.
    pub updated_at: DateTime<Utc>,
}

impl Container {
    /// Creates a new record in the `Created` state.
    #[must_use]
    pub fn new(
        id: ContainerId,
        name: impl Into<String>,
        image: impl Into<String>,
        command: Vec<String>,
        options: ContainerOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            image: image.into(),
            command,
            options,
            state: ContainerState::Created,
            handle: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a record for a container the runtime already knows about,
    /// under the given ID.
    #[must_use]
    pub fn adopt(id: ContainerId, existing: RuntimeContainer) -> Self {
        let state = match existing.status {
            RuntimeStatus::Created => ContainerState::Created,
            RuntimeStatus::Running => ContainerState::Running,
            RuntimeStatus::Stopped => ContainerState::Stopped,
            RuntimeStatus::Failed => ContainerState::Failed,
        };
        let mut options = existing.options;
        options.name = Some(existing.name.clone());
        Self {
            id,
            name: existing.name,
            image: existing.image,
            command: existing.command,
            options,
            state,
            handle: Some(existing.handle),
            created_at: existing.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Returns whether the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_container_has_created_state() {
        let c = Container::new(
            ContainerId::new("test-1"),
            "web",
            "nginx:latest",
            vec!["nginx".into(), "-g".into(), "daemon off;".into()],
            ContainerOptions::default(),
        );
        assert_eq!(c.state, ContainerState::Created);
        assert!(c.handle.is_none());
        assert!(!c.is_running());
        assert_eq!(c.created_at, c.updated_at);
    }

    fn listed(status: RuntimeStatus, options: ContainerOptions) -> RuntimeContainer {
        RuntimeContainer {
            handle: ContainerHandle::new("h-1"),
            container_id: None,
            name: "db".into(),
            image: "postgres:16".into(),
            command: vec!["postgres".into()],
            options,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn adopt_maps_runtime_status() {
        let c = Container::adopt(
            ContainerId::new("c-1"),
            listed(RuntimeStatus::Running, ContainerOptions::default()),
        );
        assert_eq!(c.state, ContainerState::Running);
        assert_eq!(c.handle, Some(ContainerHandle::new("h-1")));
        assert_eq!(c.options.name.as_deref(), Some("db"));
        assert_eq!(c.command, vec!["postgres"]);

        let failed = Container::adopt(
            ContainerId::new("c-2"),
            listed(RuntimeStatus::Failed, ContainerOptions::default()),
        );
        assert_eq!(failed.state, ContainerState::Failed);
    }

    #[test]
    fn adopt_restores_recorded_options() {
        let options = ContainerOptions {
            ports: vec!["5432:5432".parse().unwrap()],
            env: vec!["POSTGRES_DB=app".parse().unwrap()],
            volumes: vec!["/srv/pg:/var/lib/postgresql/data".parse().unwrap()],
            detach: true,
            ..ContainerOptions::default()
        };
        let c = Container::adopt(
            ContainerId::new("c-1"),
            listed(RuntimeStatus::Stopped, options.clone()),
        );
        assert_eq!(c.options.ports, options.ports);
        assert_eq!(c.options.env, options.env);
        assert_eq!(c.options.volumes, options.volumes);
        assert!(c.options.detach);
        assert_eq!(c.options.name.as_deref(), Some("db"));
    }
}
