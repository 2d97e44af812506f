//! In-memory container store.
//!
//! The store is the only owner of container records. Every operation takes
//! the store lock once, so operations are linearizable with respect to each
//! other. None of them performs I/O or waits on anything but that lock.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use nebulabox_common::constants::EVENT_CHANNEL_CAPACITY;
use nebulabox_common::error::{NebulaboxError, Result};
use nebulabox_common::types::{ContainerId, ContainerState};
use tokio::sync::broadcast;

use crate::client::ContainerHandle;
use crate::container::Container;
use crate::event::{ContainerEvent, EventListener};

#[derive(Debug)]
struct Entry {
    container: Container,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    containers: HashMap<ContainerId, Entry>,
    /// Names of non-removed containers.
    names: HashMap<String, ContainerId>,
    next_seq: u64,
}

/// Concurrency-safe map from container ID to record, with a name index.
#[derive(Debug)]
pub struct ContainerStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<ContainerEvent>,
}

impl ContainerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    // Writers never leave `Inner` half-updated before a panic point, so a
    // poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> EventListener {
        EventListener::new(self.events.subscribe())
    }

    fn publish(&self, event: ContainerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Adds a record.
    ///
    /// The record is stored in whatever state it carries; transitions are
    /// only checked by [`update_state`](Self::update_state).
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::DuplicateName`] if a non-removed container
    /// already holds the name, or [`NebulaboxError::Config`] if the ID is
    /// already registered.
    pub fn insert(&self, container: Container) -> Result<()> {
        let mut inner = self.write();
        if container.state.is_active() && inner.names.contains_key(&container.name) {
            return Err(NebulaboxError::DuplicateName {
                name: container.name,
            });
        }
        if inner.containers.contains_key(&container.id) {
            return Err(NebulaboxError::Config {
                message: format!("container id {} is already registered", container.id),
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        if container.state.is_active() {
            let _ = inner
                .names
                .insert(container.name.clone(), container.id.clone());
        }
        tracing::debug!(id = %container.id, name = %container.name, state = %container.state, "container inserted");
        self.publish(ContainerEvent::Created {
            container_id: container.id.clone(),
            name: container.name.clone(),
            state: container.state,
        });
        let _ = inner
            .containers
            .insert(container.id.clone(), Entry { container, seq });
        Ok(())
    }

    /// Returns a snapshot of the record with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`] if no record has the ID.
    pub fn get(&self, id: &ContainerId) -> Result<Container> {
        self.read()
            .containers
            .get(id)
            .map(|entry| entry.container.clone())
            .ok_or_else(|| NebulaboxError::container_not_found(id.as_str()))
    }

    /// Returns a snapshot of the non-removed record holding `name`.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`] if no non-removed record holds
    /// the name.
    pub fn get_by_name(&self, name: &str) -> Result<Container> {
        let inner = self.read();
        inner
            .names
            .get(name)
            .and_then(|id| inner.containers.get(id))
            .map(|entry| entry.container.clone())
            .ok_or_else(|| NebulaboxError::container_not_found(name))
    }

    /// Resolves a user-supplied reference: exact ID, then name, then a
    /// unique ID prefix.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`] if nothing matches and
    /// [`NebulaboxError::Config`] if a prefix matches several records.
    pub fn resolve(&self, target: &str) -> Result<Container> {
        let inner = self.read();
        if let Some(entry) = inner.containers.get(&ContainerId::new(target)) {
            return Ok(entry.container.clone());
        }
        if let Some(entry) = inner.names.get(target).and_then(|id| inner.containers.get(id)) {
            return Ok(entry.container.clone());
        }
        if target.is_empty() {
            return Err(NebulaboxError::container_not_found(target));
        }

        let mut matches = inner
            .containers
            .values()
            .filter(|entry| entry.container.id.as_str().starts_with(target));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(entry.container.clone()),
            (Some(_), Some(_)) => Err(NebulaboxError::Config {
                message: format!("container reference '{target}' is ambiguous"),
            }),
            _ => Err(NebulaboxError::container_not_found(target)),
        }
    }

    /// Returns snapshots ordered by creation time, oldest first.
    ///
    /// Stopped, failed, and removed containers are only included when
    /// `include_stopped` is set.
    #[must_use]
    pub fn list(&self, include_stopped: bool) -> Vec<Container> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner
            .containers
            .values()
            .filter(|entry| include_stopped || entry.container.state.is_listed_by_default())
            .collect();
        entries.sort_by(|a, b| {
            a.container
                .created_at
                .cmp(&b.container.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.container.clone()).collect()
    }

    /// Atomically moves a container to `new_state` and returns the updated
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`] if the record is gone and
    /// [`NebulaboxError::InvalidTransition`] if `new_state` is not reachable
    /// from the current state. The record is unchanged on error.
    pub fn update_state(&self, id: &ContainerId, new_state: ContainerState) -> Result<Container> {
        let mut inner = self.write();
        let entry = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| NebulaboxError::container_not_found(id.as_str()))?;

        let from = entry.container.state;
        if !from.can_transition_to(new_state) {
            return Err(NebulaboxError::InvalidTransition {
                id: id.clone(),
                from,
                to: new_state,
            });
        }
        entry.container.state = new_state;
        entry.container.updated_at = Utc::now();
        let snapshot = entry.container.clone();

        if !new_state.is_active() && inner.names.get(&snapshot.name) == Some(id) {
            let _ = inner.names.remove(&snapshot.name);
        }
        tracing::debug!(id = %id, from = %from, to = %new_state, "state updated");
        self.publish(ContainerEvent::StateChange {
            container_id: id.clone(),
            from,
            to: new_state,
        });
        Ok(snapshot)
    }

    /// Records the runtime handle of a container.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`] if the record is gone.
    pub fn set_handle(&self, id: &ContainerId, handle: ContainerHandle) -> Result<()> {
        let mut inner = self.write();
        let entry = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| NebulaboxError::container_not_found(id.as_str()))?;
        entry.container.handle = Some(handle);
        Ok(())
    }

    /// Returns the runtime handles of every record.
    #[must_use]
    pub fn handles(&self) -> HashSet<ContainerHandle> {
        self.read()
            .containers
            .values()
            .filter_map(|entry| entry.container.handle.clone())
            .collect()
    }

    /// Drops every record in the `Removed` state and returns their IDs.
    pub fn purge_removed(&self) -> Vec<ContainerId> {
        let mut inner = self.write();
        let removed: Vec<ContainerId> = inner
            .containers
            .values()
            .filter(|entry| entry.container.state == ContainerState::Removed)
            .map(|entry| entry.container.id.clone())
            .collect();
        for id in &removed {
            let _ = inner.containers.remove(id);
            self.publish(ContainerEvent::Pruned {
                container_id: id.clone(),
            });
        }
        removed
    }

    /// Returns the number of records, removed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().containers.len()
    }

    /// Returns whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().containers.is_empty()
    }
}

impl Default for ContainerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nebulabox_common::types::ContainerOptions;

    use super::*;

    fn record(id: &str, name: &str) -> Container {
        Container::new(
            ContainerId::new(id),
            name,
            "nginx:latest",
            Vec::new(),
            ContainerOptions::default(),
        )
    }

    fn drive(store: &ContainerStore, id: &ContainerId, states: &[ContainerState]) {
        for state in states {
            let _ = store.update_state(id, *state).expect("legal transition");
        }
    }

    #[test]
    fn insert_then_get_by_id_and_name() {
        let store = ContainerStore::new();
        store.insert(record("c1", "web-1")).unwrap();
        assert_eq!(store.get(&ContainerId::new("c1")).unwrap().name, "web-1");
        assert_eq!(store.get_by_name("web-1").unwrap().id.as_str(), "c1");
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = ContainerStore::new();
        assert!(matches!(
            store.get(&ContainerId::new("nope")),
            Err(NebulaboxError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_by_name("nope"),
            Err(NebulaboxError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_active_name_is_rejected() {
        let store = ContainerStore::new();
        store.insert(record("c1", "web")).unwrap();
        assert!(matches!(
            store.insert(record("c2", "web")),
            Err(NebulaboxError::DuplicateName { name }) if name == "web"
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn name_is_reusable_after_removal() {
        use ContainerState::{Removed, Running, Starting, Stopped, Stopping};
        let store = ContainerStore::new();
        let first = ContainerId::new("c1");
        store.insert(record("c1", "web")).unwrap();
        drive(&store, &first, &[Starting, Running, Stopping, Stopped, Removed]);

        store.insert(record("c2", "web")).unwrap();
        assert_eq!(store.get_by_name("web").unwrap().id.as_str(), "c2");
        // The removed record stays queryable by ID until pruned.
        assert_eq!(store.get(&first).unwrap().state, Removed);
    }

    #[test]
    fn get_by_name_ignores_removed_records() {
        use ContainerState::{Failed, Removed, Starting};
        let store = ContainerStore::new();
        let id = ContainerId::new("c1");
        store.insert(record("c1", "job")).unwrap();
        drive(&store, &id, &[Starting, Failed, Removed]);
        assert!(store.get_by_name("job").is_err());
    }

    #[test]
    fn illegal_transition_leaves_state_unchanged() {
        use ContainerState::{Running, Starting, Stopped, Stopping};
        let store = ContainerStore::new();
        let id = ContainerId::new("c1");
        store.insert(record("c1", "web")).unwrap();
        drive(&store, &id, &[Starting, Running, Stopping, Stopped]);

        let err = store.update_state(&id, Running).unwrap_err();
        assert!(matches!(
            err,
            NebulaboxError::InvalidTransition { from: Stopped, to: Running, .. }
        ));
        assert_eq!(store.get(&id).unwrap().state, Stopped);
    }

    #[test]
    fn update_state_on_missing_record_is_not_found() {
        let store = ContainerStore::new();
        assert!(matches!(
            store.update_state(&ContainerId::new("ghost"), ContainerState::Starting),
            Err(NebulaboxError::NotFound { .. })
        ));
    }

    #[test]
    fn list_orders_by_creation_and_filters_stopped() {
        use ContainerState::{Failed, Running, Starting, Stopped, Stopping};
        let store = ContainerStore::new();
        for (id, name) in [("a", "first"), ("b", "second"), ("c", "third")] {
            store.insert(record(id, name)).unwrap();
        }
        drive(&store, &ContainerId::new("a"), &[Starting, Running]);
        drive(&store, &ContainerId::new("b"), &[Starting, Running, Stopping, Stopped]);
        drive(&store, &ContainerId::new("c"), &[Starting, Failed]);

        let active: Vec<_> = store.list(false).into_iter().map(|c| c.name).collect();
        assert_eq!(active, vec!["first"]);

        let all: Vec<_> = store.list(true).into_iter().map(|c| c.name).collect();
        assert_eq!(all, vec!["first", "second", "third"]);
    }

    #[test]
    fn resolve_prefers_id_then_name_then_prefix() {
        let store = ContainerStore::new();
        store.insert(record("abc123", "web")).unwrap();
        store.insert(record("abd456", "abc123x")).unwrap();

        assert_eq!(store.resolve("abc123").unwrap().name, "web");
        assert_eq!(store.resolve("abc123x").unwrap().id.as_str(), "abd456");
        assert_eq!(store.resolve("abd").unwrap().name, "abc123x");
        assert!(matches!(store.resolve("ab"), Err(NebulaboxError::Config { .. })));
        assert!(matches!(store.resolve("zzz"), Err(NebulaboxError::NotFound { .. })));
    }

    #[test]
    fn purge_drops_only_removed_records() {
        use ContainerState::{Failed, Removed, Starting};
        let store = ContainerStore::new();
        store.insert(record("keep", "keep")).unwrap();
        store.insert(record("gone", "gone")).unwrap();
        drive(&store, &ContainerId::new("gone"), &[Starting, Failed, Removed]);

        let purged = store.purge_removed();
        assert_eq!(purged, vec![ContainerId::new("gone")]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&ContainerId::new("gone")).is_err());
    }

    #[test]
    fn set_handle_is_visible_in_snapshots() {
        let store = ContainerStore::new();
        let id = ContainerId::new("c1");
        store.insert(record("c1", "web")).unwrap();
        store.set_handle(&id, ContainerHandle::new("h-9")).unwrap();
        assert_eq!(store.get(&id).unwrap().handle, Some(ContainerHandle::new("h-9")));
        assert!(store.handles().contains(&ContainerHandle::new("h-9")));
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let store = ContainerStore::new();
        let mut events = store.subscribe();
        store.insert(record("c1", "web")).unwrap();
        let _ = store
            .update_state(&ContainerId::new("c1"), ContainerState::Starting)
            .unwrap();

        assert!(matches!(events.next().await, Some(ContainerEvent::Created { .. })));
        assert_eq!(
            events.next().await,
            Some(ContainerEvent::StateChange {
                container_id: ContainerId::new("c1"),
                from: ContainerState::Created,
                to: ContainerState::Starting,
            })
        );
    }

    #[test]
    fn concurrent_transitions_on_one_id_have_a_single_winner() {
        let store = Arc::new(ContainerStore::new());
        let id = ContainerId::new("c1");
        store.insert(record("c1", "web")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || store.update_state(&id, ContainerState::Starting).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.get(&id).unwrap().state, ContainerState::Starting);
    }
}
