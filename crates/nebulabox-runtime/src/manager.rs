//! Lifecycle manager.
//!
//! Orchestrates the multi-step workflows (pull, create, start, stop,
//! remove) on top of the [`ContainerStore`] and a [`RuntimeClient`].
//!
//! Every runtime call is raced against the caller's cancellation token and
//! the configured deadline. When either fires, the container is left in the
//! intermediate state it had reached (`Starting` or `Stopping`) and the
//! caller gets [`NebulaboxError::OperationCancelled`]. Runtime failures are
//! never retried here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nebulabox_common::config::NebulaboxConfig;
use nebulabox_common::error::{NebulaboxError, Result, RuntimeError};
use nebulabox_common::types::{ContainerId, ContainerOptions, ContainerState, LifecycleStep};
use tokio_util::sync::CancellationToken;

use crate::client::{CreateSpec, RuntimeClient, RuntimeResult};
use crate::container::Container;
use crate::event::{ContainerEvent, EventListener};
use crate::image::ImageReference;
use crate::lock::OperationLocks;
use crate::logs::{LogSender, LogStream};
use crate::request::RunRequest;
use crate::store::ContainerStore;

const REASON_CALLER: &str = "cancelled by caller";
const REASON_DEADLINE: &str = "deadline exceeded";
const REASON_RUNTIME: &str = "cancelled by runtime";

/// Why a guarded runtime call did not produce a value.
#[derive(Debug)]
enum CallFailure {
    Runtime(RuntimeError),
    Cancelled(&'static str),
}

/// Coordinates container lifecycles between callers and a runtime client.
///
/// Construct one per process and share it (for example behind an `Arc`);
/// all methods take `&self`.
pub struct LifecycleManager {
    client: Arc<dyn RuntimeClient>,
    store: Arc<ContainerStore>,
    locks: OperationLocks,
    timeout: Option<Duration>,
    log_buffer: usize,
}

impl LifecycleManager {
    /// Creates a manager with an empty store.
    #[must_use]
    pub fn new(client: Arc<dyn RuntimeClient>, config: &NebulaboxConfig) -> Self {
        Self {
            client,
            store: Arc::new(ContainerStore::new()),
            locks: OperationLocks::new(config.concurrency),
            timeout: config.operation_timeout(),
            log_buffer: config.log_buffer,
        }
    }

    /// Returns the store, for read-only queries.
    #[must_use]
    pub fn store(&self) -> &ContainerStore {
        &self.store
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> EventListener {
        self.store.subscribe()
    }

    /// Runs one runtime call under the caller's token and the deadline.
    ///
    /// The call receives a child token that is cancelled when the call is
    /// abandoned, so the runtime can stop its own work.
    async fn guarded<T, F, Fut>(&self, cancel: &CancellationToken, call: F) -> std::result::Result<T, CallFailure>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = RuntimeResult<T>>,
    {
        let token = cancel.child_token();
        let fut = call(token.clone());
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CallFailure::Cancelled(REASON_CALLER)),
            () = deadline(self.timeout) => Err(CallFailure::Cancelled(REASON_DEADLINE)),
            result = fut => result.map_err(|err| match err {
                RuntimeError::Cancelled => CallFailure::Cancelled(REASON_RUNTIME),
                other => CallFailure::Runtime(other),
            }),
        };
        if matches!(outcome, Err(CallFailure::Cancelled(_))) {
            token.cancel();
        }
        outcome
    }

    /// Pulls an image without creating a container.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::ImagePullFailed`] if the runtime fails,
    /// [`NebulaboxError::OperationCancelled`] on cancellation or deadline,
    /// and [`NebulaboxError::InvalidOptions`] for a blank reference.
    pub async fn pull(&self, image: &str, cancel: &CancellationToken) -> Result<()> {
        require_image(image)?;
        self.pull_image(image, cancel).await
    }

    async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(image, "pulling image");
        let client = &self.client;
        self.guarded(cancel, move |ct| async move { client.pull_image(&ct, image).await })
            .await
            .map_err(|failure| match failure {
                CallFailure::Cancelled(reason) => {
                    tracing::warn!(image, reason, "image pull interrupted");
                    cancelled(None, LifecycleStep::Pull, reason)
                }
                CallFailure::Runtime(source) => {
                    tracing::warn!(image, error = %source, "image pull failed");
                    NebulaboxError::ImagePullFailed {
                        image: image.to_string(),
                        source,
                    }
                }
            })?;
        tracing::info!(image, "image pulled");
        Ok(())
    }

    /// Pulls the image, creates a record, and starts the container.
    ///
    /// No record exists if the pull fails. If create or start fails the
    /// record stays behind in `Failed`. If the call is cancelled after the
    /// record exists, it stays in `Starting`.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::InvalidOptions`],
    /// [`NebulaboxError::DuplicateName`],
    /// [`NebulaboxError::ImagePullFailed`], [`NebulaboxError::StartFailed`]
    /// (carrying the container ID), or
    /// [`NebulaboxError::OperationCancelled`].
    pub async fn run(
        &self,
        image: &str,
        command: Vec<String>,
        options: ContainerOptions,
        cancel: &CancellationToken,
    ) -> Result<Container> {
        require_image(image)?;
        options.validate()?;
        if let Some(name) = &options.name {
            if self.store.get_by_name(name).is_ok() {
                return Err(NebulaboxError::DuplicateName { name: name.clone() });
            }
        }

        self.pull_image(image, cancel).await?;

        let id = ContainerId::generate();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| default_name(image, &id));
        let guard = self.locks.acquire(&id).await?;
        if let Err(err) = self
            .store
            .insert(Container::new(id.clone(), name, image, command, options))
        {
            drop(guard);
            self.locks.forget(&id);
            return Err(err);
        }
        tracing::info!(id = %id, image, "container created");

        let _ = self.store.update_state(&id, ContainerState::Starting)?;
        let result = self.start_at_runtime(&id, cancel).await;
        drop(guard);
        result
    }

    /// Runs a container described by a [`RunRequest`].
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_request(&self, request: RunRequest, cancel: &CancellationToken) -> Result<Container> {
        let (image, command, options) = request.build()?;
        self.run(&image, command, options, cancel).await
    }

    /// Creates the container at the runtime if needed, then starts it.
    /// Expects the record in `Starting` and the operation lock held.
    async fn start_at_runtime(&self, id: &ContainerId, cancel: &CancellationToken) -> Result<Container> {
        let current = self.store.get(id)?;
        let client = &self.client;

        let handle = if let Some(handle) = current.handle.clone() {
            handle
        } else {
            let spec = CreateSpec {
                id,
                image: &current.image,
                name: &current.name,
                command: &current.command,
                options: &current.options,
            };
            match self
                .guarded(cancel, move |ct| async move { client.create_container(&ct, spec).await })
                .await
            {
                Ok(handle) => {
                    self.store.set_handle(id, handle.clone())?;
                    tracing::debug!(id = %id, handle = %handle, "runtime container created");
                    handle
                }
                Err(failure) => {
                    return Err(self.start_failure(id, LifecycleStep::Create, failure, cancel).await);
                }
            }
        };

        let handle = &handle;
        match self
            .guarded(cancel, move |ct| async move { client.start_container(&ct, handle).await })
            .await
        {
            Ok(()) => {
                let running = self.store.update_state(id, ContainerState::Running)?;
                tracing::info!(id = %id, name = %running.name, "container running");
                Ok(running)
            }
            Err(failure) => Err(self.start_failure(id, LifecycleStep::Start, failure, cancel).await),
        }
    }

    async fn start_failure(
        &self,
        id: &ContainerId,
        step: LifecycleStep,
        failure: CallFailure,
        cancel: &CancellationToken,
    ) -> NebulaboxError {
        match failure {
            CallFailure::Cancelled(reason) => {
                tracing::warn!(id = %id, step = %step, reason, "start interrupted, container left starting");
                cancelled(Some(id), step, reason)
            }
            CallFailure::Runtime(source) => {
                tracing::warn!(id = %id, step = %step, error = %source, "start failed");
                let failed = match self.store.update_state(id, ContainerState::Failed) {
                    Ok(failed) => failed,
                    Err(err) => return err,
                };
                self.record_failure(&failed, cancel).await;
                NebulaboxError::StartFailed {
                    id: id.clone(),
                    step,
                    source,
                }
            }
        }
    }

    /// Tells the runtime a container ended up `Failed`, so the failure
    /// survives into later processes. Errors are logged, not returned.
    async fn record_failure(&self, failed: &Container, cancel: &CancellationToken) {
        let client = &self.client;
        let spec = CreateSpec {
            id: &failed.id,
            image: &failed.image,
            name: &failed.name,
            command: &failed.command,
            options: &failed.options,
        };
        let handle = failed.handle.as_ref();
        match self
            .guarded(cancel, move |ct| async move { client.mark_failed(&ct, spec, handle).await })
            .await
        {
            Ok(Some(recorded)) if failed.handle.is_none() => {
                if let Err(err) = self.store.set_handle(&failed.id, recorded) {
                    tracing::warn!(id = %failed.id, error = %err, "failed to keep runtime handle");
                }
            }
            Ok(_) => {}
            Err(CallFailure::Runtime(source)) => {
                tracing::warn!(id = %failed.id, error = %source, "runtime did not record the failure");
            }
            Err(CallFailure::Cancelled(reason)) => {
                tracing::warn!(id = %failed.id, reason, "recording the failure was interrupted");
            }
        }
    }

    /// Starts a created or stopped container, or resumes a start that was
    /// interrupted while `Starting`.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`],
    /// [`NebulaboxError::InvalidTransition`] from any other state,
    /// [`NebulaboxError::StartFailed`], or
    /// [`NebulaboxError::OperationCancelled`].
    pub async fn start(&self, target: &str, cancel: &CancellationToken) -> Result<Container> {
        let id = self.store.resolve(target)?.id;
        let _guard = self.locks.acquire(&id).await?;

        match self.store.get(&id)?.state {
            ContainerState::Created | ContainerState::Stopped => {
                let _ = self.store.update_state(&id, ContainerState::Starting)?;
            }
            ContainerState::Starting => tracing::info!(id = %id, "resuming interrupted start"),
            from => {
                return Err(NebulaboxError::InvalidTransition {
                    id,
                    from,
                    to: ContainerState::Starting,
                });
            }
        }
        self.start_at_runtime(&id, cancel).await
    }

    /// Stops a running container.
    ///
    /// A container left in `Stopping` by an earlier failed or cancelled
    /// stop is accepted and the runtime stop is issued again.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`],
    /// [`NebulaboxError::InvalidTransition`] unless the container is
    /// `Running` or `Stopping`, [`NebulaboxError::StopFailed`] (container
    /// stays `Stopping`), or [`NebulaboxError::OperationCancelled`].
    pub async fn stop(&self, target: &str, cancel: &CancellationToken) -> Result<Container> {
        let id = self.store.resolve(target)?.id;
        let _guard = self.locks.acquire(&id).await?;

        let current = self.store.get(&id)?;
        match current.state {
            ContainerState::Running => {
                let _ = self.store.update_state(&id, ContainerState::Stopping)?;
            }
            ContainerState::Stopping => tracing::info!(id = %id, "resuming interrupted stop"),
            from => {
                return Err(NebulaboxError::InvalidTransition {
                    id,
                    from,
                    to: ContainerState::Stopping,
                });
            }
        }

        if let Some(handle) = current.handle.as_ref() {
            let client = &self.client;
            let outcome = self
                .guarded(cancel, move |ct| async move { client.stop_container(&ct, handle).await })
                .await;
            match outcome {
                Ok(()) => {}
                Err(CallFailure::Cancelled(reason)) => {
                    tracing::warn!(id = %id, reason, "stop interrupted, container left stopping");
                    return Err(cancelled(Some(&id), LifecycleStep::Stop, reason));
                }
                Err(CallFailure::Runtime(source)) => {
                    tracing::warn!(id = %id, error = %source, "stop failed, container left stopping");
                    return Err(NebulaboxError::StopFailed { id, source });
                }
            }
        }

        let stopped = self.store.update_state(&id, ContainerState::Stopped)?;
        tracing::info!(id = %id, name = %stopped.name, "container stopped");
        Ok(stopped)
    }

    /// Removes a stopped or failed container. Its name becomes free.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`],
    /// [`NebulaboxError::InvalidTransition`] from any other state,
    /// [`NebulaboxError::RemoveFailed`] (state unchanged), or
    /// [`NebulaboxError::OperationCancelled`].
    pub async fn remove(&self, target: &str, cancel: &CancellationToken) -> Result<Container> {
        let id = self.store.resolve(target)?.id;
        let _guard = self.locks.acquire(&id).await?;

        let current = self.store.get(&id)?;
        if !current.state.can_transition_to(ContainerState::Removed) {
            return Err(NebulaboxError::InvalidTransition {
                id,
                from: current.state,
                to: ContainerState::Removed,
            });
        }

        if let Some(handle) = current.handle.as_ref() {
            let client = &self.client;
            let outcome = self
                .guarded(cancel, move |ct| async move { client.remove_container(&ct, handle).await })
                .await;
            match outcome {
                Ok(()) => {}
                Err(CallFailure::Cancelled(reason)) => {
                    return Err(cancelled(Some(&id), LifecycleStep::Remove, reason));
                }
                Err(CallFailure::Runtime(source)) => {
                    tracing::warn!(id = %id, error = %source, "remove failed");
                    return Err(NebulaboxError::RemoveFailed { id, source });
                }
            }
        }

        let removed = self.store.update_state(&id, ContainerState::Removed)?;
        tracing::info!(id = %id, name = %removed.name, "container removed");
        Ok(removed)
    }

    /// Drops removed records and their lock entries. Returns how many.
    pub fn prune(&self) -> usize {
        let purged = self.store.purge_removed();
        for id in &purged {
            self.locks.forget(id);
        }
        tracing::info!(count = purged.len(), "pruned removed containers");
        purged.len()
    }

    /// Lists containers, oldest first.
    #[must_use]
    pub fn list(&self, include_stopped: bool) -> Vec<Container> {
        self.store.list(include_stopped)
    }

    /// Returns a snapshot of one container.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`] if nothing matches `target`.
    pub fn inspect(&self, target: &str) -> Result<Container> {
        self.store.resolve(target)
    }

    /// Returns every log line the runtime currently holds for a container.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`], [`NebulaboxError::Runtime`] if
    /// the runtime cannot read the logs, or
    /// [`NebulaboxError::OperationCancelled`].
    pub async fn logs(&self, target: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let container = self.store.resolve(target)?;
        self.snapshot_logs(&container, cancel).await
    }

    async fn snapshot_logs(&self, container: &Container, cancel: &CancellationToken) -> Result<Vec<String>> {
        let Some(handle) = container.handle.as_ref() else {
            return Ok(Vec::new());
        };
        let client = &self.client;
        let stream = self
            .guarded(cancel, move |ct| async move { client.get_logs(&ct, handle, false).await })
            .await
            .map_err(|failure| logs_failure(&container.id, failure))?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(cancelled(Some(&container.id), LifecycleStep::Logs, REASON_CALLER)),
            lines = stream.collect() => Ok(lines),
        }
    }

    /// Follows a container's logs.
    ///
    /// The stream ends when `cancel` fires, when the container reaches
    /// `Stopped`, `Failed`, or `Removed`, or when the runtime ends it. It
    /// does not hold the operation lock, so a concurrent stop proceeds.
    /// A container that is not running yields its current lines and ends.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::NotFound`], [`NebulaboxError::Runtime`] if
    /// the runtime cannot open the logs, or
    /// [`NebulaboxError::OperationCancelled`].
    pub async fn follow_logs(&self, target: &str, cancel: CancellationToken) -> Result<LogStream> {
        let id = self.store.resolve(target)?.id;
        // Subscribe before reading the state so no transition slips between.
        let events = self.store.subscribe();
        let current = self.store.get(&id)?;

        let handle = match current.handle.clone() {
            Some(handle) if !ends_follow(current.state) => handle,
            _ => {
                let lines = self.snapshot_logs(&current, &cancel).await?;
                return Ok(LogStream::from_lines(lines));
            }
        };

        let follow = cancel.child_token();
        let client = &self.client;
        let handle = &handle;
        let upstream = self
            .guarded(&follow, move |ct| async move { client.get_logs(&ct, handle, true).await })
            .await
            .map_err(|failure| logs_failure(&id, failure))?;

        let (tx, stream) = LogStream::channel(self.log_buffer);
        tracing::debug!(id = %id, "following logs");
        let _ = tokio::spawn(forward_logs(
            id,
            upstream,
            tx,
            events,
            Arc::clone(&self.store),
            follow,
        ));
        Ok(stream)
    }

    /// Adopts runtime containers the store does not know yet.
    ///
    /// Containers whose name is held by an active record are skipped.
    /// Returns the number adopted.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::Runtime`] if the runtime cannot list its
    /// containers, or [`NebulaboxError::OperationCancelled`].
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<usize> {
        let client = &self.client;
        let listed = self
            .guarded(cancel, move |ct| async move { client.list_containers(&ct).await })
            .await
            .map_err(|failure| match failure {
                CallFailure::Cancelled(reason) => cancelled(None, LifecycleStep::Reconcile, reason),
                CallFailure::Runtime(source) => NebulaboxError::Runtime {
                    target: "runtime".to_string(),
                    step: LifecycleStep::Reconcile,
                    source,
                },
            })?;

        let known = self.store.handles();
        let mut adopted = 0;
        for existing in listed {
            if known.contains(&existing.handle) {
                continue;
            }
            let id = existing
                .container_id
                .clone()
                .filter(|id| self.store.get(id).is_err())
                .unwrap_or_else(ContainerId::generate);
            let handle = existing.handle.clone();
            match self.store.insert(Container::adopt(id, existing)) {
                Ok(()) => adopted += 1,
                Err(NebulaboxError::DuplicateName { name }) => {
                    tracing::warn!(handle = %handle, name, "runtime container name already in use, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        tracing::info!(adopted, "reconciled with runtime");
        Ok(adopted)
    }
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// States in which no process produces further output.
const fn ends_follow(state: ContainerState) -> bool {
    matches!(state, ContainerState::Stopped) || state.is_terminal()
}

async fn forward_logs(
    id: ContainerId,
    mut upstream: LogStream,
    tx: LogSender,
    mut events: EventListener,
    store: Arc<ContainerStore>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tx.closed() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                if is_follow_end(&id, &event, &store) {
                    while let Some(line) = upstream.try_next() {
                        if !tx.send(line).await {
                            break;
                        }
                    }
                    break;
                }
            }
            line = upstream.next() => {
                let Some(line) = line else { break };
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    sent = tx.send(line) => {
                        if !sent {
                            break;
                        }
                    }
                }
            }
        }
    }
    token.cancel();
    tracing::debug!(id = %id, "log follow ended");
}

/// Checks the store rather than trusting the event alone, since a lagging
/// listener may have skipped the terminal transition.
fn is_follow_end(id: &ContainerId, event: &ContainerEvent, store: &ContainerStore) -> bool {
    if let ContainerEvent::StateChange { container_id, to, .. } = event {
        if container_id == id && ends_follow(*to) {
            return true;
        }
    }
    store.get(id).map_or(true, |container| ends_follow(container.state))
}

fn logs_failure(id: &ContainerId, failure: CallFailure) -> NebulaboxError {
    match failure {
        CallFailure::Cancelled(reason) => cancelled(Some(id), LifecycleStep::Logs, reason),
        CallFailure::Runtime(source) => NebulaboxError::Runtime {
            target: format!("container {id}"),
            step: LifecycleStep::Logs,
            source,
        },
    }
}

fn cancelled(id: Option<&ContainerId>, step: LifecycleStep, reason: &str) -> NebulaboxError {
    NebulaboxError::OperationCancelled {
        id: id.cloned(),
        step,
        reason: reason.to_string(),
    }
}

fn require_image(image: &str) -> Result<()> {
    if image.trim().is_empty() {
        return Err(NebulaboxError::InvalidOptions {
            message: "image reference is required".to_string(),
        });
    }
    Ok(())
}

/// Derives `<image-name>-<short id>`, e.g. `nginx-1a2b3c4d`.
fn default_name(image: &str, id: &ContainerId) -> String {
    let base = ImageReference::parse(image)
        .map(|reference| reference.short_name().to_string())
        .unwrap_or_else(|_| "container".to_string());
    format!("{base}-{}", id.short())
}

#[cfg(test)]
mod tests {
    use nebulabox_common::types::EnvVar;

    use super::*;
    use crate::client::RuntimeStatus;
    use crate::testing::{ScriptedRuntime, Step};

    fn manager(runtime: &Arc<ScriptedRuntime>) -> LifecycleManager {
        LifecycleManager::new(runtime.clone(), &NebulaboxConfig::default())
    }

    fn named(name: &str) -> ContainerOptions {
        ContainerOptions {
            name: Some(name.into()),
            ..ContainerOptions::default()
        }
    }

    #[test]
    fn default_name_uses_image_basename_and_short_id() {
        let id = ContainerId::new("1a2b3c4d5e6f");
        assert_eq!(default_name("docker.io/library/nginx:1.27", &id), "nginx-1a2b3c4d");
        assert_eq!(default_name("NOT VALID", &id), "container-1a2b3c4d");
    }

    #[tokio::test]
    async fn run_reaches_running_with_handle() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let c = mgr
            .run("nginx:latest", Vec::new(), named("web-1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(c.state, ContainerState::Running);
        assert!(c.handle.is_some());
        assert_eq!(runtime.calls(Step::Pull), 1);
        assert_eq!(runtime.calls(Step::Create), 1);
        assert_eq!(runtime.calls(Step::Start), 1);
    }

    #[tokio::test]
    async fn run_without_name_derives_one() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let c = mgr
            .run("redis:7", Vec::new(), ContainerOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(c.name, format!("redis-{}", c.id.short()));
    }

    #[tokio::test]
    async fn pull_failure_creates_no_record() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail(Step::Pull, "manifest unknown");
        let mgr = manager(&runtime);
        let err = mgr
            .run("nginx:latest", Vec::new(), named("web"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NebulaboxError::ImagePullFailed { .. }));
        assert!(mgr.store().is_empty());
    }

    #[tokio::test]
    async fn create_failure_leaves_failed_record() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail(Step::Create, "no space left on device");
        let mgr = manager(&runtime);
        let err = mgr
            .run("nginx:latest", Vec::new(), named("web"), &CancellationToken::new())
            .await
            .unwrap_err();
        let NebulaboxError::StartFailed { id, step, .. } = &err else {
            panic!("expected StartFailed, got {err}");
        };
        assert_eq!(*step, LifecycleStep::Create);
        assert_eq!(mgr.inspect(id.as_str()).unwrap().state, ContainerState::Failed);
        assert_eq!(runtime.calls(Step::Start), 0);
    }

    #[tokio::test]
    async fn invalid_options_rejected_before_pull() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let options = ContainerOptions {
            env: vec![EnvVar::new("A", "1"), EnvVar::new("A", "2")],
            ..ContainerOptions::default()
        };
        let err = mgr
            .run("alpine", Vec::new(), options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NebulaboxError::InvalidOptions { .. }));
        assert_eq!(runtime.calls(Step::Pull), 0);
    }

    #[tokio::test]
    async fn duplicate_name_rejected_before_pull() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let cancel = CancellationToken::new();
        let _ = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap();
        let err = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap_err();
        assert!(matches!(err, NebulaboxError::DuplicateName { .. }));
        assert_eq!(runtime.calls(Step::Pull), 1);
    }

    #[tokio::test]
    async fn restart_from_stopped() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let cancel = CancellationToken::new();
        let _ = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap();
        let _ = mgr.stop("web", &cancel).await.unwrap();

        let restarted = mgr.start("web", &cancel).await.unwrap();
        assert_eq!(restarted.state, ContainerState::Running);
        // The runtime container is reused, not recreated.
        assert_eq!(runtime.calls(Step::Create), 1);
        assert_eq!(runtime.calls(Step::Start), 2);
    }

    #[tokio::test]
    async fn start_on_running_is_invalid() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let cancel = CancellationToken::new();
        let _ = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap();
        assert!(matches!(
            mgr.start("web", &cancel).await,
            Err(NebulaboxError::InvalidTransition { from: ContainerState::Running, .. })
        ));
    }

    #[tokio::test]
    async fn remove_requires_stopped_or_failed() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let cancel = CancellationToken::new();
        let _ = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap();
        assert!(matches!(
            mgr.remove("web", &cancel).await,
            Err(NebulaboxError::InvalidTransition { to: ContainerState::Removed, .. })
        ));

        let _ = mgr.stop("web", &cancel).await.unwrap();
        let removed = mgr.remove("web", &cancel).await.unwrap();
        assert_eq!(removed.state, ContainerState::Removed);
        assert_eq!(runtime.calls(Step::Remove), 1);
        assert_eq!(mgr.prune(), 1);
        assert!(mgr.store().is_empty());
    }

    #[tokio::test]
    async fn remove_failure_keeps_state() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let cancel = CancellationToken::new();
        let _ = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap();
        let _ = mgr.stop("web", &cancel).await.unwrap();

        runtime.fail(Step::Remove, "device busy");
        assert!(matches!(
            mgr.remove("web", &cancel).await,
            Err(NebulaboxError::RemoveFailed { .. })
        ));
        assert_eq!(mgr.inspect("web").unwrap().state, ContainerState::Stopped);
    }

    #[tokio::test]
    async fn deadline_maps_to_cancelled_and_keeps_starting() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.hold(Step::Start);
        let config = NebulaboxConfig {
            operation_timeout_secs: 1,
            ..NebulaboxConfig::default()
        };
        let mgr = LifecycleManager::new(runtime.clone(), &config);

        let err = mgr
            .run("nginx", Vec::new(), named("slow"), &CancellationToken::new())
            .await
            .unwrap_err();
        let NebulaboxError::OperationCancelled { id, step, reason } = &err else {
            panic!("expected OperationCancelled, got {err}");
        };
        assert_eq!(*step, LifecycleStep::Start);
        assert_eq!(reason, REASON_DEADLINE);
        let id = id.clone().expect("record exists");
        assert_eq!(mgr.inspect(id.as_str()).unwrap().state, ContainerState::Starting);
    }

    #[tokio::test]
    async fn pre_cancelled_run_creates_nothing() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let mgr = manager(&runtime);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mgr.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.container_id().is_none());
        assert!(mgr.store().is_empty());
    }

    #[tokio::test]
    async fn start_resumes_from_starting() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.hold(Step::Start);
        let mgr = Arc::new(manager(&runtime));
        let cancel = CancellationToken::new();

        let run = {
            let mgr = Arc::clone(&mgr);
            let cancel = cancel.clone();
            tokio::spawn(async move { mgr.run("nginx", Vec::new(), named("web"), &cancel).await })
        };
        runtime.wait_until_held(Step::Start).await;
        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        let id = err.container_id().cloned().expect("record exists");
        assert_eq!(mgr.inspect(id.as_str()).unwrap().state, ContainerState::Starting);

        runtime.release(Step::Start);
        let resumed = mgr.start(id.as_str(), &CancellationToken::new()).await.unwrap();
        assert_eq!(resumed.state, ContainerState::Running);
        assert_eq!(runtime.calls(Step::Create), 1);
    }

    #[tokio::test]
    async fn reconcile_adopts_unknown_containers_once() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let first = manager(&runtime);
        let cancel = CancellationToken::new();
        let original = first.run("nginx", Vec::new(), named("web"), &cancel).await.unwrap();

        let second = manager(&runtime);
        assert_eq!(second.reconcile(&cancel).await.unwrap(), 1);
        let adopted = second.inspect("web").unwrap();
        assert_eq!(adopted.id, original.id);
        assert_eq!(adopted.state, ContainerState::Running);
        assert_eq!(second.reconcile(&cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_restores_options() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let cancel = CancellationToken::new();
        let options = ContainerOptions {
            ports: vec!["8080:80".parse().unwrap()],
            env: vec!["MODE=prod".parse().unwrap()],
            ..named("web")
        };
        let _ = manager(&runtime)
            .run("nginx", Vec::new(), options.clone(), &cancel)
            .await
            .unwrap();

        let second = manager(&runtime);
        let _ = second.reconcile(&cancel).await.unwrap();
        let adopted = second.inspect("web").unwrap();
        assert_eq!(adopted.options, options);
    }

    #[tokio::test]
    async fn failed_runs_survive_reconcile() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let first = manager(&runtime);
        let cancel = CancellationToken::new();

        runtime.fail(Step::Start, "exec format error");
        let start_failed = first
            .run("nginx", Vec::new(), named("broken-start"), &cancel)
            .await
            .unwrap_err();
        runtime.succeed(Step::Start);
        runtime.fail(Step::Create, "no space left on device");
        let create_failed = first
            .run("redis", Vec::new(), named("broken-create"), &cancel)
            .await
            .unwrap_err();

        let create_id = create_failed.container_id().cloned().unwrap();
        let handle = first.inspect(create_id.as_str()).unwrap().handle.unwrap();
        assert_eq!(runtime.status(&handle), Some(RuntimeStatus::Failed));

        let second = manager(&runtime);
        assert_eq!(second.reconcile(&cancel).await.unwrap(), 2);
        for (err, name) in [(&start_failed, "broken-start"), (&create_failed, "broken-create")] {
            let adopted = second.inspect(name).unwrap();
            assert_eq!(Some(&adopted.id), err.container_id());
            assert_eq!(adopted.state, ContainerState::Failed);
        }
        assert!(second.list(false).is_empty());
        assert_eq!(second.list(true).len(), 2);

        let removed = second.remove("broken-create", &cancel).await.unwrap();
        assert_eq!(removed.state, ContainerState::Removed);
        assert_eq!(runtime.status(&handle), None);
    }
}
