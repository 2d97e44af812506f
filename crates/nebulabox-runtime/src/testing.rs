//! In-memory runtime for tests.
//!
//! [`ScriptedRuntime`] behaves like a well-mannered runtime by default and
//! lets a test inject failures per step, hold a step until released, count
//! calls, and push lines into followed log streams.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use nebulabox_common::error::RuntimeError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{
    ContainerHandle, CreateSpec, RuntimeClient, RuntimeContainer, RuntimeResult, RuntimeStatus,
};
use crate::logs::{LogSender, LogStream};

/// Runtime call a script entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// `pull_image`.
    Pull,
    /// `create_container`.
    Create,
    /// `start_container`.
    Start,
    /// `stop_container`.
    Stop,
    /// `remove_container`.
    Remove,
    /// `list_containers`.
    List,
    /// `get_logs`.
    Logs,
}

#[derive(Debug, Default)]
struct Gates {
    held: HashSet<Step>,
    parked: HashMap<Step, usize>,
}

#[derive(Debug)]
struct Entry {
    info: RuntimeContainer,
    lines: Vec<String>,
    followers: Vec<LogSender>,
}

#[derive(Debug, Default)]
struct Script {
    failures: HashMap<Step, String>,
    calls: HashMap<Step, usize>,
    containers: Vec<Entry>,
    next_handle: u64,
}

impl Script {
    fn add(&mut self, spec: CreateSpec<'_>, status: RuntimeStatus) -> ContainerHandle {
        self.next_handle += 1;
        let handle = ContainerHandle::new(format!("scripted-{}", self.next_handle));
        self.containers.push(Entry {
            info: RuntimeContainer {
                handle: handle.clone(),
                container_id: Some(spec.id.clone()),
                name: spec.name.to_string(),
                image: spec.image.to_string(),
                command: spec.command.to_vec(),
                options: spec.options.clone(),
                status,
                created_at: Utc::now(),
            },
            lines: Vec::new(),
            followers: Vec::new(),
        });
        handle
    }
}

/// Scriptable [`RuntimeClient`] double.
#[derive(Debug)]
pub struct ScriptedRuntime {
    script: Mutex<Script>,
    gates: watch::Sender<Gates>,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRuntime {
    /// Creates a runtime with no containers, failures, or holds.
    #[must_use]
    pub fn new() -> Self {
        let (gates, _) = watch::channel(Gates::default());
        Self {
            script: Mutex::new(Script::default()),
            gates,
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every later call of `step` fail with `message`.
    pub fn fail(&self, step: Step, message: impl Into<String>) {
        let _ = self.script().failures.insert(step, message.into());
    }

    /// Clears an injected failure.
    pub fn succeed(&self, step: Step) {
        let _ = self.script().failures.remove(&step);
    }

    /// Makes later calls of `step` block until [`release`](Self::release)
    /// or until their cancellation token fires.
    pub fn hold(&self, step: Step) {
        self.gates.send_modify(|gates| {
            let _ = gates.held.insert(step);
        });
    }

    /// Lets held calls of `step` proceed.
    pub fn release(&self, step: Step) {
        self.gates.send_modify(|gates| {
            let _ = gates.held.remove(&step);
        });
    }

    /// Waits until at least one call of `step` is blocked on its hold.
    pub async fn wait_until_held(&self, step: Step) {
        let mut rx = self.gates.subscribe();
        let _ = rx
            .wait_for(|gates| gates.parked.get(&step).copied().unwrap_or(0) > 0)
            .await;
    }

    /// Returns how many times `step` was called.
    #[must_use]
    pub fn calls(&self, step: Step) -> usize {
        self.script().calls.get(&step).copied().unwrap_or(0)
    }

    /// Returns the runtime status of a container, if it exists.
    #[must_use]
    pub fn status(&self, handle: &ContainerHandle) -> Option<RuntimeStatus> {
        self.script()
            .containers
            .iter()
            .find(|entry| &entry.info.handle == handle)
            .map(|entry| entry.info.status)
    }

    /// Appends a log line and forwards it to every open follower.
    pub async fn push_log(&self, handle: &ContainerHandle, line: impl Into<String>) {
        let line = line.into();
        let followers = {
            let mut script = self.script();
            let Some(entry) = script
                .containers
                .iter_mut()
                .find(|entry| &entry.info.handle == handle)
            else {
                return;
            };
            entry.lines.push(line.clone());
            entry.followers.retain(|tx| !tx.is_closed());
            entry.followers.clone()
        };
        for tx in followers {
            let _ = tx.send(line.clone()).await;
        }
    }

    /// Returns the number of follow streams still open for a container.
    #[must_use]
    pub fn open_followers(&self, handle: &ContainerHandle) -> usize {
        self.script()
            .containers
            .iter()
            .find(|entry| &entry.info.handle == handle)
            .map_or(0, |entry| entry.followers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Counts the call, applies any hold, then any injected failure.
    async fn enter(&self, step: Step, cancel: &CancellationToken) -> RuntimeResult<()> {
        *self.script().calls.entry(step).or_default() += 1;

        let mut rx = self.gates.subscribe();
        if rx.borrow().held.contains(&step) {
            self.gates.send_modify(|gates| *gates.parked.entry(step).or_default() += 1);
            let released = tokio::select! {
                () = cancel.cancelled() => false,
                result = rx.wait_for(|gates| !gates.held.contains(&step)) => result.is_ok(),
            };
            self.gates.send_modify(|gates| {
                if let Some(parked) = gates.parked.get_mut(&step) {
                    *parked = parked.saturating_sub(1);
                }
            });
            if !released {
                return Err(RuntimeError::Cancelled);
            }
        }

        match self.script().failures.get(&step) {
            Some(message) => Err(RuntimeError::Rejected(message.clone())),
            None => Ok(()),
        }
    }

    fn with_entry<T>(
        &self,
        handle: &ContainerHandle,
        f: impl FnOnce(&mut Entry) -> T,
    ) -> RuntimeResult<T> {
        let mut script = self.script();
        script
            .containers
            .iter_mut()
            .find(|entry| &entry.info.handle == handle)
            .map(f)
            .ok_or_else(|| RuntimeError::UnknownHandle(handle.to_string()))
    }
}

#[async_trait]
impl RuntimeClient for ScriptedRuntime {
    async fn pull_image(&self, cancel: &CancellationToken, _image: &str) -> RuntimeResult<()> {
        self.enter(Step::Pull, cancel).await
    }

    async fn create_container(
        &self,
        cancel: &CancellationToken,
        spec: CreateSpec<'_>,
    ) -> RuntimeResult<ContainerHandle> {
        self.enter(Step::Create, cancel).await?;
        Ok(self.script().add(spec, RuntimeStatus::Created))
    }

    async fn start_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        self.enter(Step::Start, cancel).await?;
        self.with_entry(handle, |entry| entry.info.status = RuntimeStatus::Running)
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        self.enter(Step::Stop, cancel).await?;
        self.with_entry(handle, |entry| entry.info.status = RuntimeStatus::Stopped)
    }

    async fn remove_container(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
    ) -> RuntimeResult<()> {
        self.enter(Step::Remove, cancel).await?;
        let mut script = self.script();
        let before = script.containers.len();
        script.containers.retain(|entry| &entry.info.handle != handle);
        if script.containers.len() == before {
            return Err(RuntimeError::UnknownHandle(handle.to_string()));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        _cancel: &CancellationToken,
        spec: CreateSpec<'_>,
        handle: Option<&ContainerHandle>,
    ) -> RuntimeResult<Option<ContainerHandle>> {
        match handle {
            Some(handle) => {
                self.with_entry(handle, |entry| entry.info.status = RuntimeStatus::Failed)?;
                Ok(Some(handle.clone()))
            }
            None => Ok(Some(self.script().add(spec, RuntimeStatus::Failed))),
        }
    }

    async fn list_containers(
        &self,
        cancel: &CancellationToken,
    ) -> RuntimeResult<Vec<RuntimeContainer>> {
        self.enter(Step::List, cancel).await?;
        Ok(self
            .script()
            .containers
            .iter()
            .map(|entry| entry.info.clone())
            .collect())
    }

    async fn get_logs(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        follow: bool,
    ) -> RuntimeResult<LogStream> {
        self.enter(Step::Logs, cancel).await?;
        self.with_entry(handle, |entry| {
            if !follow {
                return LogStream::from_lines(entry.lines.clone());
            }
            let (tx, stream) = LogStream::channel(entry.lines.len().max(16));
            for line in &entry.lines {
                let _ = tx.try_send(line.clone());
            }
            entry.followers.push(tx);
            stream
        })
    }
}
