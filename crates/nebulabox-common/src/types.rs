//! Domain primitive types used across the NebulaBox workspace.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::SHORT_ID_LENGTH;
use crate::error::{NebulaboxError, Result};

/// Unique identifier for a container record.
///
/// Assigned by the lifecycle core at creation and never reused for the
/// lifetime of the process. Distinct from the runtime client's handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID (32 lowercase hex characters).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the abbreviated form used in listings and default names.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(SHORT_ID_LENGTH)
            .map_or(self.0.as_str(), |(idx, _)| &self.0[..idx])
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container.
///
/// ```text
/// Created -> Starting -> Running -> Stopping -> Stopped -> Removed
///               |                                  |
///               +--> Failed -> Removed             +--> Starting (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Record exists; the container has never been started.
    Created,
    /// A start is in flight (or was interrupted mid-flight).
    Starting,
    /// The runtime reports the container as running.
    Running,
    /// A stop is in flight (or was interrupted mid-flight).
    Stopping,
    /// The container has been stopped and may be restarted or removed.
    Stopped,
    /// Start failed. Terminal apart from removal.
    Failed,
    /// The container was removed. Terminal.
    Removed,
}

impl ContainerState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Starting,
        Self::Running,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
        Self::Removed,
    ];

    /// Returns whether `next` is reachable from `self` in one legal step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created | Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running | Self::Failed)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
                | (Self::Stopped | Self::Failed, Self::Removed)
        )
    }

    /// Returns whether the state only allows removal or garbage collection.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Removed)
    }

    /// Returns whether the record still holds its name.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Removed)
    }

    /// Returns whether a default listing (without `--all`) shows the state.
    #[must_use]
    pub const fn is_listed_by_default(self) -> bool {
        !matches!(self, Self::Stopped | Self::Failed | Self::Removed)
    }

    /// Returns the lowercase name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = NebulaboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| NebulaboxError::Config {
                message: format!("unknown container state: {s}"),
            })
    }
}

/// A step of a lifecycle workflow, used to name what failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStep {
    /// Fetching or validating the image.
    Pull,
    /// Creating the container at the runtime.
    Create,
    /// Starting the container process.
    Start,
    /// Stopping the container process.
    Stop,
    /// Deleting the container at the runtime.
    Remove,
    /// Reading container logs.
    Logs,
    /// Listing runtime containers for reconciliation.
    Reconcile,
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pull => "pull",
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Logs => "logs",
            Self::Reconcile => "reconcile",
        })
    }
}

/// A published port: `host:container`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = NebulaboxError;

    /// Parses `HOST:CONTAINER`, or a bare `PORT` publishing the same number.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| NebulaboxError::InvalidOptions {
                    message: format!("invalid port in mapping '{s}'"),
                })
        };
        match s.split_once(':') {
            Some((host, container)) => Ok(Self {
                host: parse(host)?,
                container: parse(container)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(Self {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// An environment variable passed through to the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
}

impl EnvVar {
    /// Creates an environment variable.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for EnvVar {
    type Err = NebulaboxError;

    /// Parses `KEY=VALUE`. A bare `KEY` gets an empty value.
    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s.split_once('=').unwrap_or((s, ""));
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(NebulaboxError::InvalidOptions {
                message: format!("invalid environment variable '{s}'"),
            });
        }
        Ok(Self::new(key, value))
    }
}

/// A bind mount: `host_path:container_path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Path on the host.
    pub host: PathBuf,
    /// Path inside the container.
    pub container: PathBuf,
}

impl FromStr for VolumeMount {
    type Err = NebulaboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((host, container)) if !host.is_empty() && !container.is_empty() => Ok(Self {
                host: PathBuf::from(host),
                container: PathBuf::from(container),
            }),
            _ => Err(NebulaboxError::InvalidOptions {
                message: format!("invalid volume '{s}', expected HOST:CONTAINER"),
            }),
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// Options requested for a new container.
///
/// Values pass through to the runtime client untouched; the core only
/// checks them for uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    /// Requested display name. `None` lets the manager derive one.
    pub name: Option<String>,
    /// Published ports.
    pub ports: Vec<PortMapping>,
    /// Environment variables.
    pub env: Vec<EnvVar>,
    /// Bind mounts.
    pub volumes: Vec<VolumeMount>,
    /// Whether the caller detaches after start.
    pub detach: bool,
}

impl ContainerOptions {
    /// Checks the uniqueness rules on every option set.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::InvalidOptions`] for an empty or blank name,
    /// a container-side port published twice, a repeated environment key,
    /// or a repeated volume pair.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(NebulaboxError::InvalidOptions {
                    message: format!("invalid container name '{name}'"),
                });
            }
        }

        let mut ports = HashSet::new();
        for mapping in &self.ports {
            if !ports.insert(mapping.container) {
                return Err(NebulaboxError::InvalidOptions {
                    message: format!("container port {} is published twice", mapping.container),
                });
            }
        }

        let mut keys = HashSet::new();
        for var in &self.env {
            if !keys.insert(var.key.as_str()) {
                return Err(NebulaboxError::InvalidOptions {
                    message: format!("environment variable {} is set twice", var.key),
                });
            }
        }

        let mut volumes = HashSet::new();
        for volume in &self.volumes {
            if !volumes.insert(volume) {
                return Err(NebulaboxError::InvalidOptions {
                    message: format!("volume {volume} is mounted twice"),
                });
            }
        }
        Ok(())
    }
}
