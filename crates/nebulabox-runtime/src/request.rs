//! Fluent API for describing a container to run.

use nebulabox_common::error::{NebulaboxError, Result};
use nebulabox_common::types::{ContainerOptions, EnvVar, PortMapping, VolumeMount};

/// Builder for the arguments of
/// [`LifecycleManager::run`](crate::manager::LifecycleManager::run).
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    image: String,
    command: Vec<String>,
    options: ContainerOptions,
}

impl RunRequest {
    /// Starts a request for the given image reference.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Sets the command to run inside the container.
    #[must_use]
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Publishes a port.
    #[must_use]
    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.options.ports.push(PortMapping { host, container });
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.push(EnvVar::new(key, value));
        self
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn volume(mut self, host: impl Into<std::path::PathBuf>, container: impl Into<std::path::PathBuf>) -> Self {
        self.options.volumes.push(VolumeMount {
            host: host.into(),
            container: container.into(),
        });
        self
    }

    /// Sets the detach flag.
    #[must_use]
    pub const fn detach(mut self, detach: bool) -> Self {
        self.options.detach = detach;
        self
    }

    /// Replaces all options at once.
    #[must_use]
    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the request and returns its parts.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::InvalidOptions`] if the image is blank or
    /// the options break a uniqueness rule.
    pub fn build(self) -> Result<(String, Vec<String>, ContainerOptions)> {
        if self.image.trim().is_empty() {
            return Err(NebulaboxError::InvalidOptions {
                message: "image reference is required".to_string(),
            });
        }
        self.options.validate()?;
        Ok((self.image, self.command, self.options))
    }
}
