//! Runtime client backends.

pub mod local;

use std::sync::Arc;

use nebulabox_common::config::NebulaboxConfig;

use crate::client::RuntimeClient;

pub use local::LocalRuntime;

/// Creates the default backend for the given configuration.
#[must_use]
pub fn open_backend(config: &NebulaboxConfig) -> Arc<dyn RuntimeClient> {
    Arc::new(LocalRuntime::new(config))
}
