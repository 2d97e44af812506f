//! Container lifecycle core for NebulaBox.
//!
//! The [`LifecycleManager`](manager::LifecycleManager) sits between a command
//! dispatcher and a [`RuntimeClient`](client::RuntimeClient). It owns the
//! [`ContainerStore`](store::ContainerStore), enforces the legal state
//! transitions, and serializes lifecycle operations per container.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod client;
pub mod container;
pub mod event;
pub mod image;
pub mod lock;
pub mod logs;
pub mod manager;
pub mod request;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
