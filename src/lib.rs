//! Filestore library — file lifecycle service over an external object store.
//!
//! This crate manages the lifecycle of files whose bytes live in an
//! S3-compatible object store while their identity, ownership, and state
//! live in a relational metadata store. Clients never see storage
//! credentials; every operation is granted through a short-lived presigned
//! URL scoped to one object and one method. An asynchronous reconciliation
//! pipeline advances metadata state when the object store confirms that an
//! upload or download actually happened.

use std::sync::Arc;

pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod metadata;
pub mod metrics;
pub mod namespace;
pub mod server;
pub mod sigv4;
pub mod storage;

use crate::config::Config;
use crate::controller::LifecycleController;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration snapshot, assembled once at startup.
    pub config: Config,
    /// Lifecycle controller: the only component allowed to mutate record
    /// state on the request path.
    pub controller: Arc<LifecycleController>,
}
