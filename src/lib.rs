//! Leasehold library: lease management for blob-storage containers and
//! blobs.
//!
//! The core is the [`lease::LeaseManager`], which runs every lease
//! operation through the authorization gate in [`auth`], a pure state
//! machine and a compare-and-swap commit against a pluggable
//! [`storage::backend::StorageBackend`].  The same manager backs the
//! HTTP server in [`server`] and the command-line front ends in
//! [`executor`].

use std::sync::Arc;

pub mod auth;
pub mod clock;
pub mod config;
pub mod errors;
pub mod executor;
pub mod handlers;
pub mod lease;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod xml;

use crate::auth::TokenRegistry;
use crate::config::Config;
use crate::lease::LeaseManager;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Lease manager; also owns the storage backend and clock.
    pub leases: Arc<LeaseManager>,
    /// Delegation tokens resolved from the `sig` query parameter.
    pub tokens: TokenRegistry,
}
