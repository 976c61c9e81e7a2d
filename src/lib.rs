//! BleepStore library — S3-compatible object storage engine.
//!
//! This crate provides the core components for running an S3-compatible
//! storage server: request handling, SigV4 authentication, metadata
//! management, and pluggable object storage backends.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod server;
pub mod storage;
pub mod xml;

use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::storage::backend::StorageBackend;

/// Shared application state passed to all handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Metadata store (SQLite or in-memory).
    pub metadata: Arc<dyn MetadataStore>,
    /// Object storage backend (local filesystem or in-memory).
    pub storage: Arc<dyn StorageBackend>,
    /// SigV4 signing key and credential cache.
    pub auth_cache: auth::AuthCache,
}
