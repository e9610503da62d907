//! Coordination store: TTL leases, keys, and prefix watches
//!
//! Registrars and resolvers only depend on the [`CoordinationStore`] trait. Two
//! implementations ship with the crate:
//! - [`MemoryStore`]: in-process leased KV map, also the backend of the store server
//! - [`GrpcStore`]: client for a remote store served by [`StoreServer`]

pub mod client;
pub mod grpc;
pub mod http;
pub mod memory;
pub mod server;

use crate::common::Result;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use client::GrpcStore;
pub use memory::MemoryStore;
pub use server::StoreServer;

/// Store-issued lease handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// One stored pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Put,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Put => write!(f, "put"),
            EventType::Delete => write!(f, "delete"),
        }
    }
}

/// One change under a watched prefix; `value` is `None` for deletes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventType,
    pub key: String,
    pub value: Option<String>,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: EventType::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: EventType::Delete,
            key: key.into(),
            value: None,
        }
    }
}

/// Events committed together, delivered together
pub type WatchBatch = Vec<WatchEvent>;

/// Unbounded stream of batches. An `Err` item or the end of the stream means the
/// watch is over; callers must open a new one to keep observing.
pub type WatchStream = BoxStream<'static, Result<WatchBatch>>;

/// Primitives a registrar and resolver need from a coordination store
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Grant a lease that expires after `ttl_secs` without keepalive
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId>;

    /// Write a key, optionally attached to a lease
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()>;

    /// Point read
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// All pairs whose key starts with `prefix`, ordered by key
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Delete a key; `false` if it did not exist
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Refresh a lease once
    async fn keep_alive_once(&self, lease: LeaseId) -> Result<()>;

    /// Subscribe to changes under `prefix`.
    ///
    /// The subscription is active once this returns, before the stream is polled.
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;
}
