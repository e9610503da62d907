//! Shared helpers for minilb integration tests

#![allow(dead_code)]

use minilb::common::{Error, Result};
use minilb::store::{CoordinationStore, KeyValue, LeaseId, MemoryStore, WatchBatch, WatchStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// MemoryStore wrapper with injectable failures
#[derive(Default)]
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    /// Every call fails while set
    unavailable: AtomicBool,
    /// Prefix scans fail while set
    failing_scans: AtomicBool,
    /// Number of upcoming keepalives to fail
    failing_keepalives: AtomicUsize,
    grants: AtomicUsize,
    /// When set, the next watch replays these batches and then ends
    watch_script: Mutex<Option<Vec<WatchBatch>>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_scans(&self, failing: bool) {
        self.failing_scans.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next_keepalives(&self, n: usize) {
        self.failing_keepalives.store(n, Ordering::SeqCst);
    }

    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    pub fn script_watch(&self, batches: Vec<WatchBatch>) {
        *self.watch_script.lock().unwrap() = Some(batches);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CoordinationStore for FlakyStore {
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId> {
        self.check()?;
        self.grants.fetch_add(1, Ordering::SeqCst);
        self.inner.grant(ttl_secs).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        self.check()?;
        self.inner.put(key, value, lease).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.check()?;
        if self.failing_scans.load(Ordering::SeqCst) {
            return Err(Error::Store("scan unavailable".into()));
        }
        self.inner.get_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<()> {
        self.check()?;
        let failing = self
            .failing_keepalives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Timeout("keepalive".into()));
        }
        self.inner.keep_alive_once(lease).await
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        self.check()?;
        let script = self.watch_script.lock().unwrap().take();
        match script {
            Some(batches) => Ok(Box::pin(futures_util::stream::iter(
                batches.into_iter().map(Ok::<WatchBatch, Error>),
            ))),
            None => self.inner.watch_prefix(prefix).await,
        }
    }
}
