//! In-memory leased key-value store
//!
//! Keys may be attached to a lease. A lease that is not kept alive within its TTL
//! expires and takes its keys with it, producing DELETE events for watchers. Expiry
//! runs lazily at the start of every operation and periodically from
//! [`MemoryStore::spawn_sweeper`], so idle stores still notify watchers.
//!
//! Every mutation is published on a broadcast channel while the state lock is held,
//! which gives all watchers the same total order of batches.

use crate::common::{Error, Result, MAX_LEASE_TTL_SECS};
use crate::store::{
    CoordinationStore, KeyValue, LeaseId, WatchBatch, WatchEvent, WatchStream,
};
use async_stream::stream;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

const DEFAULT_WATCH_BUFFER: usize = 1024;

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Default)]
struct Inner {
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: i64,
}

/// Key and lease counts, for the admin API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub keys: usize,
    pub leases: usize,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<Arc<WatchBatch>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_watch_buffer(DEFAULT_WATCH_BUFFER)
    }

    /// `buffer` batches may queue per watcher before it is cut off as lagging
    pub fn with_watch_buffer(buffer: usize) -> Self {
        let (events, _rx) = broadcast::channel(buffer.max(1));
        Self {
            inner: Mutex::new(Inner {
                next_lease: 1,
                ..Default::default()
            }),
            events,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("store lock poisoned".into()))
    }

    /// Publish a batch; having no watchers is fine
    fn publish(&self, batch: WatchBatch) {
        if !batch.is_empty() {
            let _ = self.events.send(Arc::new(batch));
        }
    }

    /// Drop every expired lease and its keys, returning the DELETE events
    fn expire(inner: &mut Inner, now: Instant) -> WatchBatch {
        let expired: Vec<LeaseId> = inner
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut batch = Vec::new();
        for id in expired {
            if let Some(lease) = inner.leases.remove(&id) {
                tracing::debug!("lease {} expired, dropping {} keys", id, lease.keys.len());
                for key in lease.keys {
                    if inner.kvs.remove(&key).is_some() {
                        batch.push(WatchEvent::delete(key));
                    }
                }
            }
        }
        batch
    }

    /// Run expiry now and notify watchers
    pub fn sweep(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let batch = Self::expire(&mut inner, Instant::now());
        let removed = batch.len();
        self.publish(batch);
        Ok(removed)
    }

    /// Periodically expire leases until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(e) = store.sweep() {
                    tracing::error!("lease sweep failed: {}", e);
                }
            }
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let inner = self.lock()?;
        Ok(StoreStats {
            keys: inner.kvs.len(),
            leases: inner.leases.len(),
        })
    }

    /// Remaining time before a lease expires, if it is still alive
    pub fn lease_remaining(&self, lease: LeaseId) -> Option<Duration> {
        let inner = self.lock().ok()?;
        let now = Instant::now();
        inner
            .leases
            .get(&lease)
            .filter(|l| l.deadline > now)
            .map(|l| l.deadline - now)
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId> {
        if ttl_secs == 0 {
            return Err(Error::InvalidConfig("lease ttl must be positive".into()));
        }
        if ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(Error::InvalidConfig(format!(
                "lease ttl {}s exceeds the maximum of {}s",
                ttl_secs, MAX_LEASE_TTL_SECS
            )));
        }
        let ttl = Duration::from_secs(ttl_secs);

        let mut inner = self.lock()?;
        let batch = Self::expire(&mut inner, Instant::now());
        let id = LeaseId(inner.next_lease);
        inner.next_lease += 1;
        inner.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
                keys: BTreeSet::new(),
            },
        );
        self.publish(batch);
        Ok(id)
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let mut inner = self.lock()?;
        let mut batch = Self::expire(&mut inner, Instant::now());

        if let Some(id) = lease {
            match inner.leases.get_mut(&id) {
                Some(l) => {
                    l.keys.insert(key.to_string());
                }
                None => {
                    self.publish(batch);
                    return Err(Error::LeaseNotFound(id));
                }
            }
        }

        let previous = inner.kvs.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        if let Some(old) = previous.and_then(|e| e.lease).filter(|old| Some(*old) != lease) {
            if let Some(l) = inner.leases.get_mut(&old) {
                l.keys.remove(key);
            }
        }

        batch.push(WatchEvent::put(key, value));
        self.publish(batch);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        let batch = Self::expire(&mut inner, Instant::now());
        let value = inner.kvs.get(key).map(|e| e.value.clone());
        self.publish(batch);
        Ok(value)
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut inner = self.lock()?;
        let batch = Self::expire(&mut inner, Instant::now());
        let kvs = inner
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                lease: e.lease,
            })
            .collect();
        self.publish(batch);
        Ok(kvs)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let mut batch = Self::expire(&mut inner, Instant::now());

        let removed = inner.kvs.remove(key);
        if let Some(id) = removed.as_ref().and_then(|e| e.lease) {
            if let Some(l) = inner.leases.get_mut(&id) {
                l.keys.remove(key);
            }
        }

        let existed = removed.is_some();
        if existed {
            batch.push(WatchEvent::delete(key));
        }
        self.publish(batch);
        Ok(existed)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        let batch = Self::expire(&mut inner, now);

        let result = match inner.leases.get_mut(&lease) {
            Some(l) => {
                l.deadline = now + l.ttl;
                Ok(())
            }
            None => Err(Error::LeaseNotFound(lease)),
        };
        self.publish(batch);
        result
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let mut rx = self.events.subscribe();
        let prefix = prefix.to_string();

        let events = stream! {
            loop {
                match rx.recv().await {
                    Ok(batch) => {
                        let matching: WatchBatch = batch
                            .iter()
                            .filter(|e| e.key.starts_with(&prefix))
                            .cloned()
                            .collect();
                        if !matching.is_empty() {
                            yield Ok(matching);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("watcher on {} lagged by {} batches", prefix, n);
                        yield Err(Error::WatchLagged(n));
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(events))
    }
}
