//! Resolver: keeps a local address set in sync with one store prefix
//!
//! The watch loop is the only writer of the [`AddressSet`]. It opens the watch,
//! seeds the set from a prefix scan, then applies event batches, publishing a
//! fresh copy of the address list to the consumer after the scan and after every
//! batch. Subscribing before scanning means nothing committed in between is
//! missed; replaying such an event is harmless because puts and deletes are
//! idempotent.
//!
//! The loop never reopens a failed watch. When the stream errors or ends the
//! resolver moves to [`ResolverState::Terminated`] and stops publishing; start a
//! new resolver to recover.

use crate::store::{CoordinationStore, EventType, KeyValue, WatchEvent, WatchStream};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Receives the full address list after every change.
///
/// Called synchronously from the resolver's watch task, so implementations should
/// hand the list off rather than block.
pub trait AddressUpdater: Send + Sync + 'static {
    fn update(&self, addresses: Vec<String>);
}

impl<F> AddressUpdater for F
where
    F: Fn(Vec<String>) + Send + Sync + 'static,
{
    fn update(&self, addresses: Vec<String>) {
        self(addresses)
    }
}

/// Store key → address, as last seen on the watch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    entries: BTreeMap<String, String>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with a prefix scan
    pub fn seed(&mut self, kvs: Vec<KeyValue>) {
        self.entries = kvs.into_iter().map(|kv| (kv.key, kv.value)).collect();
    }

    /// Apply one event. Re-putting the same pair or deleting a missing key is a no-op.
    pub fn apply(&mut self, event: WatchEvent) {
        match event.kind {
            EventType::Put => match event.value {
                Some(address) => {
                    self.entries.insert(event.key, address);
                }
                None => tracing::warn!("put for {} carried no address, ignored", event.key),
            },
            EventType::Delete => {
                self.entries.remove(&event.key);
            }
        }
    }

    /// Addresses ordered by store key
    pub fn addresses(&self) -> Vec<String> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ResolverState {
    /// Opening the watch and scanning the prefix
    Seeding,
    /// Applying watch batches
    Watching,
    /// The watch failed or ended; no further updates
    Terminated { reason: String },
    /// Stopped through its handle
    Stopped,
}

impl ResolverState {
    /// No more updates will be published
    pub fn is_final(&self) -> bool {
        matches!(self, ResolverState::Terminated { .. } | ResolverState::Stopped)
    }
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverState::Seeding => write!(f, "seeding"),
            ResolverState::Watching => write!(f, "watching"),
            ResolverState::Terminated { reason } => write!(f, "terminated: {}", reason),
            ResolverState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Resolver;

impl Resolver {
    /// Start resolving `prefix`. Never fails; problems show up in the state.
    pub fn start(
        store: Arc<dyn CoordinationStore>,
        prefix: impl Into<String>,
        updater: impl AddressUpdater,
    ) -> ResolverHandle {
        let prefix = prefix.into();
        let (state_tx, state_rx) = watch::channel(ResolverState::Seeding);
        let (addresses_tx, addresses_rx) = watch::channel(Vec::new());
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker = WatchLoop {
            store,
            prefix: prefix.clone(),
            set: AddressSet::new(),
            updater: Box::new(updater),
            state: state_tx,
            published: addresses_tx,
        };
        let task = tokio::spawn(worker.run(stop_rx));

        ResolverHandle {
            prefix,
            state: state_rx,
            addresses: addresses_rx,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running resolver. Dropping it stops the watch loop.
pub struct ResolverHandle {
    prefix: String,
    state: watch::Receiver<ResolverState>,
    addresses: watch::Receiver<Vec<String>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ResolverHandle {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> ResolverState {
        self.state.borrow().clone()
    }

    /// Receiver for state transitions
    pub fn state_changes(&self) -> watch::Receiver<ResolverState> {
        self.state.clone()
    }

    /// Copy of the last published address list
    pub fn addresses(&self) -> Vec<String> {
        self.addresses.borrow().clone()
    }

    /// Receiver for published address lists
    pub fn address_changes(&self) -> watch::Receiver<Vec<String>> {
        self.addresses.clone()
    }

    /// Stop watching and join the loop
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("resolver task for {} failed: {}", self.prefix, e);
            }
        }
    }
}

struct WatchLoop {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    set: AddressSet,
    updater: Box<dyn AddressUpdater>,
    state: watch::Sender<ResolverState>,
    published: watch::Sender<Vec<String>>,
}

impl WatchLoop {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        let opened = tokio::select! {
            _ = &mut stop => {
                self.finish(ResolverState::Stopped);
                return;
            }
            opened = self.open() => opened,
        };

        let mut events = match opened {
            Some(events) => events,
            None => return,
        };
        self.state.send_replace(ResolverState::Watching);
        tracing::info!("Resolver watching {}", self.prefix);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    self.finish(ResolverState::Stopped);
                    return;
                }
                next = events.next() => match next {
                    Some(Ok(batch)) => {
                        tracing::debug!("{}: applying {} events", self.prefix, batch.len());
                        for event in batch {
                            self.set.apply(event);
                        }
                        self.publish();
                    }
                    Some(Err(e)) => {
                        self.finish(ResolverState::Terminated { reason: e.to_string() });
                        return;
                    }
                    None => {
                        self.finish(ResolverState::Terminated {
                            reason: "watch stream closed".into(),
                        });
                        return;
                    }
                }
            }
        }
    }

    /// Subscribe, then seed from a scan. `None` if the watch could not be opened.
    async fn open(&mut self) -> Option<WatchStream> {
        let watch = self.store.watch_prefix(&self.prefix).await;

        match self.store.get_prefix(&self.prefix).await {
            Ok(kvs) => {
                self.set.seed(kvs);
                self.publish();
            }
            Err(e) => {
                tracing::warn!(
                    "initial scan of {} failed, waiting for watch events: {}",
                    self.prefix,
                    e
                );
            }
        }

        match watch {
            Ok(events) => Some(events),
            Err(e) => {
                self.finish(ResolverState::Terminated {
                    reason: format!("watch could not be opened: {}", e),
                });
                None
            }
        }
    }

    fn publish(&self) {
        let addresses = self.set.addresses();
        self.updater.update(addresses.clone());
        self.published.send_replace(addresses);
    }

    fn finish(&self, state: ResolverState) {
        match &state {
            ResolverState::Terminated { reason } => {
                tracing::warn!("Resolver for {} terminated: {}", self.prefix, reason)
            }
            _ => tracing::info!("Resolver for {} {}", self.prefix, state),
        }
        self.state.send_replace(state);
    }
}
