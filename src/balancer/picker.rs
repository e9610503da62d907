//! Per-call connection selection
//!
//! The picker holds an immutable index of ready connections behind an
//! `RwLock<Arc<_>>`. [`Picker::rebuild`] swaps in a new index; [`Picker::pick`]
//! clones the current `Arc` inside one short read lock and selects from that
//! snapshot, so a call racing a rebuild sees either the old or the new set.

use crate::common::{CallContext, Error, KeyExtractor, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Selection policy, fixed when the picker is built
#[derive(Debug, Clone, Default)]
pub enum Policy {
    /// Round robin over ready connections
    #[default]
    Uniform,
    /// Exact match of the call's routing key against ready addresses
    Affinity(KeyExtractor),
}

impl Policy {
    /// Affinity on the call context's routing key
    pub fn affinity() -> Self {
        Policy::Affinity(KeyExtractor::routing_key())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Uniform => "round_robin",
            Policy::Affinity(_) => "addr_hash",
        }
    }
}

/// The chosen target of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picked<C> {
    pub address: String,
    pub connection: C,
}

struct ReadySet<C> {
    /// Sorted, for a stable round-robin order
    order: Vec<String>,
    connections: HashMap<String, C>,
}

impl<C> ReadySet<C> {
    fn empty() -> Self {
        Self {
            order: Vec::new(),
            connections: HashMap::new(),
        }
    }
}

pub struct Picker<C> {
    policy: Policy,
    ready: RwLock<Arc<ReadySet<C>>>,
    cursor: AtomicUsize,
}

impl<C: Clone> Picker<C> {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            ready: RwLock::new(Arc::new(ReadySet::empty())),
            // Random start so clients don't all hit the same first server.
            cursor: AtomicUsize::new(rand::random::<usize>()),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Replace the index with the connection layer's current ready set
    pub fn rebuild(&self, ready: impl IntoIterator<Item = (String, C)>) {
        let connections: HashMap<String, C> = ready.into_iter().collect();
        let mut order: Vec<String> = connections.keys().cloned().collect();
        order.sort();

        tracing::debug!("{} picker rebuilt with {} ready", self.policy.name(), order.len());
        let set = Arc::new(ReadySet { order, connections });
        *self.ready.write().unwrap_or_else(|p| p.into_inner()) = set;
    }

    fn snapshot(&self) -> Arc<ReadySet<C>> {
        self.ready.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Select a connection for one call
    pub fn pick(&self, ctx: &CallContext) -> Result<Picked<C>> {
        let ready = self.snapshot();

        match &self.policy {
            Policy::Uniform => {
                if ready.order.is_empty() {
                    return Err(Error::NoReadyConnections);
                }
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % ready.order.len();
                let address = &ready.order[idx];
                let connection = ready.connections[address].clone();
                Ok(Picked {
                    address: address.clone(),
                    connection,
                })
            }
            Policy::Affinity(extractor) => {
                let key = extractor
                    .extract(ctx)
                    .ok_or(Error::RoutingMiss(None))?;
                match ready.connections.get(key.as_str()) {
                    Some(connection) => Ok(Picked {
                        address: key.as_str().to_string(),
                        connection: connection.clone(),
                    }),
                    None => {
                        tracing::trace!("no ready connection for routing key {}", key);
                        Err(Error::RoutingMiss(Some(key.as_str().to_string())))
                    }
                }
            }
        }
    }

    /// Ready addresses in index order
    pub fn ready_addresses(&self) -> Vec<String> {
        self.snapshot().order.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
