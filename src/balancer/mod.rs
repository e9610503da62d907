//! Client-side load balancing over resolved addresses
//!
//! ```text
//!  store ──watch──▶ Resolver ──address list──▶ ConnectionPool ──ready set──▶ Picker
//!                                                                            ▲
//!                                              caller ──CallContext──────────┘
//! ```
//!
//! [`Balancer`] wires the three together for one service prefix.

pub mod picker;
pub mod pool;

pub use picker::{Picked, Picker, Policy};
pub use pool::{AddressSink, ConnectionPool, Connector, PoolHandle, TonicConnector};

use crate::common::{BalancerConfig, CallContext, Result};
use crate::discovery::{Resolver, ResolverHandle, ResolverState};
use crate::store::CoordinationStore;
use std::sync::Arc;
use tokio::sync::watch;

pub struct Balancer<C> {
    picker: Arc<Picker<C>>,
    resolver: ResolverHandle,
    pool: PoolHandle,
}

impl<C: Clone + Send + Sync + 'static> Balancer<C> {
    /// Resolve `watch_prefix`, dial what it yields and route calls with `policy`
    pub fn start<K>(
        store: Arc<dyn CoordinationStore>,
        watch_prefix: impl Into<String>,
        policy: Policy,
        connector: K,
        config: BalancerConfig,
    ) -> Self
    where
        K: Connector<Connection = C>,
    {
        let watch_prefix = watch_prefix.into();
        tracing::info!("Balancing {} with {}", watch_prefix, policy.name());

        let picker = Arc::new(Picker::new(policy));
        let (sink, pool) = ConnectionPool::spawn(connector, picker.clone(), config);
        let resolver = Resolver::start(store, watch_prefix, sink);

        Self {
            picker,
            resolver,
            pool,
        }
    }

    /// Connection for one call
    pub fn pick(&self, ctx: &CallContext) -> Result<C> {
        self.picker.pick(ctx).map(|picked| picked.connection)
    }

    /// Connection and the address it belongs to
    pub fn pick_target(&self, ctx: &CallContext) -> Result<Picked<C>> {
        self.picker.pick(ctx)
    }

    pub fn policy(&self) -> &Policy {
        self.picker.policy()
    }

    /// Addresses currently selectable
    pub fn ready_addresses(&self) -> Vec<String> {
        self.pool.ready_addresses()
    }

    pub fn ready_changes(&self) -> watch::Receiver<Vec<String>> {
        self.pool.ready_changes()
    }

    /// Addresses last published by the resolver, ready or not
    pub fn resolved_addresses(&self) -> Vec<String> {
        self.resolver.addresses()
    }

    pub fn resolver_state(&self) -> ResolverState {
        self.resolver.state()
    }

    /// Stop resolving, then close the pool
    pub async fn shutdown(self) {
        self.resolver.stop().await;
        self.pool.stop().await;
    }
}
