//! Connection layer between the resolver and the picker
//!
//! A dedicated task owns the address → connection map. Each published address
//! list is reconciled against it: removed addresses leave the picker at once and
//! new ones are dialed in the background, each joining the picker as soon as its
//! dial succeeds. Addresses that fail to dial stay out of the picker and are
//! retried every `retry_interval`.

use crate::balancer::picker::Picker;
use crate::common::{BalancerConfig, Error, Result};
use crate::discovery::AddressUpdater;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tonic::transport::{Channel, Endpoint};

const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Turns a resolved address into a usable connection handle
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    async fn connect(&self, address: &str) -> Result<Self::Connection>;
}

/// Dials `http://{address}` and hands out tonic channels
#[derive(Debug, Clone)]
pub struct TonicConnector {
    connect_timeout: Duration,
}

impl TonicConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TonicConnector {
    fn default() -> Self {
        Self::new(BalancerConfig::default().connect_timeout())
    }
}

#[async_trait::async_trait]
impl Connector for TonicConnector {
    type Connection = Channel;

    async fn connect(&self, address: &str) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(format!("http://{}", address))?
            .connect_timeout(self.connect_timeout);
        endpoint
            .connect()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", address, e)))
    }
}

/// Feeds resolver output into a connection pool
pub struct AddressSink(watch::Sender<Vec<String>>);

impl AddressUpdater for AddressSink {
    fn update(&self, addresses: Vec<String>) {
        self.0.send_replace(addresses);
    }
}

pub struct ConnectionPool;

impl ConnectionPool {
    /// Spawn the pool task. Address lists sent through the returned sink are
    /// dialed and pushed into `picker`.
    pub fn spawn<K: Connector>(
        connector: K,
        picker: Arc<Picker<K::Connection>>,
        config: BalancerConfig,
    ) -> (AddressSink, PoolHandle) {
        let (addresses_tx, addresses_rx) = watch::channel(Vec::new());
        let (ready_tx, ready_rx) = watch::channel(Vec::new());
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker = PoolLoop {
            connector: Arc::new(connector),
            picker,
            retry_interval: config.retry_interval().max(MIN_RETRY_INTERVAL),
            connections: HashMap::new(),
            dialing: HashSet::new(),
            dials: JoinSet::new(),
            wanted: Vec::new(),
            ready: ready_tx,
        };
        let task = tokio::spawn(worker.run(addresses_rx, stop_rx));

        (
            AddressSink(addresses_tx),
            PoolHandle {
                ready: ready_rx,
                stop: Some(stop_tx),
                task: Some(task),
            },
        )
    }
}

pub struct PoolHandle {
    ready: watch::Receiver<Vec<String>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PoolHandle {
    /// Addresses with a live connection, sorted
    pub fn ready_addresses(&self) -> Vec<String> {
        self.ready.borrow().clone()
    }

    pub fn ready_changes(&self) -> watch::Receiver<Vec<String>> {
        self.ready.clone()
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("connection pool task failed: {}", e);
            }
        }
    }
}

struct PoolLoop<K: Connector> {
    connector: Arc<K>,
    picker: Arc<Picker<K::Connection>>,
    retry_interval: Duration,
    connections: HashMap<String, K::Connection>,
    /// Addresses with a dial in flight
    dialing: HashSet<String>,
    dials: JoinSet<(String, Result<K::Connection>)>,
    wanted: Vec<String>,
    ready: watch::Sender<Vec<String>>,
}

impl<K: Connector> PoolLoop<K> {
    async fn run(
        mut self,
        mut addresses: watch::Receiver<Vec<String>>,
        mut stop: oneshot::Receiver<()>,
    ) {
        // Once the resolver side is gone the last address list stays in effect.
        let mut resolving = true;
        loop {
            let pending = self.has_pending();
            tokio::select! {
                _ = &mut stop => break,
                changed = addresses.changed(), if resolving => {
                    if changed.is_err() {
                        tracing::debug!("address source closed, keeping {} addresses", self.wanted.len());
                        resolving = false;
                        continue;
                    }
                    self.wanted = addresses.borrow_and_update().clone();
                    self.reconcile();
                }
                Some(joined) = self.dials.join_next(), if !self.dials.is_empty() => {
                    match joined {
                        Ok((address, result)) => self.dialed(address, result),
                        Err(e) => tracing::error!("dial task failed: {}", e),
                    }
                }
                _ = tokio::time::sleep(self.retry_interval), if pending => {
                    self.reconcile();
                }
            }
        }
        self.dials.abort_all();
        tracing::debug!("connection pool stopped with {} connections", self.connections.len());
    }

    /// Wanted addresses with neither a connection nor a dial in flight
    fn has_pending(&self) -> bool {
        self.wanted
            .iter()
            .any(|a| !self.connections.contains_key(a) && !self.dialing.contains(a))
    }

    /// Drop unwanted connections right away, then start dials for missing ones
    fn reconcile(&mut self) {
        let wanted: HashSet<&String> = self.wanted.iter().collect();
        let before = self.connections.len();
        self.connections.retain(|address, _| {
            let keep = wanted.contains(address);
            if !keep {
                tracing::info!("dropping connection to {}", address);
            }
            keep
        });
        if self.connections.len() != before {
            self.publish_ready();
        }

        let missing: Vec<String> = self
            .wanted
            .iter()
            .filter(|a| !self.connections.contains_key(*a) && !self.dialing.contains(*a))
            .cloned()
            .collect();
        for address in missing {
            self.dialing.insert(address.clone());
            let connector = self.connector.clone();
            self.dials.spawn(async move {
                let result = connector.connect(&address).await;
                (address, result)
            });
        }
    }

    fn dialed(&mut self, address: String, result: Result<K::Connection>) {
        self.dialing.remove(&address);
        if !self.wanted.contains(&address) {
            tracing::debug!("discarding dial of {}, no longer resolved", address);
            return;
        }
        match result {
            Ok(connection) => {
                tracing::info!("connected to {}", address);
                self.connections.insert(address, connection);
                self.publish_ready();
            }
            Err(e) => tracing::warn!("dial {} failed, will retry: {}", address, e),
        }
    }

    /// Rebuild the picker from the live connections and announce the ready list
    fn publish_ready(&self) {
        self.picker.rebuild(
            self.connections
                .iter()
                .map(|(address, connection)| (address.clone(), connection.clone())),
        );
        let mut ready: Vec<String> = self.connections.keys().cloned().collect();
        ready.sort();
        self.ready.send_replace(ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::picker::Policy;
    use crate::common::CallContext;
    use std::sync::Mutex;

    /// Connects to anything not in `down`; `slow*` addresses take `slow_dial`
    #[derive(Clone, Default)]
    struct FakeConnector {
        down: Arc<Mutex<HashSet<String>>>,
        slow_dial: Duration,
    }

    #[async_trait::async_trait]
    impl Connector for FakeConnector {
        type Connection = String;

        async fn connect(&self, address: &str) -> Result<String> {
            if address.starts_with("slow") {
                tokio::time::sleep(self.slow_dial).await;
            }
            if self.down.lock().unwrap().contains(address) {
                return Err(Error::ConnectionFailed(address.to_string()));
            }
            Ok(format!("conn-{}", address))
        }
    }

    fn fast() -> BalancerConfig {
        BalancerConfig {
            connect_timeout_ms: 100,
            retry_interval_ms: 20,
        }
    }

    async fn wait_ready(pool: &PoolHandle, expected: &[&str]) {
        let mut changes = pool.ready_changes();
        let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        tokio::time::timeout(
            Duration::from_secs(5),
            changes.wait_for(|ready| *ready == expected),
        )
        .await
        .expect("pool did not converge")
        .unwrap();
    }

    #[tokio::test]
    async fn test_reconciles_address_lists() {
        let picker = Arc::new(Picker::new(Policy::affinity()));
        let (sink, pool) = ConnectionPool::spawn(FakeConnector::default(), picker.clone(), fast());

        sink.update(vec!["b:1".into(), "a:1".into()]);
        wait_ready(&pool, &["a:1", "b:1"]).await;
        let picked = picker
            .pick(&CallContext::new().with_routing_key("a:1"))
            .unwrap();
        assert_eq!(picked.connection, "conn-a:1");

        sink.update(vec!["b:1".into()]);
        wait_ready(&pool, &["b:1"]).await;
        assert_eq!(picker.ready_addresses(), vec!["b:1".to_string()]);

        pool.stop().await;
    }

    #[tokio::test]
    async fn test_retries_failed_dials() {
        let connector = FakeConnector::default();
        connector.down.lock().unwrap().insert("a:1".into());
        let picker = Arc::new(Picker::new(Policy::Uniform));
        let (sink, pool) = ConnectionPool::spawn(connector.clone(), picker.clone(), fast());

        sink.update(vec!["a:1".into(), "b:1".into()]);
        wait_ready(&pool, &["b:1"]).await;

        connector.down.lock().unwrap().clear();
        wait_ready(&pool, &["a:1", "b:1"]).await;
        assert_eq!(picker.len(), 2);

        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_does_not_wait_for_new_dials() {
        let connector = FakeConnector {
            slow_dial: Duration::from_secs(3),
            ..Default::default()
        };
        let picker = Arc::new(Picker::new(Policy::affinity()));
        let (sink, pool) = ConnectionPool::spawn(connector, picker.clone(), fast());

        sink.update(vec!["a:1".into()]);
        wait_ready(&pool, &["a:1"]).await;
        let ctx = CallContext::new().with_routing_key("a:1");
        assert!(picker.pick(&ctx).is_ok());

        let start = tokio::time::Instant::now();
        sink.update(vec!["slow:1".into()]);
        wait_ready(&pool, &[]).await;
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(matches!(picker.pick(&ctx), Err(Error::RoutingMiss(_))));

        wait_ready(&pool, &["slow:1"]).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_apply_while_dial_in_flight() {
        let connector = FakeConnector {
            slow_dial: Duration::from_secs(3),
            ..Default::default()
        };
        let picker = Arc::new(Picker::new(Policy::affinity()));
        let (sink, pool) = ConnectionPool::spawn(connector, picker.clone(), fast());

        let start = tokio::time::Instant::now();
        sink.update(vec!["a:1".into(), "slow:1".into()]);
        wait_ready(&pool, &["a:1"]).await;

        // a:1 is deregistered and b:1 shows up before slow:1 finishes dialing
        sink.update(vec!["b:1".into()]);
        wait_ready(&pool, &["b:1"]).await;
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(picker
            .pick(&CallContext::new().with_routing_key("a:1"))
            .is_err());

        // The late slow:1 dial is discarded
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.ready_addresses(), vec!["b:1".to_string()]);
        assert_eq!(picker.ready_addresses(), vec!["b:1".to_string()]);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_interval_is_clamped() {
        let connector = FakeConnector::default();
        connector.down.lock().unwrap().insert("a:1".into());
        let picker = Arc::new(Picker::new(Policy::Uniform));
        let config = BalancerConfig {
            connect_timeout_ms: 100,
            retry_interval_ms: 0,
        };
        let (sink, pool) = ConnectionPool::spawn(connector.clone(), picker, config);

        sink.update(vec!["a:1".into()]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        connector.down.lock().unwrap().clear();
        wait_ready(&pool, &["a:1"]).await;
        pool.stop().await;
    }
}
