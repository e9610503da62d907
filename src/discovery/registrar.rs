//! Registrar: keeps one instance's liveness record alive in the store
//!
//! The record is a key attached to a TTL lease. A background loop wakes every
//! renew interval and
//! 1. reads the key back,
//! 2. grants a fresh lease and re-puts the key if the key is gone or no lease is held,
//! 3. sends one keepalive for the held lease.
//!
//! Any failed step drops the held lease so the next tick starts over with a
//! re-grant. Failures never end the loop; only [`RegistrarHandle::stop`] (or
//! dropping the handle) does, after a best-effort delete of the key.

use crate::common::{Error, RegistrarConfig, Result, ServiceInstance};
use crate::store::{CoordinationStore, LeaseId};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Observable state of one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationStatus {
    pub key: String,
    pub lease: Option<LeaseId>,
    /// Completed renewal rounds, the initial registration included
    pub renewals: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

pub struct Registrar;

impl Registrar {
    /// Register `key` → `value` under a lease and keep it alive.
    ///
    /// Only invalid parameters fail; nothing touches the store in that case. A
    /// store failure during the initial registration is logged and retried on
    /// the next tick.
    pub async fn start(
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
        value: impl Into<String>,
        config: RegistrarConfig,
    ) -> Result<RegistrarHandle> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() {
            return Err(Error::InvalidConfig("key cannot be empty".into()));
        }
        if value.is_empty() {
            return Err(Error::InvalidConfig("value cannot be empty".into()));
        }
        config.validate()?;

        let status = Arc::new(Mutex::new(RegistrationStatus {
            key: key.clone(),
            lease: None,
            renewals: 0,
            failures: 0,
            last_error: None,
        }));

        let mut renewal = Renewal {
            store,
            key: key.clone(),
            value,
            config,
            lease: None,
            status: status.clone(),
        };

        tracing::info!(
            "Registering {} (ttl {}s, renew every {}s)",
            key,
            config.ttl_secs,
            config.renew_interval_secs
        );
        renewal.tick().await;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(renewal.run(stop_rx));

        Ok(RegistrarHandle {
            key,
            status,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Register a service instance under its scheme key, the address as value
    pub async fn start_instance(
        store: Arc<dyn CoordinationStore>,
        instance: &ServiceInstance,
        config: RegistrarConfig,
    ) -> Result<RegistrarHandle> {
        instance.validate()?;
        Self::start(store, instance.key(), instance.address.clone(), config).await
    }
}

/// Handle to a running registration.
///
/// Dropping it stops the renewal loop the same way [`RegistrarHandle::stop`]
/// does, without waiting for the loop to finish.
pub struct RegistrarHandle {
    key: String,
    status: Arc<Mutex<RegistrationStatus>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RegistrarHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> RegistrationStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop renewing, delete the key (bounded by the delete timeout) and join the loop
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("registrar task for {} failed: {}", self.key, e);
            }
        }
    }
}

struct Renewal {
    store: Arc<dyn CoordinationStore>,
    key: String,
    value: String,
    config: RegistrarConfig,
    lease: Option<LeaseId>,
    status: Arc<Mutex<RegistrationStatus>>,
}

impl Renewal {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        let period = self.config.renew_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }

        self.deregister().await;
    }

    /// One renewal round; failures are recorded, never returned
    async fn tick(&mut self) {
        let result = self.renew().await;
        if result.is_err() {
            self.lease = None;
        }

        let mut status = match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        status.lease = self.lease;
        match result {
            Ok(()) => {
                status.renewals += 1;
                status.last_error = None;
            }
            Err(e) => {
                tracing::warn!("renewal of {} failed: {}", self.key, e);
                status.failures += 1;
                status.last_error = Some(e.to_string());
            }
        }
    }

    async fn renew(&mut self) -> Result<()> {
        let existing = self.store.get(&self.key).await?;

        let lease = match (existing, self.lease) {
            (Some(_), Some(lease)) => lease,
            _ => {
                let lease = self.store.grant(self.config.ttl_secs).await?;
                self.store.put(&self.key, &self.value, Some(lease)).await?;
                tracing::debug!("{} registered under lease {}", self.key, lease);
                self.lease = Some(lease);
                lease
            }
        };

        self.store.keep_alive_once(lease).await
    }

    async fn deregister(&mut self) {
        self.lease = None;
        match tokio::time::timeout(self.config.delete_timeout(), self.store.delete(&self.key)).await
        {
            Ok(Ok(_)) => tracing::info!("Deregistered {}", self.key),
            Ok(Err(e)) => tracing::warn!("deregistering {} failed: {}", self.key, e),
            Err(_) => tracing::warn!(
                "deregistering {} timed out after {:?}",
                self.key,
                self.config.delete_timeout()
            ),
        }
    }
}
