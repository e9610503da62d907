//! Registry owned by the composing application
//!
//! Holds every registrar and resolver a process runs so they can be looked up by
//! key or name and shut down together. There is no process-wide table; create one
//! `Registry` per store and pass it where it is needed.

use crate::common::{Error, RegistrarConfig, Result, ServiceInstance};
use crate::discovery::registrar::{Registrar, RegistrarHandle, RegistrationStatus};
use crate::discovery::resolver::{AddressUpdater, Resolver, ResolverHandle, ResolverState};
use crate::store::CoordinationStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Registry {
    store: Arc<dyn CoordinationStore>,
    config: RegistrarConfig,
    registrars: Mutex<HashMap<String, RegistrarHandle>>,
    resolvers: Mutex<HashMap<String, ResolverHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RegistrarConfig) -> Self {
        Self {
            store,
            config,
            registrars: Mutex::new(HashMap::new()),
            resolvers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Register an instance and keep it alive; returns its store key
    pub async fn register(&self, instance: &ServiceInstance) -> Result<String> {
        instance.validate()?;
        let key = instance.key();
        if lock(&self.registrars).contains_key(&key) {
            return Err(Error::InvalidConfig(format!("{} is already registered", key)));
        }

        let handle = Registrar::start_instance(self.store.clone(), instance, self.config).await?;

        let duplicate = {
            let mut registrars = lock(&self.registrars);
            if registrars.contains_key(&key) {
                Some(handle)
            } else {
                registrars.insert(key.clone(), handle);
                None
            }
        };
        // Lost a race with a concurrent register of the same instance.
        if let Some(handle) = duplicate {
            handle.stop().await;
            return Err(Error::InvalidConfig(format!("{} is already registered", key)));
        }
        Ok(key)
    }

    /// Stop one registration; `false` if the key was not registered here
    pub async fn deregister(&self, key: &str) -> bool {
        let handle = lock(&self.registrars).remove(key);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.registrars).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn status(&self, key: &str) -> Option<RegistrationStatus> {
        lock(&self.registrars).get(key).map(|h| h.status())
    }

    /// Start a named resolver over `prefix`
    pub fn start_resolver(
        &self,
        name: impl Into<String>,
        prefix: impl Into<String>,
        updater: impl AddressUpdater,
    ) -> Result<()> {
        let name = name.into();
        let mut resolvers = lock(&self.resolvers);
        if resolvers.contains_key(&name) {
            return Err(Error::InvalidConfig(format!(
                "resolver {} already exists",
                name
            )));
        }
        let handle = Resolver::start(self.store.clone(), prefix, updater);
        resolvers.insert(name, handle);
        Ok(())
    }

    pub fn resolver_state(&self, name: &str) -> Option<ResolverState> {
        lock(&self.resolvers).get(name).map(|h| h.state())
    }

    pub fn resolver_addresses(&self, name: &str) -> Option<Vec<String>> {
        lock(&self.resolvers).get(name).map(|h| h.addresses())
    }

    /// Stop one resolver; `false` if no resolver has that name
    pub async fn remove_resolver(&self, name: &str) -> bool {
        let handle = lock(&self.resolvers).remove(name);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every resolver, then deregister every instance
    pub async fn shutdown(&self) {
        let resolvers: Vec<ResolverHandle> =
            lock(&self.resolvers).drain().map(|(_, h)| h).collect();
        for handle in resolvers {
            handle.stop().await;
        }

        let registrars: Vec<RegistrarHandle> =
            lock(&self.registrars).drain().map(|(_, h)| h).collect();
        tracing::info!("Registry shutting down {} registrations", registrars.len());
        for handle in registrars {
            handle.stop().await;
        }
    }
}
