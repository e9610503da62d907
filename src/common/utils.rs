//! Key scheme and small helpers for minilb
//!
//! Registrations live at `/{registry_prefix}/{service}/{version}/{address}` and
//! resolvers watch `/{registry_prefix}/{service}/{version}`.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Build the watch prefix for one service version
pub fn watch_key(registry_prefix: &str, service: &str, version: &str) -> String {
    format!("/{}/{}/{}", registry_prefix, service, version)
}

/// Build the registration key of one instance
pub fn instance_key(registry_prefix: &str, service: &str, version: &str, address: &str) -> String {
    format!("{}/{}", watch_key(registry_prefix, service, version), address)
}

/// Validate one key segment (must be non-empty, no separators or control chars)
pub fn validate_segment(name: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::InvalidConfig(format!("{} cannot be empty", name)));
    }

    if segment.len() > 256 {
        return Err(Error::InvalidConfig(format!(
            "{} too long (max 256 bytes)",
            name
        )));
    }

    if segment.contains('/') || segment.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidConfig(format!(
            "{} contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// One service instance as seen by the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub registry_prefix: String,
    pub service: String,
    pub version: String,
    /// Dialable address, e.g. `10.0.0.1:9000`
    pub address: String,
}

impl ServiceInstance {
    pub fn new(
        registry_prefix: impl Into<String>,
        service: impl Into<String>,
        version: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            registry_prefix: registry_prefix.into(),
            service: service.into(),
            version: version.into(),
            address: address.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_segment("registry prefix", &self.registry_prefix)?;
        validate_segment("service", &self.service)?;
        validate_segment("version", &self.version)?;
        validate_segment("address", &self.address)
    }

    /// Store key for this instance
    pub fn key(&self) -> String {
        instance_key(
            &self.registry_prefix,
            &self.service,
            &self.version,
            &self.address,
        )
    }

    /// Prefix a resolver watches to find this instance and its peers
    pub fn watch_prefix(&self) -> String {
        watch_key(&self.registry_prefix, &self.service, &self.version)
    }
}

impl std::fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{} ({})",
            self.service, self.version, self.address
        )
    }
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme() {
        assert_eq!(watch_key("svc", "echo", "1.0"), "/svc/echo/1.0");
        assert_eq!(
            instance_key("svc", "echo", "1.0", "10.0.0.1:9000"),
            "/svc/echo/1.0/10.0.0.1:9000"
        );
    }

    #[test]
    fn test_service_instance() {
        let instance = ServiceInstance::new("svc", "echo", "1.0", "10.0.0.1:9000");
        assert!(instance.validate().is_ok());
        assert_eq!(instance.key(), "/svc/echo/1.0/10.0.0.1:9000");
        assert_eq!(instance.watch_prefix(), "/svc/echo/1.0");
        assert!(instance.key().starts_with(&instance.watch_prefix()));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("service", "echo").is_ok());
        assert!(validate_segment("service", "").is_err());
        assert!(validate_segment("service", "a/b").is_err());
        assert!(validate_segment("service", "a\nb").is_err());
        assert!(validate_segment("service", &"x".repeat(300)).is_err());
    }
}
