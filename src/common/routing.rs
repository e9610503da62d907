//! Per-call routing key context
//!
//! A caller pins a call to one resolved address by attaching a [`RoutingKey`] to the
//! call's [`CallContext`]. When the key has to travel with a tonic request instead
//! (e.g. through an interceptor), it is carried in the `x-routing-key` metadata entry.

use std::fmt;
use std::sync::Arc;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

/// Metadata entry carrying the routing key on a tonic request
pub const ROUTING_KEY_METADATA: &str = "x-routing-key";

/// Opaque per-call token matched exactly against resolved addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Attach this key to an outgoing tonic request.
    ///
    /// Keys that are not valid ASCII metadata are left off; the picker then sees
    /// no key, which is a miss under the affinity policy.
    pub fn attach<T>(&self, request: &mut tonic::Request<T>) {
        match AsciiMetadataValue::try_from(self.0.as_str()) {
            Ok(value) => {
                request.metadata_mut().insert(ROUTING_KEY_METADATA, value);
            }
            Err(_) => {
                tracing::warn!("routing key {:?} is not valid metadata, not attached", self.0);
            }
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoutingKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Everything the picker may look at for one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    routing_key: Option<RoutingKey>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routing_key(mut self, key: impl Into<RoutingKey>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn routing_key(&self) -> Option<&RoutingKey> {
        self.routing_key.as_ref()
    }

    /// Build a context from request metadata; a missing or non-ASCII entry means no key
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let routing_key = metadata
            .get(ROUTING_KEY_METADATA)
            .and_then(|v| v.to_str().ok())
            .map(RoutingKey::from);
        Self { routing_key }
    }
}

/// Extracts the affinity key from a call context
#[derive(Clone)]
pub struct KeyExtractor(Arc<dyn Fn(&CallContext) -> Option<RoutingKey> + Send + Sync>);

impl KeyExtractor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&CallContext) -> Option<RoutingKey> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Use the context's routing key as is
    pub fn routing_key() -> Self {
        Self::new(|ctx| ctx.routing_key().cloned())
    }

    pub fn extract(&self, ctx: &CallContext) -> Option<RoutingKey> {
        (self.0)(ctx)
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::routing_key()
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyExtractor")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_without_key() {
        let ctx = CallContext::new();
        assert!(ctx.routing_key().is_none());
        assert!(KeyExtractor::default().extract(&ctx).is_none());
    }

    #[test]
    fn test_metadata_propagation() {
        let mut request = tonic::Request::new(());
        RoutingKey::from("127.0.0.1:8001").attach(&mut request);

        let ctx = CallContext::from_metadata(request.metadata());
        assert_eq!(ctx.routing_key().map(|k| k.as_str()), Some("127.0.0.1:8001"));
    }

    #[test]
    fn test_missing_metadata() {
        let request = tonic::Request::new(());
        assert_eq!(CallContext::from_metadata(request.metadata()), CallContext::new());
    }

    #[test]
    fn test_custom_extractor() {
        let extractor = KeyExtractor::new(|ctx| {
            ctx.routing_key()
                .map(|k| RoutingKey::new(format!("{}:9000", k)))
        });
        let ctx = CallContext::new().with_routing_key("10.0.0.1");
        assert_eq!(
            extractor.extract(&ctx),
            Some(RoutingKey::new("10.0.0.1:9000"))
        );
    }
}
