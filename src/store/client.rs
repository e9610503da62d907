//! gRPC client for a remote coordination store

use crate::common::{Error, Result};
use crate::proto;
use crate::proto::store_client::StoreClient;
use crate::store::grpc::lease_from_wire;
use crate::store::{CoordinationStore, KeyValue, LeaseId, WatchBatch, WatchEvent, WatchStream};
use futures_util::StreamExt;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

/// [`CoordinationStore`] backed by a `minilb-store` server.
///
/// The channel reconnects on its own, so a store outage shows up as per-call
/// errors rather than a dead client.
#[derive(Clone)]
pub struct GrpcStore {
    client: StoreClient<Channel>,
}

impl GrpcStore {
    /// Connect eagerly, failing if the store is unreachable
    pub async fn connect(addr: impl Into<String>) -> Result<Self> {
        let endpoint = Self::endpoint(addr.into())?;
        let channel = endpoint.connect().await?;
        Ok(Self {
            client: StoreClient::new(channel),
        })
    }

    /// Build a client that dials on first use
    pub fn connect_lazy(addr: impl Into<String>) -> Result<Self> {
        let channel = Self::endpoint(addr.into())?.connect_lazy();
        Ok(Self {
            client: StoreClient::new(channel),
        })
    }

    fn endpoint(addr: String) -> Result<Endpoint> {
        let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr
        } else {
            format!("http://{}", addr)
        };
        Ok(Endpoint::from_shared(uri)?.connect_timeout(Duration::from_secs(5)))
    }
}

pub(crate) fn event_from_proto(event: proto::Event) -> Result<WatchEvent> {
    match proto::EventType::try_from(event.r#type) {
        Ok(proto::EventType::Put) => Ok(WatchEvent::put(event.key, event.value)),
        Ok(proto::EventType::Delete) => Ok(WatchEvent::delete(event.key)),
        Err(_) => Err(Error::StreamTerminated(format!(
            "unknown event type {} for {}",
            event.r#type, event.key
        ))),
    }
}

#[async_trait::async_trait]
impl CoordinationStore for GrpcStore {
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId> {
        let resp = self
            .client
            .clone()
            .grant(proto::GrantRequest { ttl_secs })
            .await?
            .into_inner();
        Ok(LeaseId(resp.lease_id))
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let request = proto::PutRequest {
            key: key.to_string(),
            value: value.to_string(),
            lease_id: lease.map(|l| l.0).unwrap_or(0),
        };
        match self.client.clone().put(request).await {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::NotFound => match lease {
                Some(id) => Err(Error::LeaseNotFound(id)),
                None => Err(Error::Grpc(status)),
            },
            Err(status) => Err(Error::Grpc(status)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .clone()
            .get(proto::GetRequest {
                key: key.to_string(),
            })
            .await?
            .into_inner();
        Ok(resp.found.then_some(resp.value))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let resp = self
            .client
            .clone()
            .get_prefix(proto::GetPrefixRequest {
                prefix: prefix.to_string(),
            })
            .await?
            .into_inner();
        Ok(resp
            .kvs
            .into_iter()
            .map(|kv| KeyValue {
                key: kv.key,
                value: kv.value,
                lease: lease_from_wire(kv.lease_id),
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let resp = self
            .client
            .clone()
            .delete(proto::DeleteRequest {
                key: key.to_string(),
            })
            .await?
            .into_inner();
        Ok(resp.deleted)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<()> {
        match self
            .client
            .clone()
            .keep_alive_once(proto::KeepAliveRequest { lease_id: lease.0 })
            .await
        {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::NotFound => Err(Error::LeaseNotFound(lease)),
            Err(status) => Err(Error::Grpc(status)),
        }
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let stream = self
            .client
            .clone()
            .watch(proto::WatchRequest {
                prefix: prefix.to_string(),
            })
            .await?
            .into_inner();
        let batches = stream.map(|item| -> Result<WatchBatch> {
            let resp = item?;
            resp.events.into_iter().map(event_from_proto).collect()
        });
        Ok(Box::pin(batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_proto() {
        let put = event_from_proto(proto::Event {
            r#type: proto::EventType::Put as i32,
            key: "/k".into(),
            value: "v".into(),
        })
        .unwrap();
        assert_eq!(put, WatchEvent::put("/k", "v"));

        let delete = event_from_proto(proto::Event {
            r#type: proto::EventType::Delete as i32,
            key: "/k".into(),
            value: String::new(),
        })
        .unwrap();
        assert_eq!(delete, WatchEvent::delete("/k"));
    }

    #[test]
    fn test_unknown_event_type_terminates() {
        let err = event_from_proto(proto::Event {
            r#type: 42,
            key: "/k".into(),
            value: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::StreamTerminated(_)));
    }

    #[test]
    fn test_endpoint_scheme() {
        assert!(GrpcStore::endpoint("127.0.0.1:2379".into()).is_ok());
        assert!(GrpcStore::endpoint("http://127.0.0.1:2379".into()).is_ok());
    }
}
