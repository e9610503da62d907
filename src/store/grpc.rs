//! Store gRPC service
//!
//! Exposes a [`MemoryStore`] over the `minilb.Store` protocol so registrars and
//! resolvers in other processes can share it. Lease id `0` on the wire means
//! "no lease".

use crate::proto;
use crate::proto::store_server::{Store, StoreServer};
use crate::store::{CoordinationStore, EventType, LeaseId, MemoryStore, WatchEvent};
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// StoreGrpcService implements the `minilb.Store` API on top of a [`MemoryStore`].
pub struct StoreGrpcService {
    store: Arc<MemoryStore>,
}

impl StoreGrpcService {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> StoreServer<Self> {
        StoreServer::new(self)
    }
}

pub(crate) fn lease_from_wire(id: i64) -> Option<LeaseId> {
    (id != 0).then_some(LeaseId(id))
}

pub(crate) fn event_to_proto(event: WatchEvent) -> proto::Event {
    let kind = match event.kind {
        EventType::Put => proto::EventType::Put,
        EventType::Delete => proto::EventType::Delete,
    };
    proto::Event {
        r#type: kind as i32,
        key: event.key,
        value: event.value.unwrap_or_default(),
    }
}

type WatchResponseStream =
    Pin<Box<dyn futures_util::Stream<Item = Result<proto::WatchResponse, Status>> + Send>>;

#[tonic::async_trait]
impl Store for StoreGrpcService {
    async fn grant(
        &self,
        req: Request<proto::GrantRequest>,
    ) -> Result<Response<proto::GrantResponse>, Status> {
        let ttl_secs = req.into_inner().ttl_secs;
        let lease = self
            .store
            .grant(ttl_secs)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::GrantResponse {
            lease_id: lease.0,
            ttl_secs,
        }))
    }

    async fn put(
        &self,
        req: Request<proto::PutRequest>,
    ) -> Result<Response<proto::PutResponse>, Status> {
        let req = req.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key cannot be empty"));
        }
        self.store
            .put(&req.key, &req.value, lease_from_wire(req.lease_id))
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::PutResponse {}))
    }

    async fn get(
        &self,
        req: Request<proto::GetRequest>,
    ) -> Result<Response<proto::GetResponse>, Status> {
        let key = req.into_inner().key;
        let value = self
            .store
            .get(&key)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::GetResponse {
            found: value.is_some(),
            value: value.unwrap_or_default(),
        }))
    }

    async fn get_prefix(
        &self,
        req: Request<proto::GetPrefixRequest>,
    ) -> Result<Response<proto::GetPrefixResponse>, Status> {
        let prefix = req.into_inner().prefix;
        let kvs = self
            .store
            .get_prefix(&prefix)
            .await
            .map_err(|e| e.to_grpc_status())?
            .into_iter()
            .map(|kv| proto::KeyValue {
                key: kv.key,
                value: kv.value,
                lease_id: kv.lease.map(|l| l.0).unwrap_or(0),
            })
            .collect();
        Ok(Response::new(proto::GetPrefixResponse { kvs }))
    }

    async fn delete(
        &self,
        req: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let key = req.into_inner().key;
        let deleted = self
            .store
            .delete(&key)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::DeleteResponse { deleted }))
    }

    async fn keep_alive_once(
        &self,
        req: Request<proto::KeepAliveRequest>,
    ) -> Result<Response<proto::KeepAliveResponse>, Status> {
        let lease = LeaseId(req.into_inner().lease_id);
        self.store
            .keep_alive_once(lease)
            .await
            .map_err(|e| e.to_grpc_status())?;
        let ttl_secs = self
            .store
            .lease_remaining(lease)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Response::new(proto::KeepAliveResponse { ttl_secs }))
    }

    type WatchStream = WatchResponseStream;

    async fn watch(
        &self,
        req: Request<proto::WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let prefix = req.into_inner().prefix;
        tracing::debug!("watch opened on {}", prefix);

        let events = self
            .store
            .watch_prefix(&prefix)
            .await
            .map_err(|e| e.to_grpc_status())?;
        let responses = events.map(|batch| {
            batch
                .map(|events| proto::WatchResponse {
                    events: events.into_iter().map(event_to_proto).collect(),
                })
                .map_err(|e| e.to_grpc_status())
        });
        Ok(Response::new(Box::pin(responses)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_wire_encoding() {
        assert_eq!(lease_from_wire(0), None);
        assert_eq!(lease_from_wire(9), Some(LeaseId(9)));
    }

    #[test]
    fn test_event_to_proto() {
        let event = event_to_proto(WatchEvent::delete("/k"));
        assert_eq!(event.r#type, proto::EventType::Delete as i32);
        assert_eq!(event.key, "/k");
        assert!(event.value.is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_empty_key() {
        let service = StoreGrpcService::new(Arc::new(MemoryStore::new()));
        let status = service
            .put(Request::new(proto::PutRequest {
                key: String::new(),
                value: "v".into(),
                lease_id: 0,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_keep_alive_unknown_lease() {
        let service = StoreGrpcService::new(Arc::new(MemoryStore::new()));
        let status = service
            .keep_alive_once(Request::new(proto::KeepAliveRequest { lease_id: 77 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
