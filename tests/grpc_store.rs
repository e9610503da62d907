//! Store protocol round trips against a served MemoryStore

use futures_util::StreamExt;
use minilb::common::{Error, RegistrarConfig, ServiceInstance};
use minilb::discovery::{Registrar, Resolver, ResolverState};
use minilb::store::grpc::StoreGrpcService;
use minilb::store::{CoordinationStore, EventType, GrpcStore, LeaseId, MemoryStore, WatchEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::TcpListenerStream;

/// Serve `store` on an ephemeral port and connect a client to it
async fn serve(store: Arc<MemoryStore>) -> GrpcStore {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(StoreGrpcService::new(store).into_server())
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });

    GrpcStore::connect(addr.to_string()).await.unwrap()
}

#[tokio::test]
async fn test_key_operations() {
    let backend = Arc::new(MemoryStore::new());
    let client = serve(backend.clone()).await;

    client.put("/svc/echo/1.0/a:1", "a:1", None).await.unwrap();
    client.put("/svc/echo/1.0/b:1", "b:1", None).await.unwrap();
    assert_eq!(
        client.get("/svc/echo/1.0/a:1").await.unwrap(),
        Some("a:1".to_string())
    );
    assert_eq!(backend.get("/svc/echo/1.0/b:1").await.unwrap(), Some("b:1".into()));

    let kvs = client.get_prefix("/svc/echo/1.0").await.unwrap();
    let keys: Vec<&str> = kvs.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["/svc/echo/1.0/a:1", "/svc/echo/1.0/b:1"]);

    assert!(client.delete("/svc/echo/1.0/a:1").await.unwrap());
    assert!(!client.delete("/svc/echo/1.0/a:1").await.unwrap());
    assert_eq!(client.get("/svc/echo/1.0/a:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_leases() {
    let backend = Arc::new(MemoryStore::new());
    let client = serve(backend.clone()).await;

    let lease = client.grant(10).await.unwrap();
    client.put("/k", "v", Some(lease)).await.unwrap();
    client.keep_alive_once(lease).await.unwrap();
    assert!(backend.lease_remaining(lease).is_some());

    let kvs = client.get_prefix("/k").await.unwrap();
    assert_eq!(kvs[0].lease, Some(lease));

    let bogus = LeaseId(9_999);
    assert!(matches!(
        client.keep_alive_once(bogus).await,
        Err(Error::LeaseNotFound(id)) if id == bogus
    ));
    assert!(matches!(
        client.put("/k2", "v", Some(bogus)).await,
        Err(Error::LeaseNotFound(_))
    ));
    assert!(client.grant(0).await.is_err());
    assert!(client.grant(u64::MAX).await.is_err());
    assert_eq!(backend.stats().unwrap().leases, 1);
}

#[tokio::test]
async fn test_watch_delivers_batches() {
    let backend = Arc::new(MemoryStore::new());
    let client = serve(backend.clone()).await;

    let mut events = client.watch_prefix("/svc/echo").await.unwrap();
    backend.put("/svc/other/1.0/x:1", "x:1", None).await.unwrap();
    backend.put("/svc/echo/1.0/a:1", "a:1", None).await.unwrap();
    backend.delete("/svc/echo/1.0/a:1").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first, vec![WatchEvent::put("/svc/echo/1.0/a:1", "a:1")]);

    let second = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].kind, EventType::Delete);
    assert_eq!(second[0].value, None);
}

#[tokio::test]
async fn test_registrar_and_resolver_over_grpc() {
    let backend = Arc::new(MemoryStore::new());
    let client: Arc<dyn CoordinationStore> = Arc::new(serve(backend.clone()).await);

    let resolver = Resolver::start(client.clone(), "/svc/echo/1.0", |_: Vec<String>| {});
    let mut states = resolver.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ResolverState::Watching),
    )
    .await
    .unwrap()
    .unwrap();

    let instance = ServiceInstance::new("svc", "echo", "1.0", "127.0.0.1:9000");
    let registrar = Registrar::start_instance(client.clone(), &instance, RegistrarConfig::new(10, 5))
        .await
        .unwrap();

    let mut addresses = resolver.address_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        addresses.wait_for(|a| *a == vec!["127.0.0.1:9000".to_string()]),
    )
    .await
    .unwrap()
    .unwrap();

    registrar.stop().await;
    tokio::time::timeout(Duration::from_secs(5), addresses.wait_for(|a| a.is_empty()))
        .await
        .unwrap()
        .unwrap();

    resolver.stop().await;
}
