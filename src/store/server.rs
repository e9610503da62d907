//! Store server

use crate::common::{Result, StoreConfig};
use crate::store::grpc::StoreGrpcService;
use crate::store::http::{create_router, AdminState};
use crate::store::MemoryStore;
use std::sync::Arc;

pub struct StoreServer {
    config: StoreConfig,
    store: Arc<MemoryStore>,
}

impl StoreServer {
    pub fn new(config: StoreConfig) -> Self {
        let store = Arc::new(MemoryStore::with_watch_buffer(config.watch_buffer));
        Self { config, store }
    }

    /// Shared handle to the backing store
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        tracing::info!("Starting store server");
        tracing::info!("  gRPC API: {}", self.config.grpc_addr);
        tracing::info!("  HTTP API: {}", self.config.http_addr);
        tracing::info!("  Lease sweep: {:?}", self.config.sweep_interval());

        let sweeper = self.store.spawn_sweeper(self.config.sweep_interval());

        let http_router = create_router(AdminState {
            store: self.store.clone(),
        });

        let grpc_service = StoreGrpcService::new(self.store.clone());
        let grpc_server = tonic::transport::Server::builder()
            .add_service(grpc_service.into_server())
            .serve(self.config.grpc_addr);

        let http_listener = tokio::net::TcpListener::bind(self.config.http_addr).await?;
        let http_server = axum::serve(http_listener, http_router);

        tracing::info!("✓ Store server ready");

        tokio::select! {
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            res = grpc_server => {
                if let Err(e) = res {
                    tracing::error!("gRPC server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            }
        }

        sweeper.abort();
        Ok(())
    }
}
