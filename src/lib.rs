//! # minilb
//!
//! Client-side service discovery and call routing for RPC clients, backed by a
//! TTL-leased coordination store:
//! - Registrar: keeps an instance's leased record alive, re-granting on failure
//! - Resolver: mirrors a store prefix into a local address list via watch
//! - Picker: per-call selection, round robin or routing-key affinity
//! - A reference leased store, served over gRPC with an HTTP admin API
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  grant/put/keepalive  ┌──────────────────────┐
//! │  Registrar   │──────────────────────▶│  Coordination store  │
//! │ (per server) │                       │  /svc/echo/1.0/...   │
//! └──────────────┘                       └──────────┬───────────┘
//!                                                   │ watch
//!                                        ┌──────────▼───────────┐
//!                                        │       Resolver       │
//!                                        └──────────┬───────────┘
//!                                                   │ address list
//!                                        ┌──────────▼───────────┐
//!                                        │    ConnectionPool    │
//!                                        └──────────┬───────────┘
//!                                                   │ ready set
//!                     CallContext        ┌──────────▼───────────┐
//!           caller ─────────────────────▶│        Picker        │
//!                                        └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a store
//! ```bash
//! minilb-store serve --grpc 0.0.0.0:2379 --http 0.0.0.0:2380
//! ```
//!
//! ### Register an instance
//! ```bash
//! minilb register --service echo --version 1.0 --address 10.0.0.1:9000 --ttl 9 --interval 5
//! ```
//!
//! ### Inspect
//! ```bash
//! minilb list --service echo --version 1.0
//! minilb watch --service echo --version 1.0
//! ```

pub mod balancer;
pub mod common;
pub mod discovery;
pub mod store;

// Re-export commonly used types
pub use balancer::{Balancer, Picker, Policy};
pub use common::{CallContext, Config, Error, Result, RoutingKey, ServiceInstance};
pub use discovery::{Registrar, Registry, Resolver};
pub use store::{CoordinationStore, GrpcStore, MemoryStore};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("minilb");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
