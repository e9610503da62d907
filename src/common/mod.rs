//! Common utilities and types shared across minilb

pub mod config;
pub mod error;
pub mod routing;
pub mod utils;

pub use config::{
    BalancerConfig, Config, RegistrarConfig, StoreConfig, LEASE_SAFETY_MARGIN_SECS,
    MAX_LEASE_TTL_SECS,
};
pub use error::{Error, Result};
pub use routing::{CallContext, KeyExtractor, RoutingKey, ROUTING_KEY_METADATA};
pub use utils::{instance_key, timestamp_now_millis, validate_segment, watch_key, ServiceInstance};
