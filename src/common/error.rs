//! Error types for minilb

use crate::store::LeaseId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Store Errors ===
    #[error("Store error: {0}")]
    Store(String),

    #[error("Lease not found: {0}")]
    LeaseNotFound(LeaseId),

    // === Watch Errors ===
    #[error("Watch stream terminated: {0}")]
    StreamTerminated(String),

    #[error("Watcher lagged behind by {0} batches")]
    WatchLagged(u64),

    // === Routing Errors ===
    #[error("No ready connection for routing key {}", .0.as_deref().unwrap_or("<none>"))]
    RoutingMiss(Option<String>),

    #[error("No ready connections available")]
    NoReadyConnections,

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Transient store and network failures are; configuration errors and routing
    /// misses are not, retrying them yields the same answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_)
                | Error::LeaseNotFound(_)
                | Error::Grpc(_)
                | Error::Transport(_)
                | Error::ConnectionFailed(_)
                | Error::Timeout(_)
        )
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::LeaseNotFound(_) => tonic::Status::new(Code::NotFound, self.to_string()),
            Error::InvalidConfig(_) => tonic::Status::new(Code::InvalidArgument, self.to_string()),
            Error::Timeout(_) => tonic::Status::new(Code::DeadlineExceeded, self.to_string()),
            Error::WatchLagged(_) => tonic::Status::new(Code::DataLoss, self.to_string()),
            Error::StreamTerminated(_) => tonic::Status::new(Code::Aborted, self.to_string()),
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Store("down".into()).is_retryable());
        assert!(Error::LeaseNotFound(LeaseId(7)).is_retryable());
        assert!(!Error::InvalidConfig("ttl".into()).is_retryable());
        assert!(!Error::RoutingMiss(Some("a".into())).is_retryable());
    }

    #[test]
    fn test_routing_miss_message() {
        let err = Error::RoutingMiss(Some("10.0.0.1:9000".into()));
        assert!(err.to_string().contains("10.0.0.1:9000"));
        let err = Error::RoutingMiss(None);
        assert!(err.to_string().contains("<none>"));
    }

    #[test]
    fn test_grpc_status_mapping() {
        assert_eq!(
            Error::LeaseNotFound(LeaseId(1)).to_grpc_status().code(),
            tonic::Code::NotFound
        );
        assert_eq!(
            Error::InvalidConfig("x".into()).to_grpc_status().code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            Error::Store("x".into()).to_grpc_status().code(),
            tonic::Code::Internal
        );
    }
}
