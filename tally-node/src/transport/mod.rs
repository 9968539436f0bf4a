pub mod address;
pub mod in_memory;

pub use address::PeerAddress;
pub use in_memory::InMemoryNetwork;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to send message to {0}")]
    SendError(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Transport closed")]
    Closed,
}

/// Delivers encoded packets. Inbound bytes reach the node through the
/// receiver handed to the runtime builder.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn write(&self, address: &str, bytes: Vec<u8>) -> Result<(), NetworkError>;
}
