use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

use super::{NetworkError, Transport};

const CHANNEL_CAPACITY: usize = 1024;

/// Process-local network keyed by address. Full queues drop the packet
/// the way a congested link would.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    routes: Arc<Mutex<HashMap<String, Sender<Vec<u8>>>>>,
    partitioned: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `address` and returns its inbound queue.
    pub fn register(&self, address: &str) -> Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).insert(address.to_string(), tx);
        rx
    }

    pub fn unregister(&self, address: &str) {
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).remove(address);
    }

    /// Cuts `address` off in both directions until [`heal`](Self::heal).
    pub fn partition(&self, address: &str) {
        self.partitioned.lock().unwrap_or_else(|e| e.into_inner()).insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.partitioned.lock().unwrap_or_else(|e| e.into_inner()).remove(address);
    }

    fn is_partitioned(&self, address: &str) -> bool {
        self.partitioned.lock().unwrap_or_else(|e| e.into_inner()).contains(address)
    }

    /// A transport whose writes originate from `address`.
    pub fn endpoint(&self, address: &str) -> InMemoryEndpoint {
        InMemoryEndpoint { network: self.clone(), local: address.to_string() }
    }

    fn deliver(&self, from: &str, to: &str, bytes: Vec<u8>) -> Result<(), NetworkError> {
        if self.is_partitioned(from) || self.is_partitioned(to) {
            return Err(NetworkError::SendError(to.to_string()));
        }
        let sender = {
            let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            routes.get(to).cloned()
        };
        let Some(sender) = sender else {
            return Err(NetworkError::PeerNotFound(to.to_string()));
        };
        sender.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => NetworkError::SendError(to.to_string()),
            TrySendError::Closed(_) => NetworkError::Closed,
        })
    }
}

/// One node's handle on an [`InMemoryNetwork`].
#[derive(Clone)]
pub struct InMemoryEndpoint {
    network: InMemoryNetwork,
    local: String,
}

#[async_trait]
impl Transport for InMemoryEndpoint {
    async fn write(&self, address: &str, bytes: Vec<u8>) -> Result<(), NetworkError> {
        self.network.deliver(&self.local, address, bytes)
    }
}
