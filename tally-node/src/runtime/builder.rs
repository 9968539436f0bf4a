use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::info;

use tally_common::{
    auth::Authenticator,
    env::PendingEntry,
    error::{Result, TallyError},
    utils::{time::current_time_millis, NodeId},
};
use tally_consensus::{ClusterBuilder, ClusterEvent, ClusterStatus};
use tally_ledger::{Applier, KvStore, MemoryStore, RedbStore};

use crate::{
    config::NodeConfig,
    runtime::maestro::{Maestro, Request},
    transport::{PeerAddress, Transport},
};

const REQUEST_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 1024;

/// Handle on a node. Cheap calls are forwarded to the [`Maestro`] task.
pub struct TallyRuntime {
    id: NodeId,
    address: String,
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<ClusterEvent>,
    maestro: Mutex<Option<Maestro>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TallyRuntime {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Starts the actor. A node can be connected once.
    pub async fn connect(&self) -> Result<()> {
        let maestro = self
            .maestro
            .lock()
            .await
            .take()
            .ok_or_else(|| TallyError::Other("node was already connected".to_string()))?;
        let task = tokio::spawn(maestro.run());
        *self.task.lock().await = Some(task);
        info!("Node {} connected at {}", self.id.short(), self.address);
        Ok(())
    }

    /// Stops the actor for good and waits for it to finish.
    pub async fn disconnect(&self) -> Result<()> {
        self.maestro.lock().await.take();
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.lock().await.take() {
            task.await.map_err(|e| TallyError::Other(format!("node task failed: {e}")))?;
            info!("Node {} disconnected", self.id.short());
        }
        Ok(())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        if self.task.lock().await.is_none() {
            return Err(not_running());
        }
        let (reply, response) = oneshot::channel();
        self.requests.send(make(reply)).await.map_err(|_| not_running())?;
        response.await.map_err(|_| not_running())
    }

    /// Signs `key = value` and queues it for replication.
    pub async fn push_command(&self, key: &str, value: &str) -> Result<PendingEntry> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| Request::Push { key, value, reply }).await?
    }

    /// Adds the member at `tcp://host:port/<publicKeyHex>/<commandKeyHex>`.
    pub async fn join(&self, address: &str) -> Result<bool> {
        let address: PeerAddress = address.parse().map_err(|e| TallyError::Config(format!("{e}")))?;
        let command_key = address
            .command_key
            .clone()
            .ok_or_else(|| TallyError::Config(format!("{address} has no command key")))?;
        self.request(|reply| Request::Join { address, command_key, reply }).await?
    }

    pub async fn leave(&self, key: &NodeId) -> Result<bool> {
        let key = key.clone();
        self.request(|reply| Request::Leave { key, reply }).await?
    }

    pub async fn get_state(&self) -> Result<ClusterStatus> {
        self.request(|reply| Request::Status { reply }).await
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.request(|reply| Request::Value { key, reply }).await?
    }

    /// Compacts the applied prefix of the local log, keeping the latest
    /// write per key. Returns how many entries were removed.
    pub async fn compact(&self) -> Result<usize> {
        self.request(|reply| Request::Compact { reply }).await?
    }

    /// `State`, `Log`, `LogAck`, `Commit` and `Error` events, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }
}

fn not_running() -> TallyError {
    TallyError::Other("node is not running".to_string())
}

/// Wires a [`NodeConfig`] to a transport.
pub struct NodeBuilder {
    config: NodeConfig,
    applier: Option<Box<dyn Applier>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self { config, applier: None }
    }

    pub fn applier(mut self, applier: impl Applier + 'static) -> Self {
        self.applier = Some(Box::new(applier));
        self
    }

    /// `inbound` carries raw packets addressed to this node.
    pub fn build(self, transport: Arc<dyn Transport>, inbound: mpsc::Receiver<Vec<u8>>) -> Result<TallyRuntime> {
        let config = self.config;
        config.validate()?;
        let auth = config.authenticator()?;
        let id = auth.public_key();
        let peers = config.peer_addresses()?;

        let store: Arc<dyn KvStore> = match &config.data_dir {
            Some(dir) => Arc::new(RedbStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };

        let mut builder = ClusterBuilder::new(auth)
            .settings(config.settings.clone())
            .command_signer(config.command_signer()?)
            .store(store);
        for peer in &peers {
            builder = match &peer.command_key {
                Some(key) => builder.command_key(peer.key.clone(), key.clone()),
                None => builder.member(peer.key.clone()),
            };
        }
        if let Some(applier) = self.applier {
            builder = builder.boxed_applier(applier);
        }
        let cluster = builder.build(current_time_millis())?;

        let routes: HashMap<NodeId, String> = peers.into_iter().map(|p| (p.key.clone(), p.to_string())).collect();
        let (requests, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let maestro = Maestro {
            cluster,
            transport,
            routes,
            inbound,
            requests: request_rx,
            shutdown: shutdown_rx,
            events: events.clone(),
        };

        Ok(TallyRuntime {
            id,
            address: config.address,
            requests,
            events,
            maestro: Mutex::new(Some(maestro)),
            shutdown: Mutex::new(Some(shutdown)),
            task: Mutex::new(None),
        })
    }
}
