use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{self, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info};

use tally_common::{
    env::{Packet, PendingEntry},
    error::Result,
    utils::{time::current_time_millis, NodeId},
};
use tally_consensus::{Cluster, ClusterEvent, ClusterStatus, Outgoing};

use crate::transport::{PeerAddress, Transport};

/// Calls from [`TallyRuntime`](super::builder::TallyRuntime) into the actor.
pub(crate) enum Request {
    Push { key: String, value: String, reply: oneshot::Sender<Result<PendingEntry>> },
    Join { address: PeerAddress, command_key: NodeId, reply: oneshot::Sender<Result<bool>> },
    Leave { key: NodeId, reply: oneshot::Sender<Result<bool>> },
    Status { reply: oneshot::Sender<ClusterStatus> },
    Value { key: String, reply: oneshot::Sender<Result<Option<String>>> },
    Compact { reply: oneshot::Sender<Result<usize>> },
}

/// Owns the [`Cluster`] and serialises everything that touches it: inbound
/// packets, API requests and both timers.
pub struct Maestro {
    pub(crate) cluster: Cluster,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) routes: HashMap<NodeId, String>,
    pub(crate) inbound: mpsc::Receiver<Vec<u8>>,
    pub(crate) requests: mpsc::Receiver<Request>,
    pub(crate) shutdown: oneshot::Receiver<()>,
    pub(crate) events: broadcast::Sender<ClusterEvent>,
}

impl Maestro {
    pub async fn run(mut self) {
        self.cluster.start(current_time_millis());
        self.publish();
        info!("Maestro running for {}", self.cluster.id().short());

        let settings = self.cluster.settings().clone();
        let mut tick_timer = time::interval(Duration::from_millis((settings.heartbeat_ms / 2).max(1)));
        let mut gossip_timer = time::interval(Duration::from_millis(settings.gossip_interval_ms));
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        gossip_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let out = tokio::select! {
                _ = &mut self.shutdown => break,
                inbound = self.inbound.recv() => match inbound {
                    Some(bytes) => self.on_inbound(&bytes),
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.serve(request),
                    None => break,
                },
                _ = tick_timer.tick() => self.cluster.tick(current_time_millis()),
                _ = gossip_timer.tick() => self.cluster.gossip_tick(current_time_millis()),
            };
            self.dispatch(out).await;
            self.publish();
        }

        self.cluster.stop();
        self.publish();
        info!("Maestro for {} stopped", self.cluster.id().short());
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Vec<Outgoing> {
        match Packet::decode(bytes) {
            Ok(packet) => self.cluster.handle(packet, current_time_millis()),
            Err(e) => {
                debug!("Dropping undecodable packet: {}", e);
                Vec::new()
            }
        }
    }

    fn serve(&mut self, request: Request) -> Vec<Outgoing> {
        let now = current_time_millis();
        match request {
            Request::Push { key, value, reply } => {
                let _ = reply.send(self.cluster.push_command(&key, &value, now));
            }
            Request::Join { address, command_key, reply } => {
                let result = self.cluster.join(address.key.clone(), command_key, now);
                if result.is_ok() {
                    self.routes.insert(address.key.clone(), address.to_string());
                }
                let _ = reply.send(result);
            }
            Request::Leave { key, reply } => {
                let result = self.cluster.leave(&key, now);
                if matches!(result, Ok(true)) {
                    self.routes.remove(&key);
                }
                let _ = reply.send(result);
            }
            Request::Status { reply } => {
                let _ = reply.send(self.cluster.status());
            }
            Request::Value { key, reply } => {
                let _ = reply.send(self.cluster.get_value(&key));
            }
            Request::Compact { reply } => {
                let _ = reply.send(self.cluster.compact());
            }
        }
        Vec::new()
    }

    /// Transport failures never stop the loop; they become `Error` events.
    async fn dispatch(&mut self, out: Vec<Outgoing>) {
        for Outgoing { to, packet } in out {
            let Some(address) = self.routes.get(&to) else {
                debug!("No route to {}", to.short());
                continue;
            };
            let bytes = match packet.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode {}: {}", packet.message_type(), e);
                    continue;
                }
            };
            if let Err(e) = self.transport.write(address, bytes).await {
                debug!("Write to {} failed: {}", to.short(), e);
                let _ = self.events.send(ClusterEvent::Error { message: e.to_string() });
            }
        }
    }

    fn publish(&mut self) {
        for event in self.cluster.drain_events() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}
