use std::{sync::Arc, time::Duration};

use tally_common::env::NodeState;
use tally_consensus::{ClusterEvent, ClusterSettings};
use tally_node::{InMemoryNetwork, NodeBuilder, NodeConfig, TallyRuntime};

fn fast_settings() -> ClusterSettings {
    ClusterSettings {
        heartbeat_ms: 50,
        election_min_ms: 300,
        election_max_ms: 600,
        gossip_interval_ms: 50,
        liveness_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn configs(n: usize) -> Vec<NodeConfig> {
    let mut configs: Vec<NodeConfig> = (0..n)
        .map(|i| {
            let mut config = NodeConfig::generate("127.0.0.1", 7000 + i as u16);
            config.settings = fast_settings();
            config
        })
        .collect();
    let addresses: Vec<String> = configs.iter().map(|c| c.address.clone()).collect();
    for config in configs.iter_mut() {
        config.peers = addresses.iter().filter(|a| **a != config.address).cloned().collect();
    }
    configs
}

async fn start(network: &InMemoryNetwork, config: NodeConfig) -> TallyRuntime {
    let inbound = network.register(&config.address);
    let transport = Arc::new(network.endpoint(&config.address));
    let runtime = NodeBuilder::new(config).build(transport, inbound).unwrap();
    runtime.connect().await.unwrap();
    runtime
}

async fn wait_for<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Index of the single leader that every other given node follows.
async fn stable_leader(nodes: &[&TallyRuntime]) -> Option<usize> {
    let mut states = Vec::new();
    for node in nodes {
        states.push(node.get_state().await.ok()?);
    }
    let leaders: Vec<usize> = (0..states.len()).filter(|&i| states[i].state == NodeState::Leader).collect();
    let &[leader] = leaders.as_slice() else {
        return None;
    };
    let id = &states[leader].id;
    let followed = states
        .iter()
        .enumerate()
        .all(|(i, s)| i == leader || (s.state == NodeState::Follower && s.leader.as_ref() == Some(id)));
    followed.then_some(leader)
}

async fn all_have(nodes: &[&TallyRuntime], key: &str, value: &str) -> bool {
    for node in nodes {
        match node.get_value(key).await {
            Ok(Some(v)) if v == value => {}
            _ => return false,
        }
    }
    true
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_nodes_elect_replicate_and_fail_over() {
    let network = InMemoryNetwork::new();
    let mut nodes = Vec::new();
    for config in configs(4) {
        nodes.push(start(&network, config).await);
    }
    let mut events = nodes[0].subscribe();

    let all: Vec<&TallyRuntime> = nodes.iter().collect();
    assert!(wait_for(Duration::from_secs(15), || { let all = &all; async move { stable_leader(all).await.is_some() } }).await, "no leader");
    let leader = stable_leader(&all).await.unwrap();

    let pusher = (leader + 1) % 4;
    nodes[pusher].push_command("color", "blue").await.unwrap();
    assert!(wait_for(Duration::from_secs(10), || all_have(&all, "color", "blue")).await);

    let mut saw_commit = false;
    while let Ok(event) = events.try_recv() {
        saw_commit |= matches!(event, ClusterEvent::Commit { .. });
    }
    assert!(saw_commit);

    network.partition(nodes[leader].address());
    nodes[leader].disconnect().await.unwrap();
    let rest: Vec<&TallyRuntime> = nodes.iter().enumerate().filter(|(i, _)| *i != leader).map(|(_, n)| n).collect();
    assert!(wait_for(Duration::from_secs(20), || { let rest = &rest; async move { stable_leader(rest).await.is_some() } }).await, "no new leader");

    rest[0].push_command("color", "green").await.unwrap();
    assert!(wait_for(Duration::from_secs(10), || all_have(&rest, "color", "green")).await);

    for node in &rest {
        let state = node.get_state().await.unwrap();
        assert_eq!(state.last.committed_index, 2);
    }
    for node in &nodes {
        node.disconnect().await.unwrap();
    }
}

#[tokio::test]
async fn test_single_node_restarts_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = NodeConfig::generate("127.0.0.1", 7100);
    config.settings = fast_settings();
    config.data_dir = Some(dir.path().to_string_lossy().into_owned());

    let network = InMemoryNetwork::new();
    let node = start(&network, config.clone()).await;
    assert!(node.push_command("k", "v1").await.is_ok());
    let single = [&node];
    assert!(wait_for(Duration::from_secs(5), || all_have(&single, "k", "v1")).await);
    let term = node.get_state().await.unwrap().term;
    node.disconnect().await.unwrap();
    assert!(node.get_state().await.is_err());
    assert!(node.connect().await.is_err());

    network.unregister(&config.address);
    let node = start(&network, config).await;
    let state = node.get_state().await.unwrap();
    assert!(state.term >= term);
    assert_eq!(state.last.committed_index, 1);
    assert_eq!(node.get_value("k").await.unwrap().as_deref(), Some("v1"));
    node.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_join_rejects_bad_address() {
    let network = InMemoryNetwork::new();
    let node = start(&network, NodeConfig::generate("127.0.0.1", 7200)).await;
    assert!(node.join("tcp://nowhere").await.is_err());

    let other = NodeConfig::generate("127.0.0.1", 7201);
    let (bare, _) = other.address.rsplit_once('/').unwrap();
    assert!(node.join(bare).await.is_err());
    assert_eq!(node.get_state().await.unwrap().members, 1);

    assert!(node.join(&other.address).await.unwrap());
    assert!(!node.join(&other.address).await.unwrap());
    assert_eq!(node.get_state().await.unwrap().members, 2);
    node.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_compaction_through_runtime() {
    let network = InMemoryNetwork::new();
    let mut config = NodeConfig::generate("127.0.0.1", 7300);
    config.settings = fast_settings();
    let node = start(&network, config).await;
    let single = [&node];

    node.push_command("k", "v1").await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || all_have(&single, "k", "v1")).await);
    node.push_command("k", "v2").await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || all_have(&single, "k", "v2")).await);

    assert_eq!(node.compact().await.unwrap(), 1);
    assert_eq!(node.get_value("k").await.unwrap().as_deref(), Some("v2"));
    assert_eq!(node.get_state().await.unwrap().last.committed_index, 2);

    node.disconnect().await.unwrap();
    assert!(node.compact().await.is_err());
}
