//! Multi-node tests over the in-process network
//!
//! These tests verify group-level behavior:
//! - Introducer join and table transfer
//! - Gossip convergence
//! - Failure detection and removal
//! - Robustness against malformed and lost messages

use bytes::Bytes;
use murmur_membership::{
    EventRecorder, Fanout, JoinState, ManualClock, MemberState, MembershipConfig,
    MembershipNode, MemoryNetwork, Message, NodeAddress, Transport,
};
use std::sync::Arc;

fn addr(host: u32) -> NodeAddress {
    NodeAddress::new(host, 0)
}

/// A group of nodes sharing one network, clock and event log
struct TestCluster {
    network: MemoryNetwork,
    clock: ManualClock,
    events: EventRecorder,
    nodes: Vec<MembershipNode>,
    stopped: Vec<NodeAddress>,
}

impl TestCluster {
    fn new(network: MemoryNetwork) -> Self {
        Self {
            network,
            clock: ManualClock::new(),
            events: EventRecorder::new(),
            nodes: Vec::new(),
            stopped: Vec::new(),
        }
    }

    fn add_node(&mut self, address: NodeAddress, config: MembershipConfig) {
        let node = MembershipNode::new(
            address,
            config,
            Arc::new(self.network.clone()),
            Arc::new(self.clock.clone()),
        )
        .with_log(Arc::new(self.events.clone()));
        self.network.register(address, node.inbound());
        self.nodes.push(node);
    }

    fn start_all(&mut self) {
        for node in &mut self.nodes {
            node.start().unwrap();
        }
    }

    /// Advance the clock and tick every running node once
    fn round(&mut self) {
        self.clock.advance();
        for node in &mut self.nodes {
            if !self.stopped.contains(&node.address()) {
                node.tick();
            }
        }
    }

    fn rounds(&mut self, n: usize) {
        for _ in 0..n {
            self.round();
        }
    }

    /// Resend join requests from nodes still waiting on a reply
    fn retry_joins(&mut self) {
        for node in &mut self.nodes {
            if node.join_state() == JoinState::Bootstrapping {
                node.rejoin().unwrap();
            }
        }
    }

    /// Crash a node: it stops ticking and nothing reaches or leaves it
    fn crash(&mut self, address: NodeAddress) {
        self.network.isolate(address);
        self.stopped.push(address);
    }

    fn node(&self, address: NodeAddress) -> &MembershipNode {
        self.nodes
            .iter()
            .find(|n| n.address() == address)
            .expect("node exists")
    }

    fn node_mut(&mut self, address: NodeAddress) -> &mut MembershipNode {
        self.nodes
            .iter_mut()
            .find(|n| n.address() == address)
            .expect("node exists")
    }
}

fn cluster(size: u32, config: MembershipConfig) -> TestCluster {
    let mut cluster = TestCluster::new(MemoryNetwork::new());
    for host in 1..=size {
        cluster.add_node(addr(host), config.clone());
    }
    cluster
}

#[test]
fn test_join_transfers_introducer_table() {
    let mut cluster = TestCluster::new(MemoryNetwork::new());
    cluster.add_node(addr(1), MembershipConfig::default());
    cluster.node_mut(addr(1)).start().unwrap();
    cluster.rounds(5);
    assert_eq!(cluster.node(addr(1)).heartbeat(), 5);

    cluster.add_node(addr(2), MembershipConfig::default());
    cluster.node_mut(addr(2)).start().unwrap();
    assert_eq!(cluster.node(addr(2)).join_state(), JoinState::Bootstrapping);

    // The introducer answers from the table it holds before refreshing its
    // own entry, then gossips the refreshed entry. Hand the joiner only the
    // reply so the gossip cannot overwrite what the reply carried.
    let (tap, mut tapped) = tokio::sync::mpsc::unbounded_channel();
    cluster.network.register(addr(2), tap);
    cluster.clock.advance();
    cluster.node_mut(addr(1)).tick();
    assert!(cluster.node(addr(1)).table().contains(&addr(2)));

    let reply = tapped.try_recv().unwrap();
    match Message::decode(&reply).unwrap() {
        Message::JoinReply { entries } => {
            let addrs: Vec<_> = entries.iter().map(|e| (e.address, e.heartbeat)).collect();
            assert_eq!(addrs, vec![(addr(1), 5), (addr(2), 0)]);
        }
        other => panic!("expected join reply, got {:?}", other),
    }
    assert!(matches!(
        Message::decode(&tapped.try_recv().unwrap()).unwrap(),
        Message::Gossip { .. }
    ));

    let inbound = cluster.node(addr(2)).inbound();
    inbound.send(reply).unwrap();
    cluster.network.register(addr(2), inbound);
    cluster.node_mut(addr(2)).tick();

    let joiner = cluster.node(addr(2));
    assert_eq!(joiner.join_state(), JoinState::InGroup);
    let members = joiner.members();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].address, addr(1));
    assert_eq!(members[0].heartbeat, 5);
    assert_eq!(members[1].address, addr(2));
    assert_eq!(members[1].heartbeat, joiner.heartbeat());

    assert!(cluster.node(addr(1)).table().contains(&addr(2)));
}

#[test]
fn test_three_nodes_converge() {
    let mut cluster = cluster(3, MembershipConfig::default());
    cluster.start_all();
    cluster.rounds(2);

    let everyone = vec![addr(1), addr(2), addr(3)];
    for node in &cluster.nodes {
        assert!(node.is_in_group());
        assert_eq!(node.alive_members(), everyone, "view of {}", node.address());
    }

    // Every node logged every member exactly once
    for node in &cluster.nodes {
        let mut added = cluster.events.added_by(node.address());
        added.sort();
        assert_eq!(added, everyone);
    }
}

#[test]
fn test_crashed_node_removed_once_everywhere() {
    let config = MembershipConfig::default()
        .with_fail_timeout(5)
        .with_remove_timeout(20);
    let mut cluster = cluster(3, config);
    cluster.start_all();
    cluster.rounds(3);

    cluster.crash(addr(3));

    // Suspected once the fail timeout passes, still listed
    cluster.rounds(6);
    for host in [1, 2] {
        let entry = cluster.node(addr(host)).table().get(&addr(3)).cloned();
        let entry = entry.expect("suspect still listed");
        assert_eq!(entry.state, MemberState::Suspected);
        assert_eq!(entry.heartbeat, -1);
        assert_eq!(cluster.node(addr(host)).alive_members(), vec![addr(1), addr(2)]);
    }

    cluster.rounds(30);
    assert_eq!(cluster.events.removal_count(addr(3)), 2);
    for host in [1, 2] {
        assert_eq!(cluster.events.removed_by(addr(host)), vec![addr(3)]);
        assert!(!cluster.node(addr(host)).table().contains(&addr(3)));
    }

    // Stays gone: survivors relay nothing that could resurrect it
    cluster.rounds(50);
    assert_eq!(cluster.events.removal_count(addr(3)), 2);
    for host in [1, 2] {
        let added = cluster.events.added_by(addr(host));
        assert_eq!(added.iter().filter(|a| **a == addr(3)).count(), 1);
    }
}

#[test]
fn test_survivors_never_suspect_each_other() {
    let mut cluster = cluster(4, MembershipConfig::default().with_fail_timeout(3));
    cluster.start_all();
    cluster.rounds(2);
    cluster.crash(addr(4));
    cluster.rounds(40);

    for host in 1..=3 {
        let node = cluster.node(addr(host));
        assert_eq!(node.alive_members(), vec![addr(1), addr(2), addr(3)]);
    }
    assert!(cluster.events.removed_by(addr(1)).iter().all(|a| *a == addr(4)));
}

#[test]
fn test_malformed_message_is_skipped() {
    let mut cluster = cluster(1, MembershipConfig::default());
    cluster.start_all();

    let heartbeat = Message::Heartbeat {
        sender: addr(9),
        heartbeat: 4,
    }
    .encode();
    let network = cluster.network.clone();
    network
        .send(addr(9), addr(1), Bytes::from_static(b"\x00garbage"))
        .unwrap();
    network.send(addr(9), addr(1), heartbeat.slice(..5)).unwrap();
    network.send(addr(9), addr(1), heartbeat).unwrap();

    cluster.clock.advance();
    let report = cluster.node_mut(addr(1)).tick();
    assert_eq!(report.received, 3);
    assert_eq!(report.dropped, 2);
    assert_eq!(cluster.node(addr(1)).table().get(&addr(9)).unwrap().heartbeat, 4);
}

#[test]
fn test_random_fanout_converges() {
    let config = MembershipConfig::default()
        .with_fanout(Fanout::Random(2))
        .with_fail_timeout(10);
    let mut cluster = cluster(6, config);
    cluster.start_all();
    cluster.rounds(20);

    let everyone: Vec<_> = (1..=6).map(addr).collect();
    for node in &cluster.nodes {
        assert_eq!(node.alive_members(), everyone, "view of {}", node.address());
    }
}

#[test]
fn test_direct_heartbeats_keep_peers_fresh() {
    let config = MembershipConfig::default().with_direct_heartbeats(true);
    let mut cluster = cluster(3, config);
    cluster.start_all();
    cluster.rounds(10);

    let now = 10;
    for node in &cluster.nodes {
        for entry in node.members() {
            assert!(entry.is_alive());
            assert!(entry.age(now) <= 1, "{} sees stale {}", node.address(), entry.address);
        }
    }
}

#[test]
fn test_lossy_network_with_join_retries() {
    let network = MemoryNetwork::with_loss(0.2, 42);
    let mut cluster = TestCluster::new(network);
    let config = MembershipConfig::default().with_fail_timeout(8);
    for host in 1..=5 {
        cluster.add_node(addr(host), config.clone());
    }
    cluster.start_all();

    for round in 1..=60 {
        cluster.round();
        if round % 3 == 0 {
            cluster.retry_joins();
        }
    }

    for node in &cluster.nodes {
        assert!(node.is_in_group(), "{} never joined", node.address());
        assert!(node.table().contains(&addr(1)));
    }
    assert!(cluster.network.stats().dropped > 0);
}

#[test]
fn test_left_node_is_eventually_removed() {
    let config = MembershipConfig::default()
        .with_fail_timeout(2)
        .with_remove_timeout(4);
    let mut cluster = cluster(3, config);
    cluster.start_all();
    cluster.rounds(2);

    cluster.node_mut(addr(2)).leave();
    cluster.network.unregister(&addr(2));
    cluster.rounds(10);

    assert_eq!(cluster.node(addr(2)).join_state(), JoinState::Left);
    for host in [1, 3] {
        assert_eq!(cluster.node(addr(host)).alive_members(), vec![addr(1), addr(3)]);
        assert!(!cluster.node(addr(host)).table().contains(&addr(2)));
    }
}
