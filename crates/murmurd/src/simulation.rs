//! Deterministic emulated-cluster simulation
//!
//! Every node lives in this process, connected by a [`MemoryNetwork`] and
//! sharing one [`ManualClock`]. Nodes join one after another, a chosen set
//! crashes at a fixed tick, and the report states who noticed and when.

use crate::cli::SimulateArgs;
use murmur_membership::{
    Clock, JoinState, ManualClock, MembershipConfig, MembershipEvent, MembershipLog,
    MembershipNode, MemoryNetwork, NetworkStats, NodeAddress, TeeLog, TickReport, TracingLog,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Identity of the simulated node at `index`; node 0 is the introducer
pub fn identity(index: usize) -> NodeAddress {
    NodeAddress::new(index as u32 + 1, 0)
}

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub nodes: usize,
    pub ticks: u64,
    pub drop_rate: f64,
    pub seed: u64,
    pub join_interval: u64,
    pub fail_at: u64,
    pub fail_nodes: Vec<usize>,
    pub join_retry_ticks: u64,
    pub membership: MembershipConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 10,
            ticks: 700,
            drop_rate: 0.0,
            seed: 0,
            join_interval: 1,
            fail_at: 100,
            fail_nodes: Vec::new(),
            join_retry_ticks: 5,
            membership: MembershipConfig::new(identity(0)),
        }
    }
}

impl From<&SimulateArgs> for SimulationConfig {
    fn from(args: &SimulateArgs) -> Self {
        Self {
            nodes: args.nodes,
            ticks: args.ticks,
            drop_rate: args.drop_rate,
            seed: args.seed,
            join_interval: args.join_interval,
            fail_at: args.fail_at,
            fail_nodes: args.fail_nodes.clone(),
            join_retry_ticks: args.protocol.join_retry_ticks.max(1),
            membership: args.protocol.membership_config(identity(0)),
        }
    }
}

/// Membership changes stamped with the tick they happened at
#[derive(Debug, Clone)]
pub struct EventTimeline {
    clock: ManualClock,
    events: Arc<Mutex<Vec<(u64, MembershipEvent)>>>,
}

impl EventTimeline {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<(u64, MembershipEvent)> {
        self.events.lock().clone()
    }

    /// (tick, remover) for every removal of `removed`
    pub fn removals_of(&self, removed: NodeAddress) -> Vec<(u64, NodeAddress)> {
        self.events
            .lock()
            .iter()
            .filter_map(|(at, e)| match e {
                MembershipEvent::NodeRemoved { local, removed: r } if *r == removed => {
                    Some((*at, *local))
                }
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: MembershipEvent) {
        self.events.lock().push((self.clock.now(), event));
    }
}

impl MembershipLog for EventTimeline {
    fn node_added(&self, local: NodeAddress, added: NodeAddress) {
        self.push(MembershipEvent::NodeAdded { local, added });
    }

    fn node_removed(&self, local: NodeAddress, removed: NodeAddress) {
        self.push(MembershipEvent::NodeRemoved { local, removed });
    }
}

struct SimNode {
    node: MembershipNode,
    start_at: u64,
    started_at: Option<u64>,
    crashed_at: Option<u64>,
}

impl SimNode {
    fn is_running(&self) -> bool {
        self.started_at.is_some() && self.crashed_at.is_none()
    }
}

/// An emulated group driven tick by tick
pub struct Simulation {
    config: SimulationConfig,
    network: MemoryNetwork,
    clock: ManualClock,
    timeline: EventTimeline,
    nodes: Vec<SimNode>,
    totals: TickReport,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let network = MemoryNetwork::with_loss(config.drop_rate, config.seed);
        let clock = ManualClock::new();
        let timeline = EventTimeline::new(clock.clone());
        let log = Arc::new(TeeLog::new(TracingLog, timeline.clone()));

        let nodes = (0..config.nodes)
            .map(|index| {
                let address = identity(index);
                let node = MembershipNode::new(
                    address,
                    config.membership.clone(),
                    Arc::new(network.clone()),
                    Arc::new(clock.clone()),
                )
                .with_log(log.clone());
                network.register(address, node.inbound());
                SimNode {
                    node,
                    start_at: index as u64 * config.join_interval,
                    started_at: None,
                    crashed_at: None,
                }
            })
            .collect();

        Self {
            config,
            network,
            clock,
            timeline,
            nodes,
            totals: TickReport::default(),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn timeline(&self) -> &EventTimeline {
        &self.timeline
    }

    pub fn node(&self, index: usize) -> Option<&MembershipNode> {
        self.nodes.get(index).map(|n| &n.node)
    }

    /// Run one global tick
    pub fn step(&mut self) {
        let now = self.clock.now();

        for sim in self.nodes.iter_mut() {
            if sim.started_at.is_none() && now >= sim.start_at {
                sim.started_at = Some(now);
                if let Err(e) = sim.node.start() {
                    error!(node = %sim.node.address(), error = %e, "Node failed to start");
                }
            }
        }

        if now == self.config.fail_at {
            for &index in &self.config.fail_nodes {
                if let Some(sim) = self.nodes.get_mut(index) {
                    if sim.crashed_at.is_none() {
                        info!(node = %sim.node.address(), tick = now, "Crashing node");
                        self.network.isolate(sim.node.address());
                        sim.crashed_at = Some(now);
                    }
                }
            }
        }

        let retry = self.config.join_retry_ticks.max(1);
        for sim in self.nodes.iter_mut().filter(|n| n.is_running()) {
            let waited = sim.started_at.map_or(0, |s| now - s);
            if sim.node.join_state() == JoinState::Bootstrapping && waited > 0 && waited % retry == 0 {
                if let Err(e) = sim.node.rejoin() {
                    debug!(node = %sim.node.address(), error = %e, "Join retry skipped");
                }
            }
            self.totals += sim.node.tick();
        }

        self.clock.advance();
    }

    /// Run the configured number of ticks and summarize
    pub fn run(mut self) -> SimulationReport {
        info!(
            nodes = self.config.nodes,
            ticks = self.config.ticks,
            drop_rate = self.config.drop_rate,
            "Starting simulation"
        );
        for _ in 0..self.config.ticks {
            self.step();
        }
        self.report()
    }

    pub fn report(&self) -> SimulationReport {
        let crashed: BTreeSet<NodeAddress> = self
            .nodes
            .iter()
            .filter(|n| n.crashed_at.is_some())
            .map(|n| n.node.address())
            .collect();
        let survivors: Vec<NodeAddress> = self
            .nodes
            .iter()
            .filter(|n| n.is_running())
            .map(|n| n.node.address())
            .collect();

        let views = self
            .nodes
            .iter()
            .map(|sim| {
                let members = sim.node.members();
                NodeView {
                    address: sim.node.address(),
                    state: sim.node.join_state(),
                    heartbeat: sim.node.heartbeat(),
                    crashed: sim.crashed_at.is_some(),
                    alive: sim.node.alive_members(),
                    suspected: members
                        .iter()
                        .filter(|e| !e.is_alive())
                        .map(|e| e.address)
                        .collect(),
                }
            })
            .collect();

        let failures = self
            .nodes
            .iter()
            .filter_map(|sim| {
                let failed_at = sim.crashed_at?;
                let address = sim.node.address();
                let removals = self.timeline.removals_of(address);
                let detected_by: BTreeSet<NodeAddress> =
                    removals.iter().map(|(_, by)| *by).collect();
                Some(FailureDetection {
                    address,
                    failed_at,
                    missing: survivors
                        .iter()
                        .filter(|s| !detected_by.contains(s))
                        .copied()
                        .collect(),
                    detected_by: detected_by.into_iter().collect(),
                    first_removal: removals.iter().map(|(at, _)| *at).min(),
                    last_removal: removals.iter().map(|(at, _)| *at).max(),
                })
            })
            .collect();

        let false_removals = self
            .timeline
            .events()
            .into_iter()
            .filter_map(|(at, e)| match e {
                MembershipEvent::NodeRemoved { local, removed } if !crashed.contains(&removed) => {
                    Some(FalseRemoval {
                        at,
                        by: local,
                        removed,
                    })
                }
                _ => None,
            })
            .collect();

        SimulationReport {
            nodes: self.config.nodes,
            ticks: self.clock.now(),
            joined: self.nodes.iter().filter(|n| n.node.is_in_group()).count(),
            views,
            failures,
            false_removals,
            totals: self.totals,
            network: self.network.stats(),
        }
    }
}

/// Final table of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub address: NodeAddress,
    pub state: JoinState,
    pub heartbeat: i64,
    pub crashed: bool,
    pub alive: Vec<NodeAddress>,
    pub suspected: Vec<NodeAddress>,
}

/// How the group reacted to one crashed node
#[derive(Debug, Clone, Serialize)]
pub struct FailureDetection {
    pub address: NodeAddress,
    pub failed_at: u64,
    /// Survivors that removed it
    pub detected_by: Vec<NodeAddress>,
    /// Survivors that still had not removed it when the run ended
    pub missing: Vec<NodeAddress>,
    pub first_removal: Option<u64>,
    pub last_removal: Option<u64>,
}

impl FailureDetection {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Removal of a node that never crashed
#[derive(Debug, Clone, Serialize)]
pub struct FalseRemoval {
    pub at: u64,
    pub by: NodeAddress,
    pub removed: NodeAddress,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub nodes: usize,
    pub ticks: u64,
    pub joined: usize,
    pub views: Vec<NodeView>,
    pub failures: Vec<FailureDetection>,
    pub false_removals: Vec<FalseRemoval>,
    pub totals: TickReport,
    pub network: NetworkStats,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulated {} nodes for {} ticks", self.nodes, self.ticks)?;
        writeln!(f, "  Joined:          {}/{}", self.joined, self.nodes)?;
        writeln!(
            f,
            "  Messages:        {} sent, {} delivered, {} dropped",
            self.network.sent, self.network.delivered, self.network.dropped
        )?;
        writeln!(f, "  Malformed:       {}", self.totals.dropped)?;
        writeln!(f, "  False removals:  {}", self.false_removals.len())?;

        for failure in &self.failures {
            let latency = match failure.last_removal {
                Some(last) => format!("{} ticks", last.saturating_sub(failure.failed_at)),
                None => "never".to_string(),
            };
            writeln!(
                f,
                "  Failure {} at {}: removed by {} survivors, complete after {}",
                failure.address,
                failure.failed_at,
                failure.detected_by.len(),
                latency
            )?;
        }

        writeln!(f, "Final views:")?;
        for view in &self.views {
            let alive: Vec<String> = view.alive.iter().map(|a| a.to_string()).collect();
            let status = if view.crashed {
                "crashed".to_string()
            } else {
                view.state.to_string()
            };
            writeln!(
                f,
                "  {:<14} {:<13} hb={:<5} [{}]",
                view.address.to_string(),
                status,
                view.heartbeat,
                alive.join(", ")
            )?;
        }
        Ok(())
    }
}
