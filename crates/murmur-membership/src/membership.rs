//! Gossip membership node
//!
//! A [`MembershipNode`] is driven entirely by its scheduler:
//!
//! 1. [`start`](MembershipNode::start) validates the local identity and
//!    either self-admits (introducer) or sends a JOIN-REQUEST.
//! 2. [`tick`](MembershipNode::tick) is called once per period. It bumps the
//!    local heartbeat, drains the inbound queue, and, once the node is in the
//!    group, refreshes its own entry, ages out silent peers and gossips the
//!    table.
//!
//! Nothing here blocks or spawns: sends are fire-and-forget and replies show
//! up as ordinary inbound buffers on a later tick.

use crate::address::NodeAddress;
use crate::clock::Clock;
use crate::config::{Fanout, MembershipConfig};
use crate::error::{MembershipError, Result};
use crate::events::{MembershipLog, TracingLog};
use crate::observability::MembershipMetrics;
use crate::protocol::{GossipEntry, Message, MessageType};
use crate::table::{MemberEntry, MembershipTable, MergeOutcome};
use crate::transport::{Inbound, Transport};
use bytes::Bytes;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a node's group membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinState {
    /// `start` not called yet
    NotStarted,
    /// Local state initialized, join not yet attempted
    Initialized,
    /// JOIN-REQUEST sent, waiting for the reply
    Bootstrapping,
    /// Part of the group
    InGroup,
    /// Initialization failed; the node is halted
    Failed,
    /// Left the group; the node is halted
    Left,
}

impl JoinState {
    /// Whether ticks do any work in this state
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JoinState::Initialized | JoinState::Bootstrapping | JoinState::InGroup
        )
    }
}

impl fmt::Display for JoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinState::NotStarted => "not_started",
            JoinState::Initialized => "initialized",
            JoinState::Bootstrapping => "bootstrapping",
            JoinState::InGroup => "in_group",
            JoinState::Failed => "failed",
            JoinState::Left => "left",
        };
        f.write_str(s)
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Inbound buffers drained
    pub received: usize,
    /// Inbound buffers discarded as malformed
    pub dropped: usize,
    /// Entries inserted into the table
    pub added: usize,
    /// Entries newly suspected by the sweep
    pub suspected: usize,
    /// Entries purged by the sweep
    pub removed: usize,
    /// Messages handed to the transport
    pub sent: usize,
}

impl AddAssign for TickReport {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.dropped += other.dropped;
        self.added += other.added;
        self.suspected += other.suspected;
        self.removed += other.removed;
        self.sent += other.sent;
    }
}

/// One member of the group
pub struct MembershipNode {
    address: NodeAddress,
    config: MembershipConfig,
    heartbeat: i64,
    state: JoinState,
    table: MembershipTable,
    inbound_tx: Inbound,
    inbound_rx: mpsc::UnboundedReceiver<Bytes>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    log: Arc<dyn MembershipLog>,
}

impl fmt::Debug for MembershipNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MembershipNode")
            .field("address", &self.address)
            .field("heartbeat", &self.heartbeat)
            .field("state", &self.state)
            .field("members", &self.table.len())
            .finish()
    }
}

impl MembershipNode {
    /// Create a node that logs membership changes through `tracing`
    pub fn new(
        address: NodeAddress,
        config: MembershipConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            address,
            config,
            heartbeat: 0,
            state: JoinState::NotStarted,
            table: MembershipTable::new(),
            inbound_tx,
            inbound_rx,
            transport,
            clock,
            log: Arc::new(TracingLog),
        }
    }

    /// Replace the membership change log
    pub fn with_log(mut self, log: Arc<dyn MembershipLog>) -> Self {
        self.log = log;
        self
    }

    // ==================== Accessors ====================

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn heartbeat(&self) -> i64 {
        self.heartbeat
    }

    pub fn join_state(&self) -> JoinState {
        self.state
    }

    pub fn is_in_group(&self) -> bool {
        self.state == JoinState::InGroup
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    /// Snapshot of the full table
    pub fn members(&self) -> Vec<MemberEntry> {
        self.table.snapshot()
    }

    /// Alive identities in the table, including this node, ordered
    pub fn alive_members(&self) -> Vec<NodeAddress> {
        self.table
            .snapshot()
            .into_iter()
            .filter(|e| e.is_alive())
            .map(|e| e.address)
            .collect()
    }

    /// Handle the network side uses to queue inbound buffers
    pub fn inbound(&self) -> Inbound {
        self.inbound_tx.clone()
    }

    // ==================== Lifecycle ====================

    /// Initialize local state and introduce this node to the group.
    ///
    /// An invalid identity or configuration halts the node: the error is
    /// returned and every later tick is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if let Err(e) = self.init() {
            error!(node = %self.address, error = %e, "Initialization failed, halting");
            self.state = JoinState::Failed;
            return Err(e);
        }
        self.introduce();
        Ok(())
    }

    fn init(&mut self) -> Result<()> {
        if self.address.is_null() {
            return Err(MembershipError::InvalidIdentity(self.address));
        }
        self.config.validate()?;

        self.heartbeat = 0;
        self.table.clear();
        self.state = JoinState::Initialized;
        debug!(node = %self.address, introducer = %self.config.introducer, "Node initialized");
        Ok(())
    }

    fn introduce(&mut self) {
        if self.address == self.config.introducer {
            info!(node = %self.address, "Starting up group");
            self.state = JoinState::InGroup;
            let now = self.clock.now();
            self.merge_entry(self.address, self.heartbeat, now);
        } else {
            info!(node = %self.address, introducer = %self.config.introducer, "Trying to join");
            self.state = JoinState::Bootstrapping;
            self.send_join_request();
        }
    }

    /// Re-send the JOIN-REQUEST while still bootstrapping.
    ///
    /// The node never retries on its own; the scheduler decides when.
    pub fn rejoin(&mut self) -> Result<()> {
        match self.state {
            JoinState::Bootstrapping => {
                debug!(node = %self.address, "Retrying join");
                self.send_join_request();
                Ok(())
            }
            JoinState::NotStarted | JoinState::Initialized => Err(MembershipError::NotStarted),
            _ => Ok(()),
        }
    }

    /// Leave the group and drop all membership state
    pub fn leave(&mut self) {
        if self.state == JoinState::Left {
            return;
        }
        info!(node = %self.address, members = self.table.len(), "Leaving group");
        self.table.clear();
        while self.inbound_rx.try_recv().is_ok() {}
        self.state = JoinState::Left;
    }

    fn send_join_request(&mut self) {
        let msg = Message::JoinRequest {
            sender: self.address,
            heartbeat: self.heartbeat,
        };
        self.send(self.config.introducer, &msg);
    }

    // ==================== Tick ====================

    /// Run one protocol period
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if !self.state.is_running() {
            return report;
        }

        self.heartbeat += 1;
        MembershipMetrics::set_heartbeat(self.heartbeat);

        self.drain_inbound(&mut report);

        // A bootstrapping node must not announce a view it hasn't received
        if !self.is_in_group() {
            return report;
        }

        let now = self.clock.now();
        if self.merge_entry(self.address, self.heartbeat, now) == MergeOutcome::Inserted {
            report.added += 1;
        }

        self.sweep(now, &mut report);
        self.disseminate(&mut report);

        MembershipMetrics::set_member_count(self.table.len());
        MembershipMetrics::set_alive_count(self.table.alive_count());
        self.dump_members(now);

        report
    }

    fn drain_inbound(&mut self, report: &mut TickReport) {
        while let Ok(buf) = self.inbound_rx.try_recv() {
            report.received += 1;
            match self.dispatch(&buf) {
                Ok(added) => report.added += added,
                Err(e) => {
                    warn!(node = %self.address, error = %e, len = buf.len(), "Dropping malformed message");
                    MembershipMetrics::increment_decode_errors();
                    report.dropped += 1;
                }
            }
        }
    }

    fn sweep(&mut self, now: u64, report: &mut TickReport) {
        let swept = self.table.sweep_report(
            now,
            self.config.fail_timeout,
            self.config.remove_timeout,
        );

        for suspect in &swept.suspected {
            warn!(node = %self.address, member = %suspect, "Member suspected");
        }
        for removed in &swept.removed {
            self.log.node_removed(self.address, *removed);
        }

        report.suspected += swept.suspected.len();
        report.removed += swept.removed.len();
        MembershipMetrics::increment_members_suspected(swept.suspected.len());
        MembershipMetrics::increment_members_removed(swept.removed.len());
    }

    fn disseminate(&mut self, report: &mut TickReport) {
        let peers = self.select_peers();
        if peers.is_empty() {
            return;
        }

        let gossip = Message::gossip(&self.table.snapshot());
        let payload = gossip.encode();
        for peer in &peers {
            if self.send_payload(*peer, MessageType::Gossip, payload.clone()) {
                report.sent += 1;
            }
        }

        if self.config.direct_heartbeats {
            let heartbeat = Message::Heartbeat {
                sender: self.address,
                heartbeat: self.heartbeat,
            }
            .encode();
            for peer in self.table.alive_peers(&self.address) {
                if self.send_payload(peer, MessageType::Heartbeat, heartbeat.clone()) {
                    report.sent += 1;
                }
            }
        }
    }

    fn select_peers(&self) -> Vec<NodeAddress> {
        let mut peers = self.table.alive_peers(&self.address);
        if let Fanout::Random(n) = self.config.fanout {
            if n < peers.len() {
                peers.shuffle(&mut rand::thread_rng());
                peers.truncate(n);
            }
        }
        peers
    }

    fn dump_members(&self, now: u64) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        for entry in self.table.snapshot() {
            trace!(
                node = %self.address,
                member = %entry.address,
                heartbeat = entry.heartbeat,
                last_updated = entry.last_updated,
                state = ?entry.state,
                now,
                "Member list"
            );
        }
    }

    // ==================== Dispatch ====================

    /// Decode one inbound buffer and route it to its handler.
    ///
    /// Returns the number of table entries inserted.
    fn dispatch(&mut self, data: &[u8]) -> Result<usize> {
        let msg = Message::decode(data)?;
        MembershipMetrics::increment_messages_received(msg.message_type().as_str());
        trace!(node = %self.address, kind = msg.message_type().as_str(), "Received message");

        let added = match msg {
            Message::JoinRequest { sender, heartbeat } => {
                self.handle_join_request(sender, heartbeat)
            }
            Message::JoinReply { entries } => self.handle_join_reply(&entries),
            Message::Heartbeat { sender, heartbeat } => self.handle_heartbeat(sender, heartbeat),
            Message::Gossip { entries } => self.handle_gossip(&entries),
        };
        Ok(added)
    }

    /// Admit the sender and reply with the current table
    fn handle_join_request(&mut self, sender: NodeAddress, heartbeat: i64) -> usize {
        debug!(node = %self.address, joiner = %sender, "Join request");
        let added = self.merge_remote(&[GossipEntry::new(sender, heartbeat)]);

        let reply = Message::join_reply(&self.table.snapshot());
        self.send(sender, &reply);
        added
    }

    /// Adopt the introducer's view and enter the group
    fn handle_join_reply(&mut self, entries: &[GossipEntry]) -> usize {
        let mut added = self.merge_remote(entries);

        if self.state == JoinState::Bootstrapping {
            info!(node = %self.address, members = entries.len(), "Joined group");
            self.state = JoinState::InGroup;
        }
        let now = self.clock.now();
        if self.merge_entry(self.address, self.heartbeat, now) == MergeOutcome::Inserted {
            added += 1;
        }
        added
    }

    fn handle_heartbeat(&mut self, sender: NodeAddress, heartbeat: i64) -> usize {
        self.merge_remote(&[GossipEntry::new(sender, heartbeat)])
    }

    fn handle_gossip(&mut self, entries: &[GossipEntry]) -> usize {
        self.merge_remote(entries)
    }

    /// Merge entries learned from a peer.
    ///
    /// Our own entry is only ever advanced by the local heartbeat.
    fn merge_remote(&mut self, entries: &[GossipEntry]) -> usize {
        let now = self.clock.now();
        let me = self.address;
        let mut added = 0;
        for entry in entries.iter().filter(|e| e.address != me) {
            if self.merge_entry(entry.address, entry.heartbeat, now) == MergeOutcome::Inserted {
                added += 1;
            }
        }
        added
    }

    fn merge_entry(&mut self, address: NodeAddress, heartbeat: i64, now: u64) -> MergeOutcome {
        let outcome = self.table.merge(address, heartbeat, now);
        if outcome == MergeOutcome::Inserted {
            self.log.node_added(self.address, address);
            MembershipMetrics::increment_members_added();
        }
        outcome
    }

    // ==================== Send ====================

    fn send(&self, to: NodeAddress, msg: &Message) -> bool {
        self.send_payload(to, msg.message_type(), msg.encode())
    }

    fn send_payload(&self, to: NodeAddress, kind: MessageType, payload: Bytes) -> bool {
        let len = payload.len();
        match self.transport.send(self.address, to, payload) {
            Ok(()) => {
                MembershipMetrics::increment_messages_sent(kind.as_str(), len);
                true
            }
            Err(e) => {
                warn!(node = %self.address, %to, kind = kind.as_str(), error = %e, "Send failed");
                MembershipMetrics::increment_send_failures();
                false
            }
        }
    }
}
