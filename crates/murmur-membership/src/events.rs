//! Membership change log
//!
//! Purely observational: nothing in the protocol reads what is logged here.

use crate::address::NodeAddress;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// A membership change seen by one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MembershipEvent {
    /// `added` entered `local`'s table
    NodeAdded {
        local: NodeAddress,
        added: NodeAddress,
    },
    /// `removed` was purged from `local`'s table
    NodeRemoved {
        local: NodeAddress,
        removed: NodeAddress,
    },
}

/// Sink for membership changes
pub trait MembershipLog: Send + Sync {
    fn node_added(&self, local: NodeAddress, added: NodeAddress);
    fn node_removed(&self, local: NodeAddress, removed: NodeAddress);
}

/// Emits each change as a structured `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl MembershipLog for TracingLog {
    fn node_added(&self, local: NodeAddress, added: NodeAddress) {
        info!(node = %local, member = %added, "Member added");
    }

    fn node_removed(&self, local: NodeAddress, removed: NodeAddress) {
        info!(node = %local, member = %removed, "Member removed");
    }
}

/// Keeps every change in memory. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<MembershipEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MembershipEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn added_by(&self, local: NodeAddress) -> Vec<NodeAddress> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MembershipEvent::NodeAdded { local: l, added } if *l == local => Some(*added),
                _ => None,
            })
            .collect()
    }

    pub fn removed_by(&self, local: NodeAddress) -> Vec<NodeAddress> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MembershipEvent::NodeRemoved { local: l, removed } if *l == local => {
                    Some(*removed)
                }
                _ => None,
            })
            .collect()
    }

    /// Number of nodes that logged the removal of `removed`
    pub fn removal_count(&self, removed: NodeAddress) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, MembershipEvent::NodeRemoved { removed: r, .. } if *r == removed))
            .count()
    }
}

impl MembershipLog for EventRecorder {
    fn node_added(&self, local: NodeAddress, added: NodeAddress) {
        self.events
            .lock()
            .push(MembershipEvent::NodeAdded { local, added });
    }

    fn node_removed(&self, local: NodeAddress, removed: NodeAddress) {
        self.events
            .lock()
            .push(MembershipEvent::NodeRemoved { local, removed });
    }
}

/// Forwards every change to both logs
#[derive(Clone)]
pub struct TeeLog<A, B> {
    first: A,
    second: B,
}

impl<A, B> TeeLog<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: MembershipLog, B: MembershipLog> MembershipLog for TeeLog<A, B> {
    fn node_added(&self, local: NodeAddress, added: NodeAddress) {
        self.first.node_added(local, added);
        self.second.node_added(local, added);
    }

    fn node_removed(&self, local: NodeAddress, removed: NodeAddress) {
        self.first.node_removed(local, removed);
        self.second.node_removed(local, removed);
    }
}
