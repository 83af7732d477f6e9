//! Local membership table
//!
//! One entry per known identity. Entries move Alive → Suspected → removed
//! and never back: a suspected entry ignores every later heartbeat.

use crate::address::NodeAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Heartbeat value carried by a suspected entry
pub const SUSPECTED_HEARTBEAT: i64 = -1;

/// Liveness state of a member entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Heartbeats are advancing
    Alive,
    /// No fresh heartbeat within the fail timeout, pending removal
    Suspected,
}

impl MemberState {
    pub fn is_alive(&self) -> bool {
        matches!(self, MemberState::Alive)
    }
}

/// A single row of the membership table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub address: NodeAddress,
    pub heartbeat: i64,
    /// Logical time of the last heartbeat increase
    pub last_updated: u64,
    pub state: MemberState,
}

impl MemberEntry {
    fn new(address: NodeAddress, heartbeat: i64, now: u64) -> Self {
        Self {
            address,
            heartbeat,
            last_updated: now,
            state: MemberState::Alive,
        }
    }

    /// Mark as suspected; the timestamp stays at the last real heartbeat
    fn mark_suspected(&mut self) {
        self.state = MemberState::Suspected;
        self.heartbeat = SUSPECTED_HEARTBEAT;
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// Ticks elapsed since the last heartbeat increase
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_updated)
    }
}

/// Result of merging one identity/heartbeat pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Ignored,
}

/// State changes made by one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub suspected: Vec<NodeAddress>,
    pub removed: Vec<NodeAddress>,
}

/// The local view of the group
#[derive(Debug, Clone, Default)]
pub struct MembershipTable {
    entries: HashMap<NodeAddress, MemberEntry>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a heartbeat observed for `address`.
    ///
    /// A sentinel (negative) heartbeat for an unknown address is ignored: a
    /// peer relaying a suspected entry is not evidence of liveness.
    pub fn merge(&mut self, address: NodeAddress, heartbeat: i64, now: u64) -> MergeOutcome {
        match self.entries.get_mut(&address) {
            Some(entry) => {
                if entry.is_alive() && heartbeat > entry.heartbeat {
                    entry.heartbeat = heartbeat;
                    entry.last_updated = now;
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Ignored
                }
            }
            None if heartbeat < 0 => MergeOutcome::Ignored,
            None => {
                self.entries
                    .insert(address, MemberEntry::new(address, heartbeat, now));
                MergeOutcome::Inserted
            }
        }
    }

    /// Age out stale entries, returning the identities removed.
    ///
    /// Alive entries silent for `fail_timeout` become suspected; suspected
    /// entries silent for `fail_timeout + remove_timeout` are deleted.
    /// An entry suspected by this pass is only deleted by a later one (or
    /// right away when `remove_timeout` is 0), so when sweeps are further
    /// apart than `remove_timeout` removal lands one sweep after the
    /// deadline. Ticking sweeps every period, which keeps it on time.
    pub fn sweep(&mut self, now: u64, fail_timeout: u64, remove_timeout: u64) -> Vec<NodeAddress> {
        self.sweep_report(now, fail_timeout, remove_timeout).removed
    }

    /// Same as [`sweep`](Self::sweep), also reporting new suspicions
    pub fn sweep_report(&mut self, now: u64, fail_timeout: u64, remove_timeout: u64) -> SweepReport {
        let remove_after = fail_timeout.saturating_add(remove_timeout);
        let mut report = SweepReport::default();

        for entry in self.entries.values_mut() {
            if entry.is_alive() && entry.age(now) >= fail_timeout {
                entry.mark_suspected();
                report.suspected.push(entry.address);
            }
        }

        // A suspicion raised in this pass gets at least one more sweep,
        // unless there is no grace period at all
        let fresh = &report.suspected;
        let mut removed = Vec::new();
        self.entries.retain(|address, entry| {
            let expired = !entry.is_alive()
                && entry.age(now) >= remove_after
                && (remove_timeout == 0 || !fresh.contains(address));
            if expired {
                removed.push(*address);
            }
            !expired
        });

        report.suspected.sort();
        removed.sort();
        report.removed = removed;
        report
    }

    /// Copy of every entry, ordered by address
    pub fn snapshot(&self) -> Vec<MemberEntry> {
        let mut entries: Vec<MemberEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.address);
        entries
    }

    pub fn get(&self, address: &NodeAddress) -> Option<&MemberEntry> {
        self.entries.get(address)
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.entries.contains_key(address)
    }

    pub fn remove(&mut self, address: &NodeAddress) -> Option<MemberEntry> {
        self.entries.remove(address)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberEntry> {
        self.entries.values()
    }

    pub fn alive_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_alive()).count()
    }

    /// Alive members other than `local`, ordered by address
    pub fn alive_peers(&self, local: &NodeAddress) -> Vec<NodeAddress> {
        let mut peers: Vec<NodeAddress> = self
            .entries
            .values()
            .filter(|e| e.is_alive() && &e.address != local)
            .map(|e| e.address)
            .collect();
        peers.sort();
        peers
    }
}
