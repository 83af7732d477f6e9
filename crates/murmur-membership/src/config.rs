//! Membership configuration

use crate::address::NodeAddress;
use crate::error::{MembershipError, Result};
use serde::{Deserialize, Serialize};

/// Default introducer: host id 1, port 0
pub const DEFAULT_INTRODUCER: NodeAddress = NodeAddress::new(1, 0);

/// Peer selection for each dissemination round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Fanout {
    /// Gossip to every alive peer
    #[default]
    Broadcast,
    /// Gossip to at most `n` alive peers chosen at random
    Random(usize),
}

/// Protocol configuration for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Well-known address new members contact to join
    pub introducer: NodeAddress,

    /// Ticks without a heartbeat increase before an entry is suspected
    pub fail_timeout: u64,

    /// Further ticks before a suspected entry is removed
    pub remove_timeout: u64,

    /// Peer selection for gossip
    pub fanout: Fanout,

    /// Also send a direct HEARTBEAT to every alive peer each tick
    pub direct_heartbeats: bool,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            introducer: DEFAULT_INTRODUCER,
            fail_timeout: 5,
            remove_timeout: 20,
            fanout: Fanout::Broadcast,
            direct_heartbeats: false,
        }
    }
}

impl MembershipConfig {
    pub fn new(introducer: NodeAddress) -> Self {
        Self {
            introducer,
            ..Default::default()
        }
    }

    pub fn with_fail_timeout(mut self, ticks: u64) -> Self {
        self.fail_timeout = ticks;
        self
    }

    pub fn with_remove_timeout(mut self, ticks: u64) -> Self {
        self.remove_timeout = ticks;
        self
    }

    pub fn with_fanout(mut self, fanout: Fanout) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_direct_heartbeats(mut self, enabled: bool) -> Self {
        self.direct_heartbeats = enabled;
        self
    }

    /// Total silence before a peer disappears from the table
    pub fn removal_horizon(&self) -> u64 {
        self.fail_timeout.saturating_add(self.remove_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fail_timeout == 0 {
            return Err(MembershipError::InvalidConfig(
                "fail_timeout must be at least one tick".into(),
            ));
        }
        if self.fanout == Fanout::Random(0) {
            return Err(MembershipError::InvalidConfig(
                "random fanout must select at least one peer".into(),
            ));
        }
        if self.introducer.is_null() {
            return Err(MembershipError::InvalidConfig(
                "introducer address must not be null".into(),
            ));
        }
        Ok(())
    }
}
