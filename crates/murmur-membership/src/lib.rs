//! # Murmur Membership
//!
//! Gossip-style group membership with heartbeat failure detection:
//! - **Introducer join**: new nodes request the table from a well-known node
//! - **Heartbeats**: each node bumps a counter every tick
//! - **Anti-entropy gossip**: full tables are pushed to alive peers
//! - **Two-phase failure detection**: silent peers are suspected, then purged
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   MembershipNode                     │
//! ├──────────────┬───────────────────┬───────────────────┤
//! │  Inbound     │  MembershipTable  │  Transport        │
//! │  queue       │                   │                   │
//! ├──────────────┼───────────────────┼───────────────────┤
//! │ • drained    │ • merge           │ • fire-and-forget │
//! │   every tick │ • suspect / purge │ • UDP or memory   │
//! └──────────────┴───────────────────┴───────────────────┘
//! ```
//!
//! Time is logical: timeouts count ticks of a [`Clock`] owned by the
//! scheduler, and nothing in this crate spawns tasks.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use murmur_membership::prelude::*;
//! use std::sync::Arc;
//!
//! let network = MemoryNetwork::new();
//! let clock = ManualClock::new();
//!
//! let mut node = MembershipNode::new(
//!     NodeAddress::new(1, 0),
//!     MembershipConfig::default(),
//!     Arc::new(network.clone()),
//!     Arc::new(clock.clone()),
//! );
//! network.register(node.address(), node.inbound());
//! node.start()?;
//!
//! loop {
//!     clock.advance();
//!     node.tick();
//! }
//! ```

pub mod address;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod membership;
pub mod observability;
pub mod protocol;
pub mod table;
pub mod transport;

// Re-export main types
pub use address::NodeAddress;
pub use clock::{Clock, ManualClock};
pub use config::{Fanout, MembershipConfig, DEFAULT_INTRODUCER};
pub use error::{DecodeError, MembershipError, Result};
pub use events::{EventRecorder, MembershipEvent, MembershipLog, TeeLog, TracingLog};
pub use membership::{JoinState, MembershipNode, TickReport};
pub use observability::{init_metrics, MembershipMetrics};
pub use protocol::{GossipEntry, Message, MessageType};
pub use table::{MemberEntry, MemberState, MembershipTable, MergeOutcome, SweepReport};
pub use transport::{Inbound, MemoryNetwork, NetworkStats, Transport};

/// Re-export common types
pub mod prelude {
    pub use crate::address::NodeAddress;
    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::membership::*;
    pub use crate::transport::*;
}
