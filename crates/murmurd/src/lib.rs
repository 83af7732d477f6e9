//! Murmur Daemon (murmurd)
//!
//! Drives murmur membership nodes: either a whole emulated group inside one
//! process, or a single node gossiping over UDP.
//!
//! ## Quick Start
//!
//! ```bash
//! # Ten nodes, node 3 crashes at tick 100
//! murmurd simulate --nodes 10 --fail-nodes 3
//!
//! # A real group on one host
//! murmurd run --bind 127.0.0.1:7946
//! murmurd run --bind 127.0.0.1:7947 --introducer 127.0.0.1:7946
//! ```

pub mod cli;
pub mod simulation;
pub mod udp;

pub use cli::{Cli, Command, ProtocolArgs, RunArgs, SimulateArgs};
pub use simulation::{Simulation, SimulationConfig, SimulationReport};
pub use udp::{RunOutcome, UdpNode, UdpTransport};
