//! CLI argument parsing for murmurd
//!
//! Two modes: a deterministic in-process simulation of a whole group, and
//! a single real node gossiping over UDP.

use clap::{Args, Parser, Subcommand};
use murmur_membership::{Fanout, MembershipConfig, NodeAddress};
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Murmur - gossip group membership and failure detection
#[derive(Parser, Debug)]
#[command(name = "murmurd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG", global = true)]
    pub log_level: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "MURMUR_METRICS_ADDR", global = true)]
    pub metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate a group over an emulated lossy network
    Simulate(SimulateArgs),
    /// Run a single node over UDP
    Run(RunArgs),
}

/// Protocol tuning shared by both modes
#[derive(Args, Debug, Clone)]
pub struct ProtocolArgs {
    /// Ticks without a fresher heartbeat before a member is suspected
    #[arg(long, default_value = "5", env = "MURMUR_FAIL_TIMEOUT")]
    pub fail_timeout: u64,

    /// Further ticks before a suspected member is removed
    #[arg(long, default_value = "20", env = "MURMUR_REMOVE_TIMEOUT")]
    pub remove_timeout: u64,

    /// Gossip targets per tick: "broadcast" or a peer count
    #[arg(long, default_value = "broadcast", value_parser = parse_fanout, env = "MURMUR_FANOUT")]
    pub fanout: Fanout,

    /// Also send a direct heartbeat to every alive peer each tick
    #[arg(long, env = "MURMUR_DIRECT_HEARTBEATS")]
    pub direct_heartbeats: bool,

    /// Ticks between join attempts while waiting for the introducer
    #[arg(long, default_value = "5", env = "MURMUR_JOIN_RETRY_TICKS")]
    pub join_retry_ticks: u64,
}

impl ProtocolArgs {
    pub fn membership_config(&self, introducer: NodeAddress) -> MembershipConfig {
        MembershipConfig::new(introducer)
            .with_fail_timeout(self.fail_timeout)
            .with_remove_timeout(self.remove_timeout)
            .with_fanout(self.fanout)
            .with_direct_heartbeats(self.direct_heartbeats)
    }

    fn validate(&self) -> Result<(), String> {
        if self.join_retry_ticks == 0 {
            return Err("join_retry_ticks must be at least 1".to_string());
        }
        // Introducer is filled in per mode; any non-null value checks the rest
        self.membership_config(NodeAddress::new(1, 0))
            .validate()
            .map_err(|e| e.to_string())
    }
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Group size
    #[arg(short, long, default_value = "10", env = "MURMUR_NODES")]
    pub nodes: usize,

    /// Ticks to simulate
    #[arg(short, long, default_value = "700", env = "MURMUR_TICKS")]
    pub ticks: u64,

    /// Probability that any single message is lost
    #[arg(long, default_value = "0.0", env = "MURMUR_DROP_RATE")]
    pub drop_rate: f64,

    /// Seed for the network's loss pattern
    #[arg(long, default_value = "0", env = "MURMUR_SEED")]
    pub seed: u64,

    /// Ticks between consecutive node starts
    #[arg(long, default_value = "1", env = "MURMUR_JOIN_INTERVAL")]
    pub join_interval: u64,

    /// Tick at which the failing nodes crash
    #[arg(long, default_value = "100", env = "MURMUR_FAIL_AT")]
    pub fail_at: u64,

    /// Indices of nodes to crash (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MURMUR_FAIL_NODES")]
    pub fail_nodes: Vec<usize>,

    #[command(flatten)]
    pub protocol: ProtocolArgs,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// UDP bind address, also this node's identity
    #[arg(short, long, default_value = "127.0.0.1:7946", env = "MURMUR_BIND")]
    pub bind: SocketAddrV4,

    /// Introducer address
    #[arg(short, long, default_value = "127.0.0.1:7946", env = "MURMUR_INTRODUCER")]
    pub introducer: SocketAddrV4,

    /// Protocol period in milliseconds
    #[arg(long, default_value = "1000", env = "MURMUR_TICK_MS")]
    pub tick_ms: u64,

    #[command(flatten)]
    pub protocol: ProtocolArgs,
}

impl RunArgs {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn membership_config(&self) -> MembershipConfig {
        self.protocol
            .membership_config(NodeAddress::from(self.introducer))
    }
}

impl Cli {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Simulate(args) => {
                args.protocol.validate()?;

                if args.nodes == 0 {
                    return Err("nodes must be at least 1".to_string());
                }
                if !(0.0..=1.0).contains(&args.drop_rate) {
                    return Err(format!(
                        "drop_rate ({}) must be between 0 and 1",
                        args.drop_rate
                    ));
                }
                if let Some(bad) = args.fail_nodes.iter().find(|i| **i >= args.nodes) {
                    return Err(format!(
                        "fail node index {} out of range for {} nodes",
                        bad, args.nodes
                    ));
                }
            }
            Command::Run(args) => {
                args.protocol.validate()?;

                if args.bind.ip().is_unspecified() {
                    return Err(format!(
                        "bind address {} is not a usable node identity, use a concrete IP",
                        args.bind
                    ));
                }
                if args.tick_ms == 0 {
                    return Err("tick_ms must be at least 1".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Parse `broadcast` or a peer count
pub fn parse_fanout(s: &str) -> Result<Fanout, String> {
    if s.eq_ignore_ascii_case("broadcast") || s.eq_ignore_ascii_case("all") {
        return Ok(Fanout::Broadcast);
    }
    match s.parse::<usize>() {
        Ok(0) => Err("fanout must be at least 1".to_string()),
        Ok(n) => Ok(Fanout::Random(n)),
        Err(_) => Err(format!("invalid fanout '{}', expected 'broadcast' or a number", s)),
    }
}
