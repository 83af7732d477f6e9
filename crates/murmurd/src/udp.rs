//! Single membership node over UDP
//!
//! One datagram carries one message. The node's identity is its bound
//! IPv4 socket address, so peers reply to exactly the address they learn
//! from the table.

use bytes::Bytes;
use murmur_membership::protocol::MAX_MESSAGE_SIZE;
use murmur_membership::{
    Inbound, JoinState, ManualClock, MembershipConfig, MembershipError, MembershipNode,
    NodeAddress, Transport,
};
use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Fire-and-forget sends on a non-blocking std handle of the node socket.
///
/// Sends go straight to the OS, so they never wait on tokio's readiness
/// tracking; the tick path stays synchronous.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<std::net::UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: std::net::UdpSocket) -> std::io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }
}

impl Transport for UdpTransport {
    fn send(&self, _from: NodeAddress, to: NodeAddress, payload: Bytes) -> murmur_membership::Result<()> {
        let target = SocketAddr::V4(SocketAddrV4::from(to));
        self.socket
            .send_to(&payload, target)
            .map(|_| ())
            .map_err(|e| MembershipError::Transport {
                to,
                reason: e.to_string(),
            })
    }
}

/// What a node looked like when it was shut down
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub ticks: u64,
    pub state: JoinState,
    pub members: Vec<NodeAddress>,
}

/// A membership node bound to a UDP socket and ticked on a timer
pub struct UdpNode {
    node: MembershipNode,
    socket: Arc<UdpSocket>,
    clock: ManualClock,
    tick_interval: Duration,
    join_retry_ticks: u64,
}

impl UdpNode {
    /// Bind `addr` and build a node whose identity is the bound address
    pub async fn bind(
        addr: SocketAddrV4,
        config: MembershipConfig,
        tick_interval: Duration,
        join_retry_ticks: u64,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Self::with_socket(socket, config, tick_interval, join_retry_ticks)
    }

    /// Build a node on an already bound socket
    pub fn with_socket(
        socket: UdpSocket,
        config: MembershipConfig,
        tick_interval: Duration,
        join_retry_ticks: u64,
    ) -> anyhow::Result<Self> {
        let local = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(v6) => anyhow::bail!("expected an IPv4 socket, bound {}", v6),
        };
        // One descriptor for the receive loop, a clone of it for sends
        let std_socket = socket.into_std()?;
        let transport = UdpTransport::new(std_socket.try_clone()?)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let clock = ManualClock::new();
        let node = MembershipNode::new(
            NodeAddress::from(local),
            config,
            Arc::new(transport),
            Arc::new(clock.clone()),
        );
        info!(node = %node.address(), "Bound UDP socket");

        Ok(Self {
            node,
            socket,
            clock,
            tick_interval,
            join_retry_ticks: join_retry_ticks.max(1),
        })
    }

    pub fn address(&self) -> NodeAddress {
        self.node.address()
    }

    pub fn node(&self) -> &MembershipNode {
        &self.node
    }

    /// Tick until `shutdown` resolves, then leave the group
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<RunOutcome> {
        self.node.start()?;

        let receiver = tokio::spawn(receive_loop(self.socket.clone(), self.node.inbound()));
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.clock.advance();
                    ticks += 1;

                    if self.node.join_state() == JoinState::Bootstrapping
                        && ticks % self.join_retry_ticks == 0
                    {
                        self.node.rejoin()?;
                    }

                    let report = self.node.tick();
                    trace!(node = %self.node.address(), tick = ticks, ?report, "Tick");
                }
            }
        }

        receiver.abort();
        let outcome = RunOutcome {
            ticks,
            state: self.node.join_state(),
            members: self.node.alive_members(),
        };
        self.node.leave();
        info!(node = %self.node.address(), ticks, "Node stopped");
        Ok(outcome)
    }
}

/// Copy every datagram into the node's inbound queue
async fn receive_loop(socket: Arc<UdpSocket>, inbound: Inbound) {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                trace!(%from, len, "Datagram received");
                if inbound.send(Bytes::copy_from_slice(&buf[..len])).is_err() {
                    debug!("Inbound queue closed, stopping receiver");
                    break;
                }
            }
            Err(e) => {
                // ICMP errors surface here on some platforms; keep listening
                warn!(error = %e, "UDP receive error");
            }
        }
    }
}
