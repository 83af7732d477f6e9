//! Outbound transport seam and an in-process emulated network
//!
//! The protocol only needs fire-and-forget sends. Inbound buffers arrive on
//! the node's own queue ([`Inbound`]), which the network side feeds and the
//! tick drains.

use crate::address::NodeAddress;
use crate::error::{MembershipError, Result};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Producer half of a node's inbound queue
pub type Inbound = mpsc::UnboundedSender<Bytes>;

/// Fire-and-forget datagram send
pub trait Transport: Send + Sync {
    fn send(&self, from: NodeAddress, to: NodeAddress, payload: Bytes) -> Result<()>;
}

/// Delivery counters for a [`MemoryNetwork`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub bytes: u64,
}

/// In-process network routing buffers straight into node inbound queues.
///
/// Supports random loss and isolating nodes, both applied at send time.
/// Clones share the same routing table.
#[derive(Clone)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<NodeAddress, Inbound>>,
    isolated: Arc<DashSet<NodeAddress>>,
    drop_rate: f64,
    rng: Arc<Mutex<StdRng>>,
    sent: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Lossless network
    pub fn new() -> Self {
        Self::with_loss(0.0, 0)
    }

    /// Network dropping each message with probability `drop_rate`
    pub fn with_loss(drop_rate: f64, seed: u64) -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
            isolated: Arc::new(DashSet::new()),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            sent: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Route messages for `address` into `inbound`
    pub fn register(&self, address: NodeAddress, inbound: Inbound) {
        self.endpoints.insert(address, inbound);
    }

    pub fn unregister(&self, address: &NodeAddress) {
        self.endpoints.remove(address);
    }

    /// Drop everything sent to or from `address`
    pub fn isolate(&self, address: NodeAddress) {
        self.isolated.insert(address);
    }

    pub fn heal(&self, address: &NodeAddress) {
        self.isolated.remove(address);
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    fn should_drop(&self, from: &NodeAddress, to: &NodeAddress) -> bool {
        if self.isolated.contains(from) || self.isolated.contains(to) {
            return true;
        }
        self.drop_rate > 0.0 && self.rng.lock().gen_bool(self.drop_rate)
    }
}

impl Transport for MemoryNetwork {
    fn send(&self, from: NodeAddress, to: NodeAddress, payload: Bytes) -> Result<()> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);

        if self.should_drop(&from, &to) {
            trace!(%from, %to, "Dropping message");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let endpoint = self.endpoints.get(&to).ok_or_else(|| MembershipError::Transport {
            to,
            reason: "no such endpoint".into(),
        })?;

        endpoint
            .send(payload)
            .map_err(|_| MembershipError::Transport {
                to,
                reason: "inbound queue closed".into(),
            })?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: u32) -> NodeAddress {
        NodeAddress::new(host, 0)
    }

    #[test]
    fn test_delivery() {
        let network = MemoryNetwork::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        network.register(addr(2), tx);

        network
            .send(addr(1), addr(2), Bytes::from_static(b"hello"))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"hello"));
        let stats = network.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.bytes, 5);
    }

    #[test]
    fn test_unknown_endpoint() {
        let network = MemoryNetwork::new();
        let err = network
            .send(addr(1), addr(9), Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_isolation() {
        let network = MemoryNetwork::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        network.register(addr(2), tx);

        network.isolate(addr(1));
        network.send(addr(1), addr(2), Bytes::new()).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(network.stats().dropped, 1);

        network.heal(&addr(1));
        network.send(addr(1), addr(2), Bytes::new()).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_total_loss() {
        let network = MemoryNetwork::with_loss(1.0, 7);
        let (tx, mut rx) = mpsc::unbounded_channel();
        network.register(addr(2), tx);

        for _ in 0..10 {
            network.send(addr(1), addr(2), Bytes::new()).unwrap();
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(network.stats().dropped, 10);
    }
}
