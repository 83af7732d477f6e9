//! Node identity and its fixed-width wire encoding
//!
//! A node is identified by a 32-bit host id and a 16-bit port. The same
//! value is the membership-table key and the transport address, so it maps
//! one-to-one onto an IPv4 socket address.

use crate::error::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// Network identity of a group member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    host: u32,
    port: u16,
}

impl NodeAddress {
    /// Encoded size in bytes (u32 host + u16 port)
    pub const ENCODED_LEN: usize = 6;

    /// The all-zero address, never a valid node identity
    pub const NULL: NodeAddress = NodeAddress { host: 0, port: 0 };

    pub const fn new(host: u32, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> u32 {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Write the 6-byte big-endian encoding
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.host);
        buf.put_u16(self.port);
    }

    /// Read a 6-byte encoding, failing on short input
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if buf.remaining() < Self::ENCODED_LEN {
            return Err(DecodeError::Truncated {
                needed: Self::ENCODED_LEN,
                remaining: buf.remaining(),
            });
        }
        let host = buf.get_u32();
        let port = buf.get_u16();
        Ok(Self { host, port })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode from a slice holding exactly one address
    pub fn from_bytes(mut data: &[u8]) -> Result<Self, DecodeError> {
        let addr = Self::decode(&mut data)?;
        if !data.is_empty() {
            return Err(DecodeError::TrailingBytes(data.len()));
        }
        Ok(addr)
    }
}

impl From<SocketAddrV4> for NodeAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<NodeAddress> for SocketAddrV4 {
    fn from(addr: NodeAddress) -> Self {
        SocketAddrV4::new(Ipv4Addr::from(addr.host), addr.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddrV4::from(*self))
    }
}

impl FromStr for NodeAddress {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>()
            .map(NodeAddress::from)
            .map_err(|e| DecodeError::InvalidAddress(format!("{s}: {e}")))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> Self {
        addr.to_string()
    }
}
